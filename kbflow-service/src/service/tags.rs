//! Knowledge base tag maintenance.
//!
//! Tags live only in the search index, on the multi-valued `tag_kwd` field of
//! each chunk. Listing aggregates them; removing and renaming patch every
//! chunk of the knowledge base carrying the tag.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use super::LifecycleService;
use crate::error::{ServiceError, ServiceResult};
use crate::index::{IndexFilter, IndexPatch, TAG_FIELD, index_name};

/// A tag and the number of chunks carrying it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

impl LifecycleService {
    /// Tags across the given knowledge bases, most used first
    pub fn list_tags(&self, kb_ids: &[String]) -> ServiceResult<Vec<TagCount>> {
        let mut totals: BTreeMap<String, usize> = BTreeMap::new();
        for kb_id in kb_ids {
            let kb = self.knowledge_base(kb_id)?;
            let name = index_name(&kb.tenant_id);
            if !self.index.index_exist(&name, &kb.id)? {
                continue;
            }
            for (tag, count) in self.index.term_counts(&name, &kb.id, TAG_FIELD)? {
                *totals.entry(tag).or_insert(0) += count;
            }
        }

        let mut tags: Vec<TagCount> = totals
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect();
        tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        Ok(tags)
    }

    /// Strip tags from every chunk of a knowledge base. Returns the number of
    /// chunk patches applied.
    pub fn remove_tags(&self, kb_id: &str, tags: &[String]) -> ServiceResult<usize> {
        let kb = self.knowledge_base(kb_id)?;
        let name = index_name(&kb.tenant_id);
        if !self.index.index_exist(&name, &kb.id)? {
            return Ok(0);
        }

        let mut touched = 0;
        for tag in tags {
            touched += self.index.update(
                &name,
                &kb.id,
                &IndexFilter::kb(&kb.id).and_term(TAG_FIELD, tag.as_str()),
                &IndexPatch::remove_value(TAG_FIELD, tag.as_str()),
            )?;
        }

        info!(kb_id = %kb.id, tags = tags.len(), touched, "Removed tags");
        Ok(touched)
    }

    /// Replace `from` with `to` on every chunk of a knowledge base carrying
    /// `from`. Chunks that already carry `to` keep a single copy.
    pub fn rename_tag(&self, kb_id: &str, from: &str, to: &str) -> ServiceResult<usize> {
        let (from, to) = (from.trim(), to.trim());
        if from.is_empty() || to.is_empty() {
            return Err(ServiceError::validation("Tag can't be empty"));
        }
        let kb = self.knowledge_base(kb_id)?;
        let name = index_name(&kb.tenant_id);
        if from == to || !self.index.index_exist(&name, &kb.id)? {
            return Ok(0);
        }

        let patch = IndexPatch::Sequence(vec![
            IndexPatch::remove_value(TAG_FIELD, from),
            IndexPatch::add_value(TAG_FIELD, to),
        ]);
        let touched = self.index.update(
            &name,
            &kb.id,
            &IndexFilter::kb(&kb.id).and_term(TAG_FIELD, from),
            &patch,
        )?;

        info!(kb_id = %kb.id, from, to, touched, "Renamed tag");
        Ok(touched)
    }
}
