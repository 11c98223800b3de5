//! Knowledge base creation and settings.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::LifecycleService;
use super::files::KNOWLEDGE_BASE_FOLDER;
use super::naming::duplicate_name;
use crate::db::{KnowledgeBase, KnowledgeBaseQuery, ParserType};
use crate::error::{ServiceError, ServiceResult};
use crate::index::{IndexFilter, IndexPatch, PAGERANK_FIELD, index_name};

/// User-editable knowledge base fields
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KnowledgeBaseUpdate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parser_id: Option<String>,
    #[serde(default)]
    pub parser_config: Option<serde_json::Value>,
    #[serde(default)]
    pub pagerank: Option<i64>,
}

/// A page of knowledge bases with the total number of matches
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBasePage {
    pub kbs: Vec<KnowledgeBase>,
    pub total: i64,
}

impl LifecycleService {
    fn validate_kb_name(&self, name: &str) -> ServiceResult<String> {
        let limit = self.config.limits.kb_name_limit;
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::validation("Knowledge base name can't be empty."));
        }
        let length = name.chars().count();
        if length >= limit {
            return Err(ServiceError::validation(format!(
                "Knowledge base name length is {length} which is larger than {limit}"
            )));
        }
        Ok(name.to_string())
    }

    fn validate_kb_fields(fields: &KnowledgeBaseUpdate) -> ServiceResult<()> {
        if fields.pagerank.is_some_and(|rank| rank < 0) {
            return Err(ServiceError::validation("Pagerank must not be negative"));
        }
        if fields
            .parser_config
            .as_ref()
            .is_some_and(|config| !config.is_object())
        {
            return Err(ServiceError::validation("Parser config must be a JSON object"));
        }
        Ok(())
    }

    /// Create a knowledge base owned by `user_id`. Clashing names get a
    /// `(n)` counter.
    pub fn create_knowledge_base(
        &self,
        user_id: &str,
        fields: &KnowledgeBaseUpdate,
    ) -> ServiceResult<KnowledgeBase> {
        let name = self.validate_kb_name(&fields.name)?;
        Self::validate_kb_fields(fields)?;

        let name = duplicate_name(&name, |candidate| {
            Ok(!self
                .db
                .find_knowledge_bases_by_name(user_id, candidate)?
                .is_empty())
        })?;

        let now = Utc::now();
        let kb = KnowledgeBase {
            id: Uuid::new_v4().to_string(),
            tenant_id: user_id.to_string(),
            name,
            description: fields.description.clone().unwrap_or_default(),
            parser_id: fields
                .parser_id
                .clone()
                .unwrap_or_else(|| ParserType::Naive.as_str().to_string()),
            parser_config: fields
                .parser_config
                .clone()
                .unwrap_or_else(|| serde_json::json!({})),
            pagerank: fields.pagerank.unwrap_or(0),
            doc_num: 0,
            token_num: 0,
            chunk_num: 0,
            created_by: user_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.db.insert_knowledge_base(&kb)?;

        info!(kb_id = %kb.id, name = %kb.name, tenant_id = %kb.tenant_id, "Created knowledge base");
        Ok(kb)
    }

    /// Update a knowledge base. A pagerank change is pushed into the index:
    /// a positive rank is written to every chunk, zero removes the field.
    pub fn update_knowledge_base(
        &self,
        kb_id: &str,
        user_id: &str,
        fields: &KnowledgeBaseUpdate,
    ) -> ServiceResult<KnowledgeBase> {
        let name = self.validate_kb_name(&fields.name)?;
        Self::validate_kb_fields(fields)?;

        let kb = self.knowledge_base(kb_id)?;
        if kb.created_by != user_id {
            return Err(ServiceError::validation(
                "Only owner of knowledge base authorized for this operation.",
            ));
        }

        if !name.eq_ignore_ascii_case(&kb.name) {
            let taken = self
                .db
                .find_knowledge_bases_by_name(&kb.tenant_id, &name)?
                .iter()
                .any(|other| other.id != kb.id);
            if taken {
                return Err(ServiceError::validation("Duplicated knowledge base name."));
            }
        }

        let mut updated = kb.clone();
        updated.name = name;
        if let Some(description) = &fields.description {
            updated.description = description.clone();
        }
        if let Some(parser_id) = &fields.parser_id {
            updated.parser_id = parser_id.clone();
        }
        if let Some(parser_config) = &fields.parser_config {
            updated.parser_config = parser_config.clone();
        }
        updated.pagerank = fields.pagerank.unwrap_or(kb.pagerank);

        self.db.update_knowledge_base(&updated)?;
        if updated.name != kb.name {
            self.rename_knowledge_base_folder(&kb, &updated.name)?;
        }

        if updated.pagerank != kb.pagerank {
            let name = index_name(&kb.tenant_id);
            let touched = if updated.pagerank > 0 {
                self.index.update(
                    &name,
                    &kb.id,
                    &IndexFilter::kb(&kb.id),
                    &IndexPatch::set(PAGERANK_FIELD, updated.pagerank),
                )?
            } else {
                self.index.update(
                    &name,
                    &kb.id,
                    &IndexFilter::exists(PAGERANK_FIELD),
                    &IndexPatch::Remove(PAGERANK_FIELD.to_string()),
                )?
            };
            info!(kb_id = %kb.id, pagerank = updated.pagerank, touched, "Propagated pagerank");
        }

        info!(kb_id = %kb.id, name = %updated.name, "Updated knowledge base");
        self.knowledge_base(kb_id)
    }

    /// One page of the knowledge bases owned by `user_id`'s tenant
    pub fn list_knowledge_bases(
        &self,
        user_id: &str,
        query: &KnowledgeBaseQuery,
    ) -> ServiceResult<KnowledgeBasePage> {
        let (kbs, total) = self.db.list_knowledge_bases(user_id, query)?;
        Ok(KnowledgeBasePage { kbs, total })
    }

    fn rename_knowledge_base_folder(&self, kb: &KnowledgeBase, new_name: &str) -> ServiceResult<()> {
        let Some(root) = self.db.root_folder(&kb.tenant_id)? else {
            return Ok(());
        };
        let Some(kb_root) = self.db.find_child_file(&root.id, KNOWLEDGE_BASE_FOLDER)? else {
            return Ok(());
        };
        if let Some(folder) = self.db.find_child_file(&kb_root.id, &kb.name)? {
            self.db.rename_file(&folder.id, new_name)?;
        }
        Ok(())
    }
}
