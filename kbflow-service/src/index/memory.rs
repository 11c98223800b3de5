//! Embedded in-process index store.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::debug;

use super::{IndexFilter, IndexPatch, IndexStore, count_terms};
use crate::error::IndexError;

type Partition = (String, String);

/// Index store keeping every partition in memory, keyed by
/// `(index_name, kb_id)`.
#[derive(Default)]
pub struct MemoryIndexStore {
    partitions: DashMap<Partition, Vec<Map<String, Value>>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of one partition matching a filter
    #[cfg(test)]
    pub fn search(
        &self,
        index_name: &str,
        kb_id: &str,
        filter: &IndexFilter,
    ) -> Vec<Map<String, Value>> {
        self.partitions
            .get(&key(index_name, kb_id))
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default()
    }
}

fn key(index_name: &str, kb_id: &str) -> Partition {
    (index_name.to_string(), kb_id.to_string())
}

impl IndexStore for MemoryIndexStore {
    fn create_idx(&self, index_name: &str, kb_id: &str) -> Result<(), IndexError> {
        self.partitions.entry(key(index_name, kb_id)).or_default();
        debug!(index = %index_name, kb_id = %kb_id, "Created index partition");
        Ok(())
    }

    fn delete_idx(&self, index_name: &str, kb_id: &str) -> Result<(), IndexError> {
        if kb_id.is_empty() {
            self.partitions.retain(|(name, _), _| name != index_name);
        } else {
            self.partitions.remove(&key(index_name, kb_id));
        }
        debug!(index = %index_name, kb_id = %kb_id, "Dropped index partition");
        Ok(())
    }

    fn index_exist(&self, index_name: &str, kb_id: &str) -> Result<bool, IndexError> {
        if kb_id.is_empty() {
            Ok(self.partitions.iter().any(|p| p.key().0 == index_name))
        } else {
            Ok(self.partitions.contains_key(&key(index_name, kb_id)))
        }
    }

    fn upsert(
        &self,
        index_name: &str,
        kb_id: &str,
        rows: Vec<Map<String, Value>>,
    ) -> Result<(), IndexError> {
        let mut partition = self
            .partitions
            .get_mut(&key(index_name, kb_id))
            .ok_or_else(|| IndexError::IndexNotFound {
                index_name: index_name.to_string(),
                kb_id: kb_id.to_string(),
            })?;

        for row in rows {
            let existing = row
                .get("id")
                .and_then(|id| partition.iter().position(|r| r.get("id") == Some(id)));
            match existing {
                Some(pos) => partition[pos] = row,
                None => partition.push(row),
            }
        }
        Ok(())
    }

    fn delete(
        &self,
        index_name: &str,
        kb_id: &str,
        filter: &IndexFilter,
    ) -> Result<usize, IndexError> {
        let Some(mut partition) = self.partitions.get_mut(&key(index_name, kb_id)) else {
            return Ok(0);
        };
        let before = partition.len();
        partition.retain(|row| !filter.matches(row));
        Ok(before - partition.len())
    }

    fn update(
        &self,
        index_name: &str,
        kb_id: &str,
        filter: &IndexFilter,
        patch: &IndexPatch,
    ) -> Result<usize, IndexError> {
        let Some(mut partition) = self.partitions.get_mut(&key(index_name, kb_id)) else {
            return Ok(0);
        };
        let mut touched = 0;
        for row in partition.iter_mut().filter(|r| filter.matches(r)) {
            patch.apply(row);
            touched += 1;
        }
        Ok(touched)
    }

    fn term_counts(
        &self,
        index_name: &str,
        kb_id: &str,
        field: &str,
    ) -> Result<BTreeMap<String, usize>, IndexError> {
        Ok(self
            .partitions
            .get(&key(index_name, kb_id))
            .map(|rows| count_terms(rows.iter(), field))
            .unwrap_or_default())
    }

    fn health(&self) -> Result<(), IndexError> {
        Ok(())
    }
}
