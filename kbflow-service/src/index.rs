//! Search index contract.
//!
//! Each tenant owns one logical index named `kbflow_<tenant_id>`, partitioned
//! by knowledge base. Chunk rows are JSON objects carrying at least `id`,
//! `doc_id` and `kb_id`. Executors write rows through the lifecycle
//! service; everything else only deletes, patches or aggregates them by
//! filter.

mod memory;

pub use memory::MemoryIndexStore;

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::IndexError;

/// Index field carrying the knowledge base rank boost.
pub const PAGERANK_FIELD: &str = "pagerank";

/// Index field mirroring the document's enabled flag.
pub const AVAILABLE_FIELD: &str = "available_int";

/// Multi-valued keyword field holding a chunk's tags.
pub const TAG_FIELD: &str = "tag_kwd";

/// Index name for a tenant
pub fn index_name(tenant_id: &str) -> String {
    format!("kbflow_{tenant_id}")
}

/// Row selector: every term must match and the `exists` field, when set,
/// must be present. A term matches a field equal to the value, or an array
/// field containing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexFilter {
    pub terms: Map<String, Value>,
    pub exists: Option<String>,
}

impl IndexFilter {
    pub fn term(field: &str, value: impl Into<Value>) -> Self {
        let mut terms = Map::new();
        terms.insert(field.to_string(), value.into());
        Self {
            terms,
            exists: None,
        }
    }

    pub fn doc(doc_id: &str) -> Self {
        Self::term("doc_id", doc_id)
    }

    pub fn kb(kb_id: &str) -> Self {
        Self::term("kb_id", kb_id)
    }

    /// Add another term to the filter
    pub fn and_term(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.terms.insert(field.to_string(), value.into());
        self
    }

    pub fn exists(field: &str) -> Self {
        Self {
            terms: Map::new(),
            exists: Some(field.to_string()),
        }
    }

    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        let terms_match = self
            .terms
            .iter()
            .all(|(field, value)| match row.get(field) {
                Some(Value::Array(items)) => items.contains(value),
                Some(found) => found == value,
                None => false,
            });
        let exists_match = self
            .exists
            .as_ref()
            .is_none_or(|field| row.contains_key(field));
        terms_match && exists_match
    }
}

/// Partial update applied to matching rows.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexPatch {
    /// Set (or overwrite) the given fields.
    Set(Map<String, Value>),
    /// Physically remove a field.
    Remove(String),
    /// Remove one value from a multi-valued field.
    RemoveValue { field: String, value: Value },
    /// Add a value to a multi-valued field unless already present.
    AddValue { field: String, value: Value },
    /// Apply several patches in order.
    Sequence(Vec<IndexPatch>),
}

impl IndexPatch {
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        let mut fields = Map::new();
        fields.insert(field.to_string(), value.into());
        IndexPatch::Set(fields)
    }

    pub fn remove_value(field: &str, value: impl Into<Value>) -> Self {
        IndexPatch::RemoveValue {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn add_value(field: &str, value: impl Into<Value>) -> Self {
        IndexPatch::AddValue {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn apply(&self, row: &mut Map<String, Value>) {
        match self {
            IndexPatch::Set(fields) => {
                for (field, value) in fields {
                    row.insert(field.clone(), value.clone());
                }
            }
            IndexPatch::Remove(field) => {
                row.remove(field);
            }
            IndexPatch::RemoveValue { field, value } => {
                if row.get(field) == Some(value) {
                    row.remove(field);
                } else if let Some(Value::Array(items)) = row.get_mut(field) {
                    items.retain(|item| item != value);
                }
            }
            IndexPatch::AddValue { field, value } => {
                let merged = match row.remove(field) {
                    Some(Value::Array(mut items)) => {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                        Value::Array(items)
                    }
                    Some(existing) if existing == *value => existing,
                    Some(existing) => Value::Array(vec![existing, value.clone()]),
                    None => Value::Array(vec![value.clone()]),
                };
                row.insert(field.clone(), merged);
            }
            IndexPatch::Sequence(patches) => {
                for patch in patches {
                    patch.apply(row);
                }
            }
        }
    }
}

/// Count every string value of `field` across `rows`, looking inside arrays.
pub fn count_terms<'a>(
    rows: impl IntoIterator<Item = &'a Map<String, Value>>,
    field: &str,
) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        let values = match row.get(field) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(value) => vec![value],
            None => Vec::new(),
        };
        for value in values {
            if let Value::String(term) = value {
                *counts.entry(term.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

pub trait IndexStore: Send + Sync {
    fn create_idx(&self, index_name: &str, kb_id: &str) -> Result<(), IndexError>;

    /// Drop the partition of `kb_id`, or the whole index when `kb_id` is empty.
    fn delete_idx(&self, index_name: &str, kb_id: &str) -> Result<(), IndexError>;

    fn index_exist(&self, index_name: &str, kb_id: &str) -> Result<bool, IndexError>;

    /// Insert rows, replacing any existing row with the same `id`.
    fn upsert(
        &self,
        index_name: &str,
        kb_id: &str,
        rows: Vec<Map<String, Value>>,
    ) -> Result<(), IndexError>;

    /// Delete matching rows, returning how many were removed.
    fn delete(
        &self,
        index_name: &str,
        kb_id: &str,
        filter: &IndexFilter,
    ) -> Result<usize, IndexError>;

    /// Patch matching rows, returning how many were touched.
    fn update(
        &self,
        index_name: &str,
        kb_id: &str,
        filter: &IndexFilter,
        patch: &IndexPatch,
    ) -> Result<usize, IndexError>;

    /// Occurrences of each value of a keyword field within one partition.
    fn term_counts(
        &self,
        index_name: &str,
        kb_id: &str,
        field: &str,
    ) -> Result<BTreeMap<String, usize>, IndexError>;

    fn health(&self) -> Result<(), IndexError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn filter_matches_terms_and_exists() {
        let chunk = row(json!({"id": "c1", "doc_id": "d1", "kb_id": "kb1", "pagerank": 5}));

        assert!(IndexFilter::doc("d1").matches(&chunk));
        assert!(!IndexFilter::doc("d2").matches(&chunk));
        assert!(IndexFilter::kb("kb1").matches(&chunk));
        assert!(IndexFilter::exists(PAGERANK_FIELD).matches(&chunk));
        assert!(!IndexFilter::exists("missing").matches(&chunk));
    }

    #[test]
    fn remove_patch_drops_field() {
        let mut chunk = row(json!({"id": "c1", "pagerank": 5}));
        IndexPatch::Remove(PAGERANK_FIELD.to_string()).apply(&mut chunk);
        assert!(!chunk.contains_key(PAGERANK_FIELD));

        IndexPatch::set(AVAILABLE_FIELD, 0).apply(&mut chunk);
        assert_eq!(chunk.get(AVAILABLE_FIELD), Some(&json!(0)));
    }

    #[test]
    fn term_filter_looks_inside_arrays() {
        let chunk = row(json!({"id": "c1", "kb_id": "kb1", "tag_kwd": ["red", "blue"]}));

        assert!(IndexFilter::term(TAG_FIELD, "red").matches(&chunk));
        assert!(IndexFilter::kb("kb1").and_term(TAG_FIELD, "blue").matches(&chunk));
        assert!(!IndexFilter::kb("kb2").and_term(TAG_FIELD, "blue").matches(&chunk));
        assert!(!IndexFilter::term(TAG_FIELD, "green").matches(&chunk));
    }

    #[test]
    fn value_patches_edit_multi_valued_fields() {
        let mut chunk = row(json!({"id": "c1", "tag_kwd": ["red", "blue"]}));
        let rename = IndexPatch::Sequence(vec![
            IndexPatch::remove_value(TAG_FIELD, "red"),
            IndexPatch::add_value(TAG_FIELD, "green"),
        ]);
        rename.apply(&mut chunk);
        assert_eq!(chunk[TAG_FIELD], json!(["blue", "green"]));

        IndexPatch::add_value(TAG_FIELD, "blue").apply(&mut chunk);
        assert_eq!(chunk[TAG_FIELD], json!(["blue", "green"]));

        let mut scalar = row(json!({"id": "c2", "tag_kwd": "red"}));
        IndexPatch::add_value(TAG_FIELD, "blue").apply(&mut scalar);
        assert_eq!(scalar[TAG_FIELD], json!(["red", "blue"]));

        let mut single = row(json!({"id": "c3", "tag_kwd": "red"}));
        IndexPatch::remove_value(TAG_FIELD, "red").apply(&mut single);
        assert!(!single.contains_key(TAG_FIELD));

        let mut untagged = row(json!({"id": "c4"}));
        IndexPatch::add_value(TAG_FIELD, "red").apply(&mut untagged);
        assert_eq!(untagged[TAG_FIELD], json!(["red"]));
    }

    #[test]
    fn term_counts_cover_scalars_and_arrays() {
        let rows = [
            row(json!({"tag_kwd": ["red", "blue"]})),
            row(json!({"tag_kwd": "red"})),
            row(json!({"tag_kwd": 7})),
            row(json!({"id": "untagged"})),
        ];
        let counts = count_terms(&rows, TAG_FIELD);
        assert_eq!(counts.get("red"), Some(&2));
        assert_eq!(counts.get("blue"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn index_name_is_per_tenant() {
        assert_eq!(index_name("t1"), "kbflow_t1");
    }
}
