//! Document lifecycle, task dispatch and progress aggregation.
//!
//! `LifecycleService` orchestrates every multi-store operation. Writes go to
//! the metadata store first; blob and index entries are derived state and
//! are cleaned up after it. Failures midway are surfaced without rolling
//! back completed steps; re-running the operation converges the stores.

mod classify;
mod deletion;
mod dispatch;
mod documents;
mod executors;
mod files;
mod health;
mod knowledgebases;
mod naming;
mod progress;
mod tags;

#[cfg(test)]
pub(crate) mod testing;

pub use health::SystemStatus;
pub use knowledgebases::{KnowledgeBasePage, KnowledgeBaseUpdate};
pub use tags::TagCount;

use std::sync::Arc;

use tracing::info;

use crate::blob::BlobStore;
use crate::config::StaticConfig;
use crate::db::{Database, Document, KnowledgeBase};
use crate::error::{ServiceError, ServiceResult};
use crate::index::{IndexStore, index_name};
use crate::providers::ProviderRegistry;
use crate::queue::TaskQueue;

/// Main service coordinator
#[derive(Clone)]
pub struct LifecycleService {
    pub config: Arc<StaticConfig>,
    pub db: Arc<Database>,
    pub blobs: Arc<dyn BlobStore>,
    pub index: Arc<dyn IndexStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub providers: Arc<ProviderRegistry>,
}

impl LifecycleService {
    /// Create a new service from explicitly constructed store handles
    pub fn new(
        config: Arc<StaticConfig>,
        db: Arc<Database>,
        blobs: Arc<dyn BlobStore>,
        index: Arc<dyn IndexStore>,
        queue: Arc<dyn TaskQueue>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        info!("Initializing kbflow lifecycle service");
        Self {
            config,
            db,
            blobs,
            index,
            queue,
            providers,
        }
    }

    /// Look up a document or fail with `DocumentNotFound`
    pub fn document(&self, doc_id: &str) -> ServiceResult<Document> {
        self.db
            .get_document(doc_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: doc_id.to_string(),
            })
    }

    /// Look up a knowledge base or fail with `KnowledgeBaseNotFound`
    pub fn knowledge_base(&self, kb_id: &str) -> ServiceResult<KnowledgeBase> {
        self.db
            .get_knowledge_base(kb_id)?
            .ok_or_else(|| ServiceError::KnowledgeBaseNotFound {
                kb_id: kb_id.to_string(),
            })
    }

    fn tenant_id(&self, doc_id: &str) -> ServiceResult<String> {
        self.db
            .get_tenant_id(doc_id)?
            .ok_or_else(|| ServiceError::TenantNotFound {
                document_id: doc_id.to_string(),
            })
    }

    /// Delete a document's index entries if its tenant index exists
    fn purge_document_chunks(&self, tenant_id: &str, doc: &Document) -> ServiceResult<usize> {
        let name = index_name(tenant_id);
        if !self.index.index_exist(&name, &doc.kb_id)? {
            return Ok(0);
        }
        Ok(self
            .index
            .delete(&name, &doc.kb_id, &crate::index::IndexFilter::doc(&doc.id))?)
    }
}
