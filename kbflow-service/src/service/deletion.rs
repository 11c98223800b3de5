//! Document and knowledge base removal.
//!
//! Cleanup order per document: tasks, index entries, metadata row, file
//! link, KB-private file row, blob. Only blobs owned by the knowledge base
//! are removed; converted documents leave the user's file blob alone.

use tracing::{error, info, warn};

use super::LifecycleService;
use crate::db::{Document, FileSource};
use crate::error::{BatchFailure, ServiceResult};
use crate::index::{IndexFilter, index_name};

impl LifecycleService {
    /// Remove a document's tasks, index entries and metadata row.
    /// Blob, file row and link are left to the caller.
    pub(crate) fn remove_document_records(
        &self,
        doc: &Document,
        tenant_id: &str,
    ) -> ServiceResult<()> {
        let tasks = self.db.delete_tasks_for_document(&doc.id)?;
        let chunks = self.purge_document_chunks(tenant_id, doc)?;
        self.db.remove_document(doc)?;
        info!(doc_id = %doc.id, tasks, chunks, "Removed document records");
        Ok(())
    }

    /// Full cascade for one document
    fn delete_document(&self, doc_id: &str) -> ServiceResult<()> {
        let doc = self.document(doc_id)?;
        let tenant_id = self.tenant_id(doc_id)?;
        let (bucket, key) = self.storage_address(&doc)?;
        let links = self.db.links_for_document(doc_id)?;

        self.remove_document_records(&doc, &tenant_id)?;

        let mut owns_blob = true;
        for link in &links {
            let file = self.db.get_file(&link.file_id)?;
            if file.as_ref().is_some_and(|f| f.source_type != FileSource::KnowledgeBase) {
                owns_blob = false;
            }
        }
        self.db.delete_links_for_document(doc_id)?;
        for link in &links {
            self.db.delete_knowledge_base_file(&link.file_id)?;
        }

        if owns_blob && !key.is_empty() {
            self.blobs.remove(&bucket, &key)?;
        }

        metrics::counter!("kbflow_documents_deleted_total").increment(1);
        info!(doc_id = %doc_id, kb_id = %doc.kb_id, "Deleted document");
        Ok(())
    }

    /// Delete documents, continuing past individual failures. All failures
    /// are reported together once every id has been attempted.
    pub fn delete_documents(&self, doc_ids: &[String]) -> ServiceResult<()> {
        let mut failures = BatchFailure::default();

        for doc_id in doc_ids {
            if let Err(e) = self.delete_document(doc_id) {
                warn!(doc_id = %doc_id, error = %e, "Document deletion failed");
                failures.record(doc_id, &e);
            }
        }

        failures.into_result()
    }

    /// Delete a knowledge base with all of its documents, its folder, its
    /// row and its index partition. Document failures do not stop the rest
    /// of the cascade and are reported at the end.
    pub fn delete_knowledge_base(&self, kb_id: &str) -> ServiceResult<()> {
        let kb = self.knowledge_base(kb_id)?;
        let mut failures = BatchFailure::default();

        for doc in self.db.list_documents(&kb.id)? {
            if let Err(e) = self.delete_document(&doc.id) {
                warn!(doc_id = %doc.id, kb_id = %kb.id, error = %e, "Document deletion failed");
                failures.record(&doc.id, &e);
            }
        }

        self.db.delete_knowledge_base_folder(&kb.tenant_id, &kb.name)?;
        self.db.delete_knowledge_base(&kb.id)?;

        let name = index_name(&kb.tenant_id);
        self.index.delete(&name, &kb.id, &IndexFilter::kb(&kb.id))?;
        self.index.delete_idx(&name, &kb.id)?;

        if failures.is_empty() {
            info!(kb_id = %kb.id, name = %kb.name, "Deleted knowledge base");
        } else {
            error!(kb_id = %kb.id, failed = failures.failures.len(), "Deleted knowledge base with failures");
        }
        failures.into_result()
    }
}
