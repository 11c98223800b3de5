//! Document creation and in-place mutations.

use bytes::Bytes;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::LifecycleService;
use super::classify::{filename_type, is_presentation_name, parser_for};
use super::naming::{duplicate_name, free_location, suffix};
use crate::content::{ContentSource, StoredBlob};
use crate::db::{Document, DocumentSource, FileType, KnowledgeBase, ParserType, RunStatus};
use crate::error::{ServiceError, ServiceResult};
use crate::index::{AVAILABLE_FIELD, IndexFilter, IndexPatch, index_name};

fn new_document(
    kb: &KnowledgeBase,
    user_id: &str,
    name: String,
    doc_type: FileType,
    source_type: DocumentSource,
) -> Document {
    let now = Utc::now();
    Document {
        id: Uuid::new_v4().to_string(),
        kb_id: kb.id.clone(),
        doc_type,
        parser_id: parser_for(doc_type, &name, &kb.parser_id),
        parser_config: kb.parser_config.clone(),
        source_type,
        created_by: user_id.to_string(),
        name,
        location: String::new(),
        size: 0,
        enabled: true,
        run: RunStatus::Unstart,
        progress: 0.0,
        progress_msg: String::new(),
        chunk_num: 0,
        token_num: 0,
        process_begin_at: None,
        process_duration: 0.0,
        meta_fields: serde_json::json!({}),
        created_at: now,
        updated_at: now,
    }
}

impl LifecycleService {
    pub(crate) fn check_size(&self, size: u64) -> ServiceResult<()> {
        let max = self.config.limits.max_document_size_bytes;
        if size > max {
            return Err(ServiceError::FileTooLarge { size, max });
        }
        Ok(())
    }

    fn check_tenant_quota(&self, tenant_id: &str) -> ServiceResult<()> {
        let max = self.config.limits.max_documents_per_tenant;
        if max > 0 && self.db.count_tenant_documents(tenant_id)? >= max {
            return Err(ServiceError::validation(
                "Exceed the maximum file number of a free user!",
            ));
        }
        Ok(())
    }

    /// Store uploaded content as a new document of a knowledge base
    pub fn create_from_upload(
        &self,
        kb_id: &str,
        source: &dyn ContentSource,
        user_id: &str,
    ) -> ServiceResult<Document> {
        self.create_from_source(kb_id, source, user_id, DocumentSource::Local)
    }

    /// Store a page rendered by the crawler as a new document
    pub fn create_from_crawl(
        &self,
        kb_id: &str,
        page: &dyn ContentSource,
        user_id: &str,
    ) -> ServiceResult<Document> {
        self.create_from_source(kb_id, page, user_id, DocumentSource::Crawl)
    }

    fn create_from_source(
        &self,
        kb_id: &str,
        source: &dyn ContentSource,
        user_id: &str,
        source_type: DocumentSource,
    ) -> ServiceResult<Document> {
        let kb = self.knowledge_base(kb_id)?;
        self.check_tenant_quota(&kb.tenant_id)?;

        let data = source.read_all()?;
        self.check_size(data.len() as u64)?;

        let name = duplicate_name(source.filename(), |candidate| {
            self.db.document_name_exists(&kb.id, candidate)
        })?;
        let doc_type = filename_type(&name);
        if doc_type == FileType::Other {
            return Err(ServiceError::validation(
                "This type of file has not been supported yet!",
            ));
        }

        let location = free_location(&name, |key| Ok(self.blobs.exists(&kb.id, key)?))?;

        let mut doc = new_document(&kb, user_id, name, doc_type, source_type);
        doc.location = location;
        doc.size = data.len() as u64;

        self.db.insert_document(&doc)?;
        if let Err(e) = self.blobs.put(&kb.id, &doc.location, &data) {
            warn!(doc_id = %doc.id, error = %e, "Blob upload failed, rolling back document row");
            self.db.remove_document(&doc)?;
            return Err(e.into());
        }
        self.link_into_file_tree(&kb, &doc)?;

        metrics::counter!("kbflow_documents_created_total", "source" => source_type.as_str())
            .increment(1);
        info!(doc_id = %doc.id, kb_id = %kb.id, name = %doc.name, size = doc.size, "Created document");
        Ok(doc)
    }

    /// Create a placeholder document with no content
    pub fn create_virtual(&self, kb_id: &str, name: &str, user_id: &str) -> ServiceResult<Document> {
        let kb = self.knowledge_base(kb_id)?;
        if name.trim().is_empty() {
            return Err(ServiceError::validation("File name can't be empty."));
        }
        if !self.db.find_documents_by_name(&kb.id, name)?.is_empty() {
            return Err(ServiceError::DuplicateName {
                name: name.to_string(),
            });
        }

        let mut doc = new_document(
            &kb,
            user_id,
            name.to_string(),
            FileType::Virtual,
            DocumentSource::Virtual,
        );
        doc.parser_id = kb.parser_id.clone();
        self.db.insert_document(&doc)?;

        metrics::counter!("kbflow_documents_created_total", "source" => "virtual").increment(1);
        info!(doc_id = %doc.id, kb_id = %kb.id, name = %doc.name, "Created virtual document");
        Ok(doc)
    }

    /// Rename a document and its linked file
    pub fn rename_document(&self, doc_id: &str, new_name: &str) -> ServiceResult<Document> {
        let doc = self.document(doc_id)?;

        if suffix(new_name) != suffix(&doc.name) {
            return Err(ServiceError::validation(
                "The extension of file can't be changed",
            ));
        }
        let collides = self
            .db
            .find_documents_by_name(&doc.kb_id, new_name)?
            .iter()
            .any(|d| d.id != doc.id && d.name == new_name);
        if collides {
            return Err(ServiceError::validation(
                "Duplicated document name in the same knowledge base.",
            ));
        }

        self.db.rename_document(&doc.id, new_name)?;
        if let Some(link) = self.db.links_for_document(&doc.id)?.first() {
            self.db.rename_file(&link.file_id, new_name)?;
        }

        info!(doc_id = %doc.id, from = %doc.name, to = %new_name, "Renamed document");
        self.document(doc_id)
    }

    /// Switch a document's parser, discarding parse results when it changes
    pub fn change_parser(
        &self,
        doc_id: &str,
        parser_id: &str,
        parser_config: Option<&serde_json::Value>,
    ) -> ServiceResult<Document> {
        let doc = self.document(doc_id)?;

        let same_parser = doc.parser_id.eq_ignore_ascii_case(parser_id);
        let same_config = parser_config.is_none_or(|config| *config == doc.parser_config);
        if same_parser && same_config {
            return Ok(doc);
        }

        if (doc.doc_type == FileType::Visual && parser_id != ParserType::Picture.as_str())
            || (is_presentation_name(&doc.name)
                && parser_id != ParserType::Presentation.as_str())
        {
            return Err(ServiceError::validation(format!(
                "Parser {parser_id} is not supported for {}",
                doc.name
            )));
        }
        if let Some(config) = parser_config {
            if !config.is_object() {
                return Err(ServiceError::validation("Parser config must be a JSON object"));
            }
        }

        self.db.update_document_parser(&doc.id, parser_id, parser_config)?;

        if doc.token_num > 0 {
            self.db.increment_chunk_num(
                &doc.id,
                &doc.kb_id,
                -doc.token_num,
                -doc.chunk_num,
                -doc.process_duration,
            )?;
            let tenant_id = self.tenant_id(&doc.id)?;
            let removed = self.purge_document_chunks(&tenant_id, &doc)?;
            info!(doc_id = %doc.id, removed, "Discarded chunks after parser change");
        }

        info!(doc_id = %doc.id, from = %doc.parser_id, to = %parser_id, "Changed document parser");
        self.document(doc_id)
    }

    /// Enable or disable a document. The metadata write is committed first;
    /// if the index patch then fails the index stays stale until the next
    /// status change or reparse.
    pub fn change_status(&self, doc_id: &str, enabled: bool) -> ServiceResult<()> {
        let doc = self.document(doc_id)?;
        let kb = self.knowledge_base(&doc.kb_id)?;

        self.db.update_document_status(&doc.id, enabled)?;

        let patch = IndexPatch::set(AVAILABLE_FIELD, i64::from(enabled));
        if let Err(e) = self.index.update(
            &index_name(&kb.tenant_id),
            &doc.kb_id,
            &IndexFilter::doc(&doc.id),
            &patch,
        ) {
            warn!(doc_id = %doc.id, enabled, error = %e, "Status committed but index patch failed");
            return Err(e.into());
        }

        info!(doc_id = %doc.id, enabled, "Changed document status");
        Ok(())
    }

    /// Replace a document's metadata fields with a flat JSON object
    pub fn set_meta(&self, doc_id: &str, meta: &str) -> ServiceResult<()> {
        let meta: serde_json::Value = serde_json::from_str(meta)
            .map_err(|e| ServiceError::validation(format!("Json syntax error: {e}")))?;
        let Some(fields) = meta.as_object() else {
            return Err(ServiceError::validation(
                r#"Meta data should be in Json map format, like {"key": "value"}"#,
            ));
        };
        if fields.values().any(|v| v.is_object() || v.is_array()) {
            return Err(ServiceError::validation(
                "Meta data values must be strings, numbers, booleans or null",
            ));
        }

        let doc = self.document(doc_id)?;
        self.db.update_document_meta(&doc.id, &meta)?;
        info!(doc_id = %doc.id, fields = fields.len(), "Updated document metadata");
        Ok(())
    }

    /// Read a document's content from blob storage
    pub fn document_content(&self, doc_id: &str) -> ServiceResult<(Document, Bytes)> {
        let doc = self.document(doc_id)?;
        let (bucket, key) = self.storage_address(&doc)?;
        let data = StoredBlob::new(self.blobs.clone(), &bucket, &key, &doc.name).read_all()?;
        Ok((doc, data))
    }

    /// Documents of a knowledge base
    pub fn list_documents(&self, kb_id: &str) -> ServiceResult<Vec<Document>> {
        let kb = self.knowledge_base(kb_id)?;
        self.db.list_documents(&kb.id)
    }

    /// Details of several documents; unknown ids are skipped
    pub fn document_infos(&self, doc_ids: &[String]) -> ServiceResult<Vec<Document>> {
        let mut docs = Vec::with_capacity(doc_ids.len());
        for doc_id in doc_ids {
            if let Some(doc) = self.db.get_document(doc_id)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}
