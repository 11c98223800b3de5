//! Virtual file tree overlay and file-to-document conversion.
//!
//! Every tenant has a root folder (its own parent), a `.knowledgebase`
//! folder beneath it and one folder per knowledge base. Uploaded documents
//! get a KB-private file row in their KB folder; user files elsewhere in the
//! tree are only ever linked to documents.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::LifecycleService;
use super::classify::{filename_type, parser_for};
use super::naming::free_location;
use crate::content::ContentSource;
use crate::db::{
    Document, DocumentSource, FileDocumentLink, FileRecord, FileSource, FileType, KnowledgeBase,
    RunStatus,
};
use crate::error::{ServiceError, ServiceResult};

pub(crate) const KNOWLEDGE_BASE_FOLDER: &str = ".knowledgebase";

fn folder(tenant_id: &str, parent_id: Option<&str>, name: &str, source: FileSource) -> FileRecord {
    let id = Uuid::new_v4().to_string();
    FileRecord {
        parent_id: parent_id.map_or_else(|| id.clone(), str::to_string),
        id,
        tenant_id: tenant_id.to_string(),
        created_by: tenant_id.to_string(),
        name: name.to_string(),
        location: String::new(),
        size: 0,
        file_type: FileType::Folder,
        source_type: source,
        created_at: Utc::now(),
    }
}

impl LifecycleService {
    /// A tenant's root folder, created on first use
    pub fn root_folder(&self, tenant_id: &str) -> ServiceResult<FileRecord> {
        if let Some(root) = self.db.root_folder(tenant_id)? {
            return Ok(root);
        }
        let root = folder(tenant_id, None, "/", FileSource::Local);
        self.db.insert_file(&root)?;
        debug!(tenant_id = %tenant_id, folder_id = %root.id, "Created root folder");
        Ok(root)
    }

    fn child_folder(
        &self,
        tenant_id: &str,
        parent_id: &str,
        name: &str,
    ) -> ServiceResult<FileRecord> {
        if let Some(existing) = self.db.find_child_file(parent_id, name)? {
            return Ok(existing);
        }
        let created = folder(tenant_id, Some(parent_id), name, FileSource::KnowledgeBase);
        self.db.insert_file(&created)?;
        debug!(tenant_id = %tenant_id, folder_id = %created.id, name = %name, "Created folder");
        Ok(created)
    }

    /// The folder holding a knowledge base's private files
    pub(crate) fn knowledge_base_folder(&self, kb: &KnowledgeBase) -> ServiceResult<FileRecord> {
        let root = self.root_folder(&kb.tenant_id)?;
        let kb_root = self.child_folder(&kb.tenant_id, &root.id, KNOWLEDGE_BASE_FOLDER)?;
        self.child_folder(&kb.tenant_id, &kb_root.id, &kb.name)
    }

    /// Give a document a KB-private file row and link it, unless already linked
    pub(crate) fn link_into_file_tree(
        &self,
        kb: &KnowledgeBase,
        doc: &Document,
    ) -> ServiceResult<()> {
        if !self.db.links_for_document(&doc.id)?.is_empty() {
            return Ok(());
        }

        let kb_folder = self.knowledge_base_folder(kb)?;
        let file = FileRecord {
            id: Uuid::new_v4().to_string(),
            parent_id: kb_folder.id,
            tenant_id: kb.tenant_id.clone(),
            created_by: kb.tenant_id.clone(),
            name: doc.name.clone(),
            location: doc.location.clone(),
            size: doc.size,
            file_type: doc.doc_type,
            source_type: FileSource::KnowledgeBase,
            created_at: Utc::now(),
        };
        self.db.insert_file(&file)?;
        self.db.insert_file_link(&FileDocumentLink {
            id: Uuid::new_v4().to_string(),
            file_id: file.id,
            document_id: doc.id.clone(),
        })
    }

    /// Store a user file in the general folder tree. The blob lives in a
    /// bucket named after the parent folder.
    pub fn upload_file(
        &self,
        tenant_id: &str,
        parent_id: Option<&str>,
        source: &dyn ContentSource,
    ) -> ServiceResult<FileRecord> {
        let parent = match parent_id {
            Some(id) => self
                .db
                .get_file(id)?
                .filter(FileRecord::is_folder)
                .ok_or_else(|| ServiceError::FileNotFound {
                    file_id: id.to_string(),
                })?,
            None => self.root_folder(tenant_id)?,
        };

        let data = source.read_all()?;
        self.check_size(data.len() as u64)?;

        let name = source.filename().to_string();
        let location = free_location(&name, |key| Ok(self.blobs.exists(&parent.id, key)?))?;
        self.blobs.put(&parent.id, &location, &data)?;

        let file = FileRecord {
            id: Uuid::new_v4().to_string(),
            parent_id: parent.id,
            tenant_id: tenant_id.to_string(),
            created_by: tenant_id.to_string(),
            file_type: filename_type(&name),
            name,
            location,
            size: data.len() as u64,
            source_type: FileSource::Local,
            created_at: Utc::now(),
        };
        self.db.insert_file(&file)?;
        info!(file_id = %file.id, name = %file.name, "Stored user file");
        Ok(file)
    }

    /// Files under a folder, descending into sub-folders
    fn innermost_files(&self, file: FileRecord) -> ServiceResult<Vec<FileRecord>> {
        if !file.is_folder() {
            return Ok(vec![file]);
        }
        let mut found = Vec::new();
        for child in self.db.child_files(&file.id)? {
            found.extend(self.innermost_files(child)?);
        }
        Ok(found)
    }

    /// Turn user files into documents of the given knowledge bases.
    /// Documents previously built from the same files are removed first;
    /// the file blobs themselves stay in place.
    pub fn convert_files(
        &self,
        file_ids: &[String],
        kb_ids: &[String],
        user_id: &str,
    ) -> ServiceResult<Vec<FileDocumentLink>> {
        let mut files = Vec::new();
        for file_id in file_ids {
            let file = self
                .db
                .get_file(file_id)?
                .ok_or_else(|| ServiceError::FileNotFound {
                    file_id: file_id.clone(),
                })?;
            files.extend(self.innermost_files(file)?);
        }

        let kbs = kb_ids
            .iter()
            .map(|kb_id| self.knowledge_base(kb_id))
            .collect::<ServiceResult<Vec<_>>>()?;

        let mut links = Vec::new();
        for file in files {
            for link in self.db.links_for_file(&file.id)? {
                let doc = self.document(&link.document_id)?;
                let tenant_id = self.tenant_id(&doc.id)?;
                self.remove_document_records(&doc, &tenant_id)?;
            }
            self.db.delete_links_for_file(&file.id)?;

            for kb in &kbs {
                let now = Utc::now();
                let doc = Document {
                    id: Uuid::new_v4().to_string(),
                    kb_id: kb.id.clone(),
                    doc_type: file.file_type,
                    parser_id: parser_for(file.file_type, &file.name, &kb.parser_id),
                    parser_config: kb.parser_config.clone(),
                    source_type: DocumentSource::File,
                    created_by: user_id.to_string(),
                    name: file.name.clone(),
                    location: file.location.clone(),
                    size: file.size,
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
                };
                self.db.insert_document(&doc)?;

                let link = FileDocumentLink {
                    id: Uuid::new_v4().to_string(),
                    file_id: file.id.clone(),
                    document_id: doc.id.clone(),
                };
                self.db.insert_file_link(&link)?;
                metrics::counter!("kbflow_documents_created_total", "source" => "file")
                    .increment(1);
                info!(file_id = %file.id, doc_id = %doc.id, kb_id = %kb.id, "Converted file into document");
                links.push(link);
            }
        }

        Ok(links)
    }

    /// Drop the links of the given files and the documents built from them
    pub fn unlink_files(&self, file_ids: &[String]) -> ServiceResult<()> {
        if file_ids.is_empty() {
            return Err(ServiceError::validation("Lack of 'File IDs'"));
        }

        for file_id in file_ids {
            let links = self.db.links_for_file(file_id)?;
            if links.is_empty() {
                return Err(ServiceError::FileNotFound {
                    file_id: file_id.clone(),
                });
            }
            self.db.delete_links_for_file(file_id)?;

            for link in links {
                let doc = self.document(&link.document_id)?;
                let tenant_id = self.tenant_id(&doc.id)?;
                self.remove_document_records(&doc, &tenant_id)?;
                info!(file_id = %file_id, doc_id = %doc.id, "Unlinked file from document");
            }
        }

        Ok(())
    }

    /// Blob address of a document's content: the linked user file's
    /// folder and key, or the KB bucket for KB-private content.
    pub fn storage_address(&self, doc: &Document) -> ServiceResult<(String, String)> {
        for link in self.db.links_for_document(&doc.id)? {
            if let Some(file) = self.db.get_file(&link.file_id)? {
                if file.source_type != FileSource::KnowledgeBase {
                    return Ok((file.parent_id, file.location));
                }
            }
        }
        Ok((doc.kb_id.clone(), doc.location.clone()))
    }
}
