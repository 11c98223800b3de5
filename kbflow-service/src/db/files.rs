//! Virtual file tree and file-to-document links.

use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::{FileDocumentLink, FileRecord, FileSource, FileType};
use crate::error::{DatabaseError, ServiceResult};

const FILE_COLUMNS: &str =
    "id, parent_id, tenant_id, created_by, name, location, size, file_type, source_type, created_at";

impl Database {
    /// Insert a file or folder
    pub fn insert_file(&self, file: &FileRecord) -> ServiceResult<()> {
        let conn = self.conn();

        conn.execute(
            &format!("INSERT INTO files ({FILE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                file.id,
                file.parent_id,
                file.tenant_id,
                file.created_by,
                file.name,
                file.location,
                file.size as i64,
                file.file_type.as_str(),
                file.source_type.as_str(),
                file.created_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a file by ID
    pub fn get_file(&self, id: &str) -> ServiceResult<Option<FileRecord>> {
        let conn = self.conn();

        conn.query_row(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
            params![id],
            FileRecord::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// A tenant's root folder (the folder that is its own parent)
    pub fn root_folder(&self, tenant_id: &str) -> ServiceResult<Option<FileRecord>> {
        let conn = self.conn();

        conn.query_row(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE tenant_id = ?1 AND id = parent_id"),
            params![tenant_id],
            FileRecord::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Child of a folder with the given name
    pub fn find_child_file(&self, parent_id: &str, name: &str) -> ServiceResult<Option<FileRecord>> {
        let conn = self.conn();

        conn.query_row(
            &format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE parent_id = ?1 AND name = ?2 AND id != parent_id"
            ),
            params![parent_id, name],
            FileRecord::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Direct children of a folder
    pub fn child_files(&self, parent_id: &str) -> ServiceResult<Vec<FileRecord>> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE parent_id = ?1 AND id != parent_id ORDER BY name"
            ))
            .map_err(DatabaseError::Query)?;
        let rows = stmt
            .query_map(params![parent_id], FileRecord::from_row)
            .map_err(DatabaseError::Query)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(files)
    }

    /// Rename a file
    pub fn rename_file(&self, id: &str, name: &str) -> ServiceResult<bool> {
        self.execute_update(
            "UPDATE files SET name = ?1 WHERE id = ?2",
            params![name, id],
        )
    }

    /// Delete a file only if it is private to a knowledge base
    pub fn delete_knowledge_base_file(&self, id: &str) -> ServiceResult<bool> {
        self.execute_update(
            "DELETE FROM files WHERE id = ?1 AND source_type = ?2",
            params![id, FileSource::KnowledgeBase.as_str()],
        )
    }

    /// Delete a knowledge base's private folder
    pub fn delete_knowledge_base_folder(&self, tenant_id: &str, name: &str) -> ServiceResult<bool> {
        self.execute_update(
            "DELETE FROM files WHERE tenant_id = ?1 AND name = ?2 AND source_type = ?3 AND file_type = ?4",
            params![
                tenant_id,
                name,
                FileSource::KnowledgeBase.as_str(),
                FileType::Folder.as_str()
            ],
        )
    }

    /// Link a file to a document
    pub fn insert_file_link(&self, link: &FileDocumentLink) -> ServiceResult<()> {
        let conn = self.conn();

        conn.execute(
            "INSERT INTO file2document (id, file_id, document_id) VALUES (?1, ?2, ?3)",
            params![link.id, link.file_id, link.document_id],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Links pointing at a document
    pub fn links_for_document(&self, document_id: &str) -> ServiceResult<Vec<FileDocumentLink>> {
        self.query_links(
            "SELECT id, file_id, document_id FROM file2document WHERE document_id = ?1",
            document_id,
        )
    }

    /// Links originating from a file
    pub fn links_for_file(&self, file_id: &str) -> ServiceResult<Vec<FileDocumentLink>> {
        self.query_links(
            "SELECT id, file_id, document_id FROM file2document WHERE file_id = ?1",
            file_id,
        )
    }

    /// Delete all links of a document
    pub fn delete_links_for_document(&self, document_id: &str) -> ServiceResult<bool> {
        self.execute_update(
            "DELETE FROM file2document WHERE document_id = ?1",
            params![document_id],
        )
    }

    /// Delete all links of a file
    pub fn delete_links_for_file(&self, file_id: &str) -> ServiceResult<bool> {
        self.execute_update(
            "DELETE FROM file2document WHERE file_id = ?1",
            params![file_id],
        )
    }

    fn query_links(&self, sql: &str, id: &str) -> ServiceResult<Vec<FileDocumentLink>> {
        let conn = self.conn();

        let mut stmt = conn.prepare(sql).map_err(DatabaseError::Query)?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok(FileDocumentLink {
                    id: row.get(0)?,
                    file_id: row.get(1)?,
                    document_id: row.get(2)?,
                })
            })
            .map_err(DatabaseError::Query)?;

        let mut links = Vec::new();
        for row in rows {
            links.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(links)
    }
}
