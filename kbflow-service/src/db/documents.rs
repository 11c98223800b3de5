//! Document CRUD operations.
//!
//! Besides plain row access this module keeps the knowledge base aggregate
//! counters (`doc_num`, `token_num`, `chunk_num`) in step with document rows.

use rusqlite::{OptionalExtension, params};

use super::models::{DOCUMENT_COLUMNS, Document, RunStatus};
use super::{Database, now_rfc3339};
use crate::error::{DatabaseError, ServiceResult};

/// Field reset applied when a document is (re)started or stopped.
#[derive(Debug, Clone, Copy)]
pub struct RunReset {
    pub run: RunStatus,
    /// Also clears `progress_msg`, `chunk_num` and `token_num`.
    pub clear_history: bool,
}

/// Aggregate progress written back by the progress sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub progress_msg: String,
    pub run: RunStatus,
    pub process_duration: f64,
}

impl Database {
    /// Insert a new document and bump its knowledge base's `doc_num`
    pub fn insert_document(&self, doc: &Document) -> ServiceResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        tx.execute(
            r#"
            INSERT INTO documents (id, kb_id, doc_type, parser_id, parser_config, source_type, created_by, name, location, size, status, run, progress, progress_msg, chunk_num, token_num, process_begin_at, process_duration, meta_fields, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
            "#,
            params![
                doc.id,
                doc.kb_id,
                doc.doc_type.as_str(),
                doc.parser_id,
                doc.parser_config.to_string(),
                doc.source_type.as_str(),
                doc.created_by,
                doc.name,
                doc.location,
                doc.size as i64,
                doc.enabled as i64,
                doc.run.as_str(),
                doc.progress,
                doc.progress_msg,
                doc.chunk_num,
                doc.token_num,
                doc.process_begin_at.map(|t| t.to_rfc3339()),
                doc.process_duration,
                doc.meta_fields.to_string(),
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        tx.execute(
            "UPDATE knowledgebases SET doc_num = doc_num + 1, updated_at = ?1 WHERE id = ?2",
            params![now_rfc3339(), doc.kb_id],
        )
        .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(())
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn();

        conn.query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
            params![id],
            Document::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// List all documents in a knowledge base, oldest first
    pub fn list_documents(&self, kb_id: &str) -> ServiceResult<Vec<Document>> {
        self.query_documents(
            &format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE kb_id = ?1 ORDER BY created_at"
            ),
            params![kb_id],
        )
    }

    /// Documents in a knowledge base whose name matches case-insensitively
    pub fn find_documents_by_name(&self, kb_id: &str, name: &str) -> ServiceResult<Vec<Document>> {
        self.query_documents(
            &format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE kb_id = ?1 AND name = ?2 COLLATE NOCASE"
            ),
            params![kb_id, name],
        )
    }

    /// Whether a document with exactly this name exists in the knowledge base
    pub fn document_name_exists(&self, kb_id: &str, name: &str) -> ServiceResult<bool> {
        Ok(self
            .find_documents_by_name(kb_id, name)?
            .iter()
            .any(|d| d.name == name))
    }

    /// Documents the progress sweep still has to aggregate
    pub fn unfinished_documents(&self) -> ServiceResult<Vec<Document>> {
        self.query_documents(
            &format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents \
                 WHERE run = ?1 AND progress >= 0 AND progress < 1 ORDER BY created_at"
            ),
            params![RunStatus::Running.as_str()],
        )
    }

    /// Tenant owning a document, resolved through its knowledge base
    pub fn get_tenant_id(&self, doc_id: &str) -> ServiceResult<Option<String>> {
        let conn = self.conn();

        conn.query_row(
            "SELECT kb.tenant_id FROM documents d JOIN knowledgebases kb ON kb.id = d.kb_id WHERE d.id = ?1",
            params![doc_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Number of documents across all of a tenant's knowledge bases
    pub fn count_tenant_documents(&self, tenant_id: &str) -> ServiceResult<i64> {
        let conn = self.conn();

        conn.query_row(
            "SELECT COUNT(*) FROM documents d JOIN knowledgebases kb ON kb.id = d.kb_id WHERE kb.tenant_id = ?1",
            params![tenant_id],
            |row| row.get(0),
        )
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Rename a document
    pub fn rename_document(&self, doc_id: &str, name: &str) -> ServiceResult<bool> {
        self.execute_update(
            "UPDATE documents SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![name, now_rfc3339(), doc_id],
        )
    }

    /// Switch parser and reset the document to an unparsed state
    pub fn update_document_parser(
        &self,
        doc_id: &str,
        parser_id: &str,
        parser_config: Option<&serde_json::Value>,
    ) -> ServiceResult<bool> {
        let now = now_rfc3339();
        match parser_config {
            Some(config) => self.execute_update(
                "UPDATE documents SET parser_id = ?1, parser_config = ?2, progress = 0, progress_msg = '', run = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    parser_id,
                    config.to_string(),
                    RunStatus::Unstart.as_str(),
                    now,
                    doc_id
                ],
            ),
            None => self.execute_update(
                "UPDATE documents SET parser_id = ?1, progress = 0, progress_msg = '', run = ?2, updated_at = ?3 WHERE id = ?4",
                params![parser_id, RunStatus::Unstart.as_str(), now, doc_id],
            ),
        }
    }

    /// Enable or disable a document
    pub fn update_document_status(&self, doc_id: &str, enabled: bool) -> ServiceResult<bool> {
        self.execute_update(
            "UPDATE documents SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled as i64, now_rfc3339(), doc_id],
        )
    }

    /// Replace user metadata fields
    pub fn update_document_meta(
        &self,
        doc_id: &str,
        meta: &serde_json::Value,
    ) -> ServiceResult<bool> {
        self.execute_update(
            "UPDATE documents SET meta_fields = ?1, updated_at = ?2 WHERE id = ?3",
            params![meta.to_string(), now_rfc3339(), doc_id],
        )
    }

    /// Set the run state, zero progress and optionally clear parse history.
    /// Entering `running` also stamps `process_begin_at`.
    pub fn reset_document_run(&self, doc_id: &str, reset: RunReset) -> ServiceResult<bool> {
        let now = now_rfc3339();
        let begin_at = (reset.run == RunStatus::Running).then(|| now.clone());
        let clear = reset.run == RunStatus::Running && reset.clear_history;

        self.execute_update(
            "UPDATE documents SET run = ?1, progress = 0, \
             progress_msg = CASE WHEN ?2 THEN '' ELSE progress_msg END, \
             chunk_num = CASE WHEN ?2 THEN 0 ELSE chunk_num END, \
             token_num = CASE WHEN ?2 THEN 0 ELSE token_num END, \
             process_begin_at = COALESCE(?3, process_begin_at), \
             updated_at = ?4 WHERE id = ?5",
            params![reset.run.as_str(), clear, begin_at, now, doc_id],
        )
    }

    /// Write aggregated task progress back into the document row. Only a
    /// document that is still `running` is touched, so a run stopped after
    /// the progress was computed keeps its state.
    pub fn update_document_progress(
        &self,
        doc_id: &str,
        update: &ProgressUpdate,
    ) -> ServiceResult<bool> {
        self.execute_update(
            "UPDATE documents SET progress = ?1, progress_msg = ?2, run = ?3, process_duration = ?4, updated_at = ?5 \
             WHERE id = ?6 AND run = ?7",
            params![
                update.progress,
                update.progress_msg,
                update.run.as_str(),
                update.process_duration,
                now_rfc3339(),
                doc_id,
                RunStatus::Running.as_str()
            ],
        )
    }

    /// Apply token/chunk/duration deltas to a document and its knowledge base
    pub fn increment_chunk_num(
        &self,
        doc_id: &str,
        kb_id: &str,
        token_delta: i64,
        chunk_delta: i64,
        duration_delta: f64,
    ) -> ServiceResult<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;
        let now = now_rfc3339();

        let rows = tx
            .execute(
                "UPDATE documents SET token_num = token_num + ?1, chunk_num = chunk_num + ?2, process_duration = process_duration + ?3, updated_at = ?4 WHERE id = ?5",
                params![token_delta, chunk_delta, duration_delta, now, doc_id],
            )
            .map_err(DatabaseError::Query)?;

        if rows == 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE knowledgebases SET token_num = token_num + ?1, chunk_num = chunk_num + ?2, updated_at = ?3 WHERE id = ?4",
            params![token_delta, chunk_delta, now, kb_id],
        )
        .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(true)
    }

    /// Delete a document row and withdraw its contribution from the
    /// knowledge base counters
    pub fn remove_document(&self, doc: &Document) -> ServiceResult<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let rows = tx
            .execute("DELETE FROM documents WHERE id = ?1", params![doc.id])
            .map_err(DatabaseError::Query)?;

        if rows == 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE knowledgebases SET doc_num = doc_num - 1, token_num = token_num - ?1, chunk_num = chunk_num - ?2, updated_at = ?3 WHERE id = ?4",
            params![doc.token_num, doc.chunk_num, now_rfc3339(), doc.kb_id],
        )
        .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(true)
    }

    fn query_documents(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> ServiceResult<Vec<Document>> {
        let conn = self.conn();

        let mut stmt = conn.prepare(sql).map_err(DatabaseError::Query)?;
        let rows = stmt
            .query_map(params, Document::from_row)
            .map_err(DatabaseError::Query)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(docs)
    }

    pub(super) fn execute_update(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> ServiceResult<bool> {
        let conn = self.conn();
        let rows = conn.execute(sql, params).map_err(DatabaseError::Query)?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{DocumentSource, FileType, KnowledgeBase};
    use chrono::Utc;

    fn knowledge_base(id: &str) -> KnowledgeBase {
        let now = Utc::now();
        KnowledgeBase {
            id: id.to_string(),
            tenant_id: "tenant-1".to_string(),
            name: format!("kb {id}"),
            description: String::new(),
            parser_id: "naive".to_string(),
            parser_config: serde_json::json!({}),
            pagerank: 0,
            doc_num: 0,
            token_num: 0,
            chunk_num: 0,
            created_by: "tenant-1".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn document(id: &str, kb_id: &str, name: &str) -> Document {
        let now = Utc::now();
        Document {
            id: id.to_string(),
            kb_id: kb_id.to_string(),
            doc_type: FileType::Text,
            parser_id: "naive".to_string(),
            parser_config: serde_json::json!({}),
            source_type: DocumentSource::Local,
            created_by: "tenant-1".to_string(),
            name: name.to_string(),
            location: name.to_string(),
            size: 10,
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

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.insert_knowledge_base(&knowledge_base("kb1")).unwrap();
        db
    }

    #[test]
    fn insert_increments_doc_num_and_remove_reverses_counters() {
        let db = setup();
        db.insert_document(&document("d1", "kb1", "a.txt")).unwrap();
        db.increment_chunk_num("d1", "kb1", 100, 4, 1.5).unwrap();

        let kb = db.get_knowledge_base("kb1").unwrap().unwrap();
        assert_eq!((kb.doc_num, kb.token_num, kb.chunk_num), (1, 100, 4));

        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.token_num, 100);
        assert!(db.remove_document(&doc).unwrap());

        let kb = db.get_knowledge_base("kb1").unwrap().unwrap();
        assert_eq!((kb.doc_num, kb.token_num, kb.chunk_num), (0, 0, 0));
        assert!(db.get_document("d1").unwrap().is_none());
    }

    #[test]
    fn name_lookup_is_case_insensitive_but_existence_is_exact() {
        let db = setup();
        db.insert_document(&document("d1", "kb1", "Report.PDF")).unwrap();

        assert_eq!(db.find_documents_by_name("kb1", "report.pdf").unwrap().len(), 1);
        assert!(!db.document_name_exists("kb1", "report.pdf").unwrap());
        assert!(db.document_name_exists("kb1", "Report.PDF").unwrap());
    }

    #[test]
    fn reset_run_with_history_clears_counts() {
        let db = setup();
        let mut doc = document("d1", "kb1", "a.txt");
        doc.progress_msg = "old".to_string();
        doc.chunk_num = 3;
        doc.token_num = 30;
        db.insert_document(&doc).unwrap();

        db.reset_document_run(
            "d1",
            RunReset {
                run: RunStatus::Running,
                clear_history: true,
            },
        )
        .unwrap();

        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.run, RunStatus::Running);
        assert_eq!(doc.progress, 0.0);
        assert_eq!(doc.progress_msg, "");
        assert_eq!((doc.chunk_num, doc.token_num), (0, 0));
        assert!(doc.process_begin_at.is_some());
    }

    #[test]
    fn reset_run_without_history_keeps_counts() {
        let db = setup();
        let mut doc = document("d1", "kb1", "a.txt");
        doc.chunk_num = 3;
        db.insert_document(&doc).unwrap();

        db.reset_document_run(
            "d1",
            RunReset {
                run: RunStatus::Cancelled,
                clear_history: true,
            },
        )
        .unwrap();

        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.run, RunStatus::Cancelled);
        assert_eq!(doc.chunk_num, 3);
        assert!(doc.process_begin_at.is_none());
    }

    #[test]
    fn unfinished_documents_only_include_running_in_flight() {
        let db = setup();
        db.insert_document(&document("d1", "kb1", "a.txt")).unwrap();
        db.insert_document(&document("d2", "kb1", "b.txt")).unwrap();
        db.reset_document_run(
            "d1",
            RunReset {
                run: RunStatus::Running,
                clear_history: false,
            },
        )
        .unwrap();

        let unfinished = db.unfinished_documents().unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, "d1");
        assert_eq!(db.get_tenant_id("d1").unwrap().as_deref(), Some("tenant-1"));
    }
}
