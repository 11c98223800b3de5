//! Database schema migrations.
//!
//! This module contains all database migrations and schema setup.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// This function is called during database initialization to ensure
/// the schema is up to date.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        -- Knowledge bases
        CREATE TABLE IF NOT EXISTS knowledgebases (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            parser_id TEXT NOT NULL DEFAULT 'naive',
            parser_config TEXT NOT NULL DEFAULT '{}',
            pagerank INTEGER NOT NULL DEFAULT 0,
            doc_num INTEGER NOT NULL DEFAULT 0,
            token_num INTEGER NOT NULL DEFAULT 0,
            chunk_num INTEGER NOT NULL DEFAULT 0,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_knowledgebases_tenant ON knowledgebases(tenant_id);

        -- Documents
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            kb_id TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            parser_id TEXT NOT NULL,
            parser_config TEXT NOT NULL DEFAULT '{}',
            source_type TEXT NOT NULL DEFAULT 'local',
            created_by TEXT NOT NULL,
            name TEXT NOT NULL,
            location TEXT NOT NULL DEFAULT '',
            size INTEGER NOT NULL DEFAULT 0,
            status INTEGER NOT NULL DEFAULT 1,
            run TEXT NOT NULL DEFAULT 'unstart',
            progress REAL NOT NULL DEFAULT 0,
            progress_msg TEXT NOT NULL DEFAULT '',
            chunk_num INTEGER NOT NULL DEFAULT 0,
            token_num INTEGER NOT NULL DEFAULT 0,
            process_begin_at TEXT,
            process_duration REAL NOT NULL DEFAULT 0,
            meta_fields TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_kb ON documents(kb_id);
        CREATE INDEX IF NOT EXISTS idx_documents_run ON documents(run);

        -- Parse tasks
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            from_page INTEGER NOT NULL DEFAULT 0,
            to_page INTEGER NOT NULL DEFAULT 100000000,
            progress REAL NOT NULL DEFAULT 0,
            progress_msg TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_doc ON tasks(doc_id);

        -- Virtual file tree
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            parent_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            created_by TEXT NOT NULL,
            name TEXT NOT NULL,
            location TEXT NOT NULL DEFAULT '',
            size INTEGER NOT NULL DEFAULT 0,
            file_type TEXT NOT NULL,
            source_type TEXT NOT NULL DEFAULT 'local',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_files_parent ON files(parent_id);

        CREATE TABLE IF NOT EXISTS file2document (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            document_id TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_file2document_file ON file2document(file_id);
        CREATE INDEX IF NOT EXISTS idx_file2document_document ON file2document(document_id);

        -- Durable work queue consumed by task executors
        CREATE TABLE IF NOT EXISTS task_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            enqueued_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_task_queue_task ON task_queue(task_id);

        -- Executor liveness channel
        CREATE TABLE IF NOT EXISTS task_executors (
            executor_id TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS executor_heartbeats (
            executor_id TEXT NOT NULL,
            ts INTEGER NOT NULL,
            payload TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_executor_heartbeats ON executor_heartbeats(executor_id, ts);
        "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    Ok(())
}
