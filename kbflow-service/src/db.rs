//! Metadata store backed by SQLite.
//!
//! This module provides the `Database` struct and all metadata operations
//! organized into submodules by entity. The same database also backs the
//! task queue and the executor heartbeat channel (see `queue`).

mod documents;
mod files;
mod knowledgebases;
mod migrations;
pub mod models;
mod queue;
mod tasks;

pub use documents::{ProgressUpdate, RunReset};
pub use knowledgebases::{KnowledgeBaseOrder, KnowledgeBaseQuery};
pub use models::{
    Document, DocumentSource, FileDocumentLink, FileRecord, FileSource, FileType, KnowledgeBase,
    ParserType, RunStatus, Task,
};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{DatabaseError, ServiceError, ServiceResult};

/// Database manager for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> ServiceResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ServiceError::Database(DatabaseError::Connection(
                    rusqlite::Error::ToSqlConversionFailure(Box::new(e)),
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(DatabaseError::Connection)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;

        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    #[cfg(test)]
    pub fn open_in_memory() -> ServiceResult<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Connection)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> ServiceResult<Self> {
        // Run all migrations
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection. A panic while holding the lock cannot leave a
    /// half-applied statement behind, so poisoning is ignored.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cheap round-trip used by status reporting.
    pub fn ping(&self) -> ServiceResult<()> {
        let conn = self.conn();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(DatabaseError::Query)?;
        Ok(())
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
