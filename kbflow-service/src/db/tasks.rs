//! Parse task operations.

use rusqlite::{OptionalExtension, params};

use super::models::Task;
use super::{Database, now_rfc3339};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Insert a new task
    pub fn insert_task(&self, task: &Task) -> ServiceResult<()> {
        let conn = self.conn();

        conn.execute(
            "INSERT INTO tasks (id, doc_id, from_page, to_page, progress, progress_msg, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                task.id,
                task.doc_id,
                task.from_page,
                task.to_page,
                task.progress,
                task.progress_msg,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a task by ID
    pub fn get_task(&self, id: &str) -> ServiceResult<Option<Task>> {
        let conn = self.conn();

        conn.query_row(
            "SELECT id, doc_id, from_page, to_page, progress, progress_msg, created_at, updated_at \
             FROM tasks WHERE id = ?1",
            params![id],
            Task::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// All tasks of a document, in page order
    pub fn tasks_for_document(&self, doc_id: &str) -> ServiceResult<Vec<Task>> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(
                "SELECT id, doc_id, from_page, to_page, progress, progress_msg, created_at, updated_at \
                 FROM tasks WHERE doc_id = ?1 ORDER BY from_page, created_at",
            )
            .map_err(DatabaseError::Query)?;
        let rows = stmt
            .query_map(params![doc_id], Task::from_row)
            .map_err(DatabaseError::Query)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(tasks)
    }

    /// Delete every task of a document together with its unclaimed queue
    /// messages, returning how many tasks were removed
    pub fn delete_tasks_for_document(&self, doc_id: &str) -> ServiceResult<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        tx.execute(
            "DELETE FROM task_queue WHERE task_id IN (SELECT id FROM tasks WHERE doc_id = ?1)",
            params![doc_id],
        )
        .map_err(DatabaseError::Query)?;
        let removed = tx
            .execute("DELETE FROM tasks WHERE doc_id = ?1", params![doc_id])
            .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(removed)
    }

    /// Record progress reported by an executor for one task.
    /// `progress` of -1 marks the task as failed.
    pub fn update_task_progress(
        &self,
        task_id: &str,
        progress: f64,
        progress_msg: &str,
    ) -> ServiceResult<bool> {
        self.execute_update(
            "UPDATE tasks SET progress = ?1, progress_msg = ?2, updated_at = ?3 WHERE id = ?4",
            params![progress, progress_msg, now_rfc3339(), task_id],
        )
    }
}
