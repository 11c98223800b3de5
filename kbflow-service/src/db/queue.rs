//! SQLite-backed task queue and heartbeat channel.

use rusqlite::{OptionalExtension, params};

use super::{Database, now_rfc3339};
use crate::error::{QueueError, ServiceResult};
use crate::queue::{TaskMessage, TaskQueue};

impl TaskQueue for Database {
    fn enqueue(&self, message: &TaskMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message).map_err(QueueError::Payload)?;
        let conn = self.conn();

        conn.execute(
            "INSERT INTO task_queue (task_id, payload, enqueued_at) VALUES (?1, ?2, ?3)",
            params![message.task.id, payload, now_rfc3339()],
        )
        .map_err(QueueError::Storage)?;

        Ok(())
    }

    fn claim(&self) -> Result<Option<TaskMessage>, QueueError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(QueueError::Storage)?;

        let head: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, payload FROM task_queue ORDER BY seq LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(QueueError::Storage)?;
        let Some((seq, payload)) = head else {
            return Ok(None);
        };
        tx.execute("DELETE FROM task_queue WHERE seq = ?1", params![seq])
            .map_err(QueueError::Storage)?;
        tx.commit().map_err(QueueError::Storage)?;

        // An unreadable message is dropped rather than blocking the queue head.
        let message = serde_json::from_str(&payload).map_err(QueueError::Payload)?;
        Ok(Some(message))
    }

    fn executor_ids(&self) -> Result<Vec<String>, QueueError> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare("SELECT executor_id FROM task_executors ORDER BY executor_id")
            .map_err(QueueError::Storage)?;
        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(QueueError::Storage)?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(QueueError::Storage)?);
        }

        Ok(ids)
    }

    fn heartbeats(
        &self,
        executor_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<serde_json::Value>, QueueError> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(
                "SELECT payload FROM executor_heartbeats \
                 WHERE executor_id = ?1 AND ts >= ?2 AND ts <= ?3 ORDER BY ts",
            )
            .map_err(QueueError::Storage)?;
        let rows = stmt
            .query_map(params![executor_id, from, to], |row| row.get::<_, String>(0))
            .map_err(QueueError::Storage)?;

        let mut beats = Vec::new();
        for row in rows {
            let payload = row.map_err(QueueError::Storage)?;
            beats.push(serde_json::from_str(&payload).map_err(QueueError::Payload)?);
        }

        Ok(beats)
    }

    fn health(&self) -> Result<(), QueueError> {
        let conn = self.conn();
        conn.query_row("SELECT COUNT(*) FROM task_queue", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(QueueError::Storage)?;
        Ok(())
    }
}

impl Database {
    /// Append a heartbeat for an executor, registering it on first sight.
    /// Heartbeats of that executor older than `keep_from` are dropped.
    pub fn record_heartbeat(
        &self,
        executor_id: &str,
        ts: i64,
        payload: &serde_json::Value,
        keep_from: i64,
    ) -> ServiceResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(QueueError::Storage)?;

        tx.execute(
            "INSERT OR IGNORE INTO task_executors (executor_id) VALUES (?1)",
            params![executor_id],
        )
        .map_err(QueueError::Storage)?;
        tx.execute(
            "INSERT INTO executor_heartbeats (executor_id, ts, payload) VALUES (?1, ?2, ?3)",
            params![executor_id, ts, payload.to_string()],
        )
        .map_err(QueueError::Storage)?;
        tx.execute(
            "DELETE FROM executor_heartbeats WHERE executor_id = ?1 AND ts < ?2",
            params![executor_id, keep_from],
        )
        .map_err(QueueError::Storage)?;

        tx.commit().map_err(QueueError::Storage)?;
        Ok(())
    }

    /// Number of messages waiting in the queue
    #[cfg(test)]
    pub fn queued_task_count(&self) -> ServiceResult<i64> {
        let conn = self.conn();
        conn.query_row("SELECT COUNT(*) FROM task_queue", [], |row| row.get(0))
            .map_err(QueueError::Storage)
            .map_err(Into::into)
    }
}
