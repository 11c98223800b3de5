//! Task queue contract shared with the task executors.
//!
//! The lifecycle service produces work, hands it out to executors that
//! claim it over the API, and observes executor liveness. Parsing itself is
//! the executors' job.

use serde::{Deserialize, Serialize};

use crate::db::{Document, Task};
use crate::error::QueueError;

/// Payload handed to an executor for one parse task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    #[serde(flatten)]
    pub task: Task,
    /// Snapshot of the document at enqueue time.
    pub doc: Document,
    pub tenant_id: String,
    /// Blob address of the document content.
    pub bucket: String,
    pub name: String,
}

/// Heartbeats reported by one executor inside the reporting window.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorHeartbeats {
    pub executor_id: String,
    /// False when the window holds no heartbeat at all.
    pub alive: bool,
    pub heartbeats: Vec<serde_json::Value>,
}

/// Durable work queue plus the executor heartbeat channel.
pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, message: &TaskMessage) -> Result<(), QueueError>;

    /// Remove and return the oldest waiting message.
    fn claim(&self) -> Result<Option<TaskMessage>, QueueError>;

    /// Every executor that has ever registered.
    fn executor_ids(&self) -> Result<Vec<String>, QueueError>;

    /// Heartbeat payloads of `executor_id` with `from <= ts <= to`
    /// (unix seconds), oldest first.
    fn heartbeats(
        &self,
        executor_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<serde_json::Value>, QueueError>;

    fn health(&self) -> Result<(), QueueError>;
}
