//! Executor liveness and store health reporting.

use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use super::LifecycleService;
use crate::error::{ServiceError, ServiceResult};
use crate::queue::ExecutorHeartbeats;

/// Health of one backing store
#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// `green` or `red`
    pub status: &'static str,
    /// Probe round-trip in milliseconds, one decimal.
    pub elapsed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Overall system status
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub doc_engine: ComponentStatus,
    pub storage: ComponentStatus,
    pub database: ComponentStatus,
    pub queue: ComponentStatus,
    pub task_executors: Vec<ExecutorHeartbeats>,
}

fn probe<E: std::fmt::Display>(
    kind: &'static str,
    check: impl FnOnce() -> Result<(), E>,
) -> ComponentStatus {
    let started = Instant::now();
    let result = check();
    let elapsed = format!("{:.1}", started.elapsed().as_secs_f64() * 1000.0);
    match result {
        Ok(()) => ComponentStatus {
            kind,
            status: "green",
            elapsed,
            error: None,
        },
        Err(e) => {
            warn!(component = kind, error = %e, "Health probe failed");
            ComponentStatus {
                kind,
                status: "red",
                elapsed,
                error: Some(e.to_string()),
            }
        }
    }
}

impl LifecycleService {
    /// Heartbeats of every known executor inside the trailing window.
    /// An executor without heartbeats in the window is reported dead; no
    /// corrective action is taken.
    pub fn report_health(&self) -> ServiceResult<Vec<ExecutorHeartbeats>> {
        let now = Utc::now();
        let from = (now - self.config.heartbeats.window()).timestamp();
        let to = now.timestamp();

        let mut report = Vec::new();
        for executor_id in self.queue.executor_ids()? {
            let heartbeats = self.queue.heartbeats(&executor_id, from, to)?;
            if heartbeats.is_empty() {
                warn!(executor_id = %executor_id, "No recent heartbeats from task executor");
            }
            report.push(ExecutorHeartbeats {
                alive: !heartbeats.is_empty(),
                executor_id,
                heartbeats,
            });
        }
        Ok(report)
    }

    /// Store an executor heartbeat and drop its heartbeats that have left
    /// the reporting window.
    pub fn record_heartbeat(
        &self,
        executor_id: &str,
        ts: Option<i64>,
        payload: &serde_json::Value,
    ) -> ServiceResult<()> {
        if executor_id.is_empty() {
            return Err(ServiceError::validation("Lack of \"executor_id\""));
        }
        let now = Utc::now();
        let ts = ts.unwrap_or_else(|| now.timestamp());
        let keep_from = (now - self.config.heartbeats.window()).timestamp();
        self.db.record_heartbeat(executor_id, ts, payload, keep_from)?;
        debug!(executor_id = %executor_id, ts, "Recorded executor heartbeat");
        Ok(())
    }

    /// Timed health probes of every store plus executor heartbeats
    pub fn system_status(&self) -> SystemStatus {
        let task_executors = self.report_health().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read task executor heartbeats");
            Vec::new()
        });

        SystemStatus {
            doc_engine: probe("memory", || self.index.health()),
            storage: probe("filesystem", || self.blobs.health()),
            database: probe("sqlite", || self.db.ping()),
            queue: probe("sqlite", || self.queue.health()),
            task_executors,
        }
    }
}
