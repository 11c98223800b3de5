//! Background progress sweeper.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::service::LifecycleService;

/// Start the progress sweeper. Every `interval` it folds task progress into
/// document progress until `token` is cancelled. A tick that is already
/// running finishes before the task exits.
pub fn spawn_progress_sweeper(
    service: Arc<LifecycleService>,
    token: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Progress sweeper started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => sweep(&service),
            }
        }

        info!("Progress sweeper stopped");
    })
}

fn sweep(service: &LifecycleService) {
    metrics::counter!("kbflow_progress_sweeps_total").increment(1);
    match service.update_progress() {
        Ok(updated) => debug!(updated, "Progress sweep finished"),
        Err(e) => {
            metrics::counter!("kbflow_progress_sweep_failures_total").increment(1);
            error!(error = %e, "Progress sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::db::RunStatus;
    use crate::service::testing::Harness;

    #[tokio::test]
    async fn sweeper_applies_progress_and_stops_on_cancel() {
        let h = Harness::new();
        let kb = h.kb("K1");
        let doc = h.service.create_virtual(&kb.id, "v.txt", "user-1").unwrap();
        h.service
            .run_documents(&[doc.id.clone()], RunStatus::Running, true)
            .unwrap();
        for task in h.db.tasks_for_document(&doc.id).unwrap() {
            h.db.update_task_progress(&task.id, 1.0, "done").unwrap();
        }

        let Harness { service, db, .. } = h;
        let token = CancellationToken::new();
        let handle = spawn_progress_sweeper(
            Arc::new(service),
            token.clone(),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();

        let doc = db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(doc.run, RunStatus::Done);
    }
}
