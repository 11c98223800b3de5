//! Aggregating task progress into document progress.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, warn};

use super::LifecycleService;
use crate::db::{Document, ProgressUpdate, RunStatus, Task};
use crate::error::ServiceResult;

/// Combine a document's task progress into one update.
///
/// Progress is the mean of the non-negative task values. Once every task is
/// finished (at 1 or failed at -1) the run ends: `fail` with progress -1 if
/// any task failed, `done` otherwise. Returns `None` when there are no tasks.
pub(crate) fn aggregate(doc: &Document, tasks: &[Task]) -> Option<ProgressUpdate> {
    if tasks.is_empty() {
        return None;
    }

    let mut finished = true;
    let mut failed = false;
    let mut total = 0.0;
    let mut messages = BTreeSet::new();

    for task in tasks {
        if (0.0..1.0).contains(&task.progress) {
            finished = false;
        }
        if task.progress >= 0.0 {
            total += task.progress;
        }
        if task.progress == -1.0 {
            failed = true;
        }
        if !task.progress_msg.is_empty() {
            messages.insert(task.progress_msg.as_str());
        }
    }

    let mut progress = total / tasks.len() as f64;
    let mut run = doc.run;
    if finished && failed {
        progress = -1.0;
        run = RunStatus::Fail;
    } else if finished {
        run = RunStatus::Done;
    }

    let progress_msg = messages.into_iter().collect::<Vec<_>>().join("\n");
    let process_duration = doc
        .process_begin_at
        .map(|begin| (Utc::now() - begin).num_milliseconds() as f64 / 1000.0)
        .unwrap_or(doc.process_duration);

    Some(ProgressUpdate {
        progress: if progress != 0.0 { progress } else { doc.progress },
        progress_msg: if progress_msg.is_empty() {
            doc.progress_msg.clone()
        } else {
            progress_msg
        },
        run,
        process_duration,
    })
}

impl LifecycleService {
    /// Recompute progress of every in-flight document from its tasks.
    /// A failing document is logged and skipped. Returns the number of
    /// documents updated.
    pub fn update_progress(&self) -> ServiceResult<usize> {
        let docs = self.db.unfinished_documents()?;
        metrics::gauge!("kbflow_documents_in_flight").set(docs.len() as f64);

        let mut updated = 0;
        for doc in docs {
            match self.update_document_progress(&doc) {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(doc_id = %doc.id, error = %e, "Failed to aggregate task progress");
                }
            }
        }

        Ok(updated)
    }

    fn update_document_progress(&self, doc: &Document) -> ServiceResult<bool> {
        let tasks = self.db.tasks_for_document(&doc.id)?;
        let Some(update) = aggregate(doc, &tasks) else {
            return Ok(false);
        };

        if !self.db.update_document_progress(&doc.id, &update)? {
            debug!(doc_id = %doc.id, "Run left the running state, progress not written");
            return Ok(false);
        }
        debug!(
            doc_id = %doc.id,
            progress = update.progress,
            run = %update.run.as_str(),
            "Updated document progress"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::Harness;

    fn running_doc(h: &Harness) -> Document {
        let kb = h.kb("K1");
        let doc = h.service.create_virtual(&kb.id, "v.txt", "user-1").unwrap();
        h.service
            .run_documents(&[doc.id.clone()], RunStatus::Running, true)
            .unwrap();
        h.service.document(&doc.id).unwrap()
    }

    fn task(progress: f64, msg: &str) -> Task {
        let now = Utc::now();
        Task {
            id: uuid::Uuid::new_v4().to_string(),
            doc_id: "d1".to_string(),
            from_page: 0,
            to_page: 10,
            progress,
            progress_msg: msg.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn aggregate_averages_and_joins_sorted_messages() {
        let h = Harness::new();
        let doc = running_doc(&h);
        let update = aggregate(&doc, &[task(0.5, "b"), task(1.0, "a"), task(0.0, "b")]).unwrap();

        assert!((update.progress - 0.5).abs() < 1e-9);
        assert_eq!(update.progress_msg, "a\nb");
        assert_eq!(update.run, RunStatus::Running);
    }

    #[test]
    fn aggregate_marks_done_and_fail() {
        let h = Harness::new();
        let doc = running_doc(&h);

        let done = aggregate(&doc, &[task(1.0, ""), task(1.0, "")]).unwrap();
        assert_eq!((done.run, done.progress), (RunStatus::Done, 1.0));

        let failed = aggregate(&doc, &[task(1.0, ""), task(-1.0, "boom")]).unwrap();
        assert_eq!((failed.run, failed.progress), (RunStatus::Fail, -1.0));
        assert_eq!(failed.progress_msg, "boom");

        assert!(aggregate(&doc, &[]).is_none());
    }

    #[test]
    fn update_progress_is_idempotent() {
        let h = Harness::new();
        let doc = running_doc(&h);
        let tasks = h.db.tasks_for_document(&doc.id).unwrap();
        h.db.update_task_progress(&tasks[0].id, 0.4, "parsing")
            .unwrap();

        assert_eq!(h.service.update_progress().unwrap(), 1);
        let first = h.service.document(&doc.id).unwrap();
        assert_eq!(h.service.update_progress().unwrap(), 1);
        let second = h.service.document(&doc.id).unwrap();

        assert!((first.progress - 0.4).abs() < 1e-9);
        assert_eq!(first.progress, second.progress);
        assert_eq!(first.progress_msg, second.progress_msg);
        assert_eq!(second.run, RunStatus::Running);
    }

    #[test]
    fn finished_tasks_complete_the_run() {
        let h = Harness::new();
        let doc = running_doc(&h);
        for task in h.db.tasks_for_document(&doc.id).unwrap() {
            h.db.update_task_progress(&task.id, 1.0, "done").unwrap();
        }

        h.service.update_progress().unwrap();
        let doc = h.service.document(&doc.id).unwrap();
        assert_eq!(doc.run, RunStatus::Done);
        assert_eq!(doc.progress, 1.0);

        // Finished documents are no longer swept.
        assert_eq!(h.service.update_progress().unwrap(), 0);
    }

    #[test]
    fn cancelled_run_is_not_overwritten_by_stale_snapshot() {
        let h = Harness::new();
        let snapshot = running_doc(&h);
        for task in h.db.tasks_for_document(&snapshot.id).unwrap() {
            h.db.update_task_progress(&task.id, 1.0, "done").unwrap();
        }

        h.service
            .run_documents(&[snapshot.id.clone()], RunStatus::Cancelled, false)
            .unwrap();
        assert!(!h.service.update_document_progress(&snapshot).unwrap());

        let doc = h.service.document(&snapshot.id).unwrap();
        assert_eq!(doc.run, RunStatus::Cancelled);
        assert_eq!(doc.progress, 0.0);
    }
}
