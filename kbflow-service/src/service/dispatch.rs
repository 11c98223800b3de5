//! Turning run requests into queued parse tasks.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::LifecycleService;
use crate::db::{Document, RunReset, RunStatus, Task};
use crate::error::{ServiceError, ServiceResult};
use crate::queue::TaskMessage;

/// Upper page bound used when a document does not restrict its pages.
pub(crate) const MAX_PAGE: i64 = 100_000;

/// Page windows `[from, to)` to parse, zero-based.
///
/// `parser_config.pages` holds one-based inclusive `[start, end]` pairs and
/// defaults to the whole document. A positive `task_page_size` splits each
/// range into windows of that many pages.
pub(crate) fn page_windows(parser_config: &serde_json::Value) -> ServiceResult<Vec<(i64, i64)>> {
    let ranges = match parser_config.get("pages") {
        None | Some(serde_json::Value::Null) => vec![(1, MAX_PAGE)],
        Some(serde_json::Value::Array(items)) if items.is_empty() => vec![(1, MAX_PAGE)],
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| match item.as_array().map(Vec::as_slice) {
                Some([start, end]) => match (start.as_i64(), end.as_i64()) {
                    (Some(s), Some(e)) => Ok((s, e)),
                    _ => Err(ServiceError::validation("Page range bounds must be integers")),
                },
                _ => Err(ServiceError::validation(
                    "Page ranges must be [start, end] pairs",
                )),
            })
            .collect::<ServiceResult<Vec<_>>>()?,
        Some(_) => return Err(ServiceError::validation("`pages` must be a list")),
    };

    let page_size = parser_config
        .get("task_page_size")
        .and_then(serde_json::Value::as_i64)
        .filter(|size| *size > 0);

    let mut windows = Vec::new();
    for (start, end) in ranges {
        let from = (start - 1).max(0);
        let to = end.min(MAX_PAGE);
        if to <= from {
            continue;
        }
        match page_size {
            Some(size) => {
                let mut page = from;
                while page < to {
                    windows.push((page, (page + size).min(to)));
                    page += size;
                }
            }
            None => windows.push((from, to)),
        }
    }
    Ok(windows)
}

impl LifecycleService {
    /// Set the run state of documents and, when starting them, queue parse
    /// work. Stops at the first failing document.
    pub fn run_documents(
        &self,
        doc_ids: &[String],
        run: RunStatus,
        clear_history: bool,
    ) -> ServiceResult<()> {
        for doc_id in doc_ids {
            self.run_document(doc_id, run, clear_history)?;
        }
        Ok(())
    }

    fn run_document(&self, doc_id: &str, run: RunStatus, clear_history: bool) -> ServiceResult<()> {
        let doc = self.document(doc_id)?;
        let tenant_id = self.tenant_id(doc_id)?;
        let starting = run == RunStatus::Running;

        if starting && clear_history && (doc.token_num != 0 || doc.chunk_num != 0) {
            self.db
                .increment_chunk_num(&doc.id, &doc.kb_id, -doc.token_num, -doc.chunk_num, 0.0)?;
        }
        self.db
            .reset_document_run(&doc.id, RunReset { run, clear_history })?;

        if clear_history {
            let tasks = self.db.delete_tasks_for_document(&doc.id)?;
            let chunks = self.purge_document_chunks(&tenant_id, &doc)?;
            info!(doc_id = %doc.id, tasks, chunks, "Cleared parse history");
        }

        if starting {
            let doc = self.document(doc_id)?;
            let (bucket, name) = self.storage_address(&doc)?;
            self.queue_tasks(&doc, &tenant_id, &bucket, &name)?;
        }

        info!(doc_id = %doc_id, run = %run.as_str(), clear_history, "Updated document run state");
        Ok(())
    }

    fn queue_tasks(
        &self,
        doc: &Document,
        tenant_id: &str,
        bucket: &str,
        name: &str,
    ) -> ServiceResult<()> {
        let windows = page_windows(&doc.parser_config)?;

        for (from_page, to_page) in windows {
            let now = Utc::now();
            let task = Task {
                id: Uuid::new_v4().to_string(),
                doc_id: doc.id.clone(),
                from_page,
                to_page,
                progress: 0.0,
                progress_msg: String::new(),
                created_at: now,
                updated_at: now,
            };
            self.db.insert_task(&task)?;
            self.queue.enqueue(&TaskMessage {
                task,
                doc: doc.clone(),
                tenant_id: tenant_id.to_string(),
                bucket: bucket.to_string(),
                name: name.to_string(),
            })?;
            metrics::counter!("kbflow_tasks_queued_total").increment(1);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::content::UploadedFile;
    use crate::queue::TaskQueue;
    use crate::service::testing::{Event, Harness};

    #[test]
    fn default_pages_make_one_window() {
        assert_eq!(page_windows(&json!({})).unwrap(), vec![(0, MAX_PAGE)]);
        assert_eq!(page_windows(&json!({"pages": []})).unwrap(), vec![(0, MAX_PAGE)]);
    }

    #[test]
    fn page_ranges_split_by_task_size() {
        let config = json!({"pages": [[1, 10], [20, 25]], "task_page_size": 4});
        assert_eq!(
            page_windows(&config).unwrap(),
            vec![(0, 4), (4, 8), (8, 10), (19, 23), (23, 25)]
        );
    }

    #[test]
    fn malformed_pages_are_rejected() {
        assert!(page_windows(&json!({"pages": "all"})).is_err());
        assert!(page_windows(&json!({"pages": [[1]]})).is_err());
        assert!(page_windows(&json!({"pages": [["a", "b"]]})).is_err());
    }

    #[test]
    fn rerun_with_clear_drops_queued_messages_of_old_tasks() {
        let h = Harness::new();
        let kb = h.kb("K1");
        let doc = h.service.create_virtual(&kb.id, "v.txt", "user-1").unwrap();

        h.service
            .run_documents(&[doc.id.clone()], RunStatus::Running, true)
            .unwrap();
        h.service
            .run_documents(&[doc.id.clone()], RunStatus::Running, true)
            .unwrap();

        assert_eq!(h.db.queued_task_count().unwrap(), 1);
        let current = h.db.tasks_for_document(&doc.id).unwrap();
        let claimed = h.db.claim().unwrap().unwrap();
        assert_eq!(claimed.task.id, current[0].id);
    }

    #[test]
    fn rerun_with_clear_deletes_chunks_before_enqueue() {
        let h = Harness::new();
        let kb = h.kb("K1");
        let doc = h.indexed_document(&kb, "a.txt", 3, 30);
        h.seed_task(&doc.id);

        h.service
            .run_documents(&[doc.id.clone()], RunStatus::Running, true)
            .unwrap();

        assert_eq!(
            h.events(),
            vec![
                Event::IndexDelete(format!("doc_id={}", doc.id)),
                Event::Enqueue(doc.id.clone()),
            ]
        );
        assert_eq!(h.chunks(&kb, &doc.id), 0);

        let tasks = h.db.tasks_for_document(&doc.id).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!((tasks[0].from_page, tasks[0].to_page), (0, MAX_PAGE));

        let doc = h.service.document(&doc.id).unwrap();
        assert_eq!(doc.run, RunStatus::Running);
        assert_eq!((doc.chunk_num, doc.token_num, doc.progress), (0, 0, 0.0));
        assert!(doc.process_begin_at.is_some());
        let kb = h.service.knowledge_base(&kb.id).unwrap();
        assert_eq!((kb.chunk_num, kb.token_num), (0, 0));
    }

    #[test]
    fn queued_message_carries_snapshot_and_address() {
        let h = Harness::new();
        let kb = h.kb("K1");
        let doc = h
            .service
            .create_from_upload(&kb.id, &UploadedFile::new("a.txt", "hello"), "user-1")
            .unwrap();

        h.service
            .run_documents(&[doc.id.clone()], RunStatus::Running, false)
            .unwrap();

        let messages = h.queue.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].tenant_id, kb.tenant_id);
        assert_eq!(messages[0].bucket, kb.id);
        assert_eq!(messages[0].name, doc.location);
        assert_eq!(messages[0].doc.run, RunStatus::Running);
    }

    #[test]
    fn cancel_does_not_queue() {
        let h = Harness::new();
        let kb = h.kb("K1");
        let doc = h.indexed_document(&kb, "a.txt", 3, 30);

        h.service
            .run_documents(&[doc.id.clone()], RunStatus::Cancelled, false)
            .unwrap();

        assert!(h.events().is_empty());
        let doc = h.service.document(&doc.id).unwrap();
        assert_eq!(doc.run, RunStatus::Cancelled);
        assert_eq!(doc.chunk_num, 3);
    }

    #[test]
    fn run_stops_at_first_missing_document() {
        let h = Harness::new();
        let kb = h.kb("K1");
        let doc = h.service.create_virtual(&kb.id, "v.txt", "user-1").unwrap();

        let err = h
            .service
            .run_documents(
                &["missing".to_string(), doc.id.clone()],
                RunStatus::Running,
                false,
            )
            .unwrap_err();

        assert!(matches!(err, ServiceError::DocumentNotFound { .. }));
        assert_eq!(h.service.document(&doc.id).unwrap().run, RunStatus::Unstart);
    }
}
