//! Operations called by task executors.
//!
//! Executors claim queued tasks, write the chunks they produce and report
//! per-task progress. The sweeper folds that progress into the documents.
//! Every write resolves the task first, so work for a task that was removed
//! by Delete or by a history-clearing Run is refused.

use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::LifecycleService;
use crate::db::Task;
use crate::error::{ServiceError, ServiceResult};
use crate::index::{AVAILABLE_FIELD, PAGERANK_FIELD, index_name};
use crate::queue::TaskMessage;

impl LifecycleService {
    /// Hand the oldest queued task to an executor
    pub fn claim_task(&self, executor_id: &str) -> ServiceResult<Option<TaskMessage>> {
        if executor_id.is_empty() {
            return Err(ServiceError::validation("Lack of \"executor_id\""));
        }
        let message = self.queue.claim()?;
        if let Some(message) = &message {
            metrics::counter!("kbflow_tasks_claimed_total").increment(1);
            info!(
                executor_id = %executor_id,
                task_id = %message.task.id,
                doc_id = %message.doc.id,
                "Task claimed"
            );
        }
        Ok(message)
    }

    /// Look up a task or fail with `TaskNotFound`
    pub fn task(&self, task_id: &str) -> ServiceResult<Task> {
        self.db
            .get_task(task_id)?
            .ok_or_else(|| ServiceError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Record progress for one task: a value in `[0, 1]`, or -1 for failure
    pub fn report_task_progress(
        &self,
        task_id: &str,
        progress: f64,
        progress_msg: &str,
    ) -> ServiceResult<()> {
        if progress != -1.0 && !(0.0..=1.0).contains(&progress) {
            return Err(ServiceError::validation(
                "Task progress must be -1 or between 0 and 1",
            ));
        }
        if !self
            .db
            .update_task_progress(task_id, progress, progress_msg)?
        {
            return Err(ServiceError::TaskNotFound {
                task_id: task_id.to_string(),
            });
        }
        debug!(task_id = %task_id, progress, "Recorded task progress");
        Ok(())
    }

    /// Index the chunks produced for a task and add them to the document and
    /// knowledge base counters. The tenant index is created on first write.
    /// Rows get `doc_id`, `kb_id`, the availability flag and the knowledge
    /// base pagerank stamped on; rows without an `id` get a fresh one.
    pub fn store_task_chunks(
        &self,
        task_id: &str,
        chunks: Vec<Map<String, Value>>,
        token_num: i64,
    ) -> ServiceResult<usize> {
        if token_num < 0 {
            return Err(ServiceError::validation("Token count must not be negative"));
        }
        let task = self.task(task_id)?;
        let doc = self.document(&task.doc_id)?;
        let kb = self.knowledge_base(&doc.kb_id)?;

        let name = index_name(&kb.tenant_id);
        if !self.index.index_exist(&name, &kb.id)? {
            self.index.create_idx(&name, &kb.id)?;
        }

        let rows: Vec<Map<String, Value>> = chunks
            .into_iter()
            .map(|mut row| {
                if !row.contains_key("id") {
                    row.insert("id".to_string(), Value::from(Uuid::new_v4().to_string()));
                }
                row.insert("doc_id".to_string(), Value::from(doc.id.as_str()));
                row.insert("kb_id".to_string(), Value::from(kb.id.as_str()));
                row.insert(AVAILABLE_FIELD.to_string(), Value::from(i64::from(doc.enabled)));
                if kb.pagerank > 0 {
                    row.insert(PAGERANK_FIELD.to_string(), Value::from(kb.pagerank));
                } else {
                    row.remove(PAGERANK_FIELD);
                }
                row
            })
            .collect();
        let count = rows.len();

        self.index.upsert(&name, &kb.id, rows)?;
        self.db
            .increment_chunk_num(&doc.id, &kb.id, token_num, count as i64, 0.0)?;

        info!(task_id = %task.id, doc_id = %doc.id, chunks = count, tokens = token_num, "Stored task chunks");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::RunStatus;
    use crate::index::IndexFilter;
    use crate::service::KnowledgeBaseUpdate;
    use crate::service::testing::Harness;

    fn chunk(body: Value) -> Map<String, Value> {
        match body {
            Value::Object(row) => row,
            _ => unreachable!(),
        }
    }

    #[test]
    fn executor_round_trip_finishes_the_run() {
        let h = Harness::new();
        let kb = h.kb("K1");
        let doc = h.service.create_virtual(&kb.id, "v.txt", "user-1").unwrap();
        h.service
            .run_documents(&[doc.id.clone()], RunStatus::Running, true)
            .unwrap();

        let message = h.service.claim_task("exec-1").unwrap().unwrap();
        assert_eq!(message.doc.id, doc.id);
        assert!(h.service.claim_task("exec-1").unwrap().is_none());

        let stored = h
            .service
            .store_task_chunks(
                &message.task.id,
                vec![chunk(json!({"content": "a"})), chunk(json!({"id": "c2", "content": "b"}))],
                12,
            )
            .unwrap();
        assert_eq!(stored, 2);
        h.service
            .report_task_progress(&message.task.id, 1.0, "Finished")
            .unwrap();
        h.service.update_progress().unwrap();

        let doc = h.service.document(&doc.id).unwrap();
        assert_eq!(doc.run, RunStatus::Done);
        assert_eq!((doc.chunk_num, doc.token_num), (2, 12));
        assert_eq!(doc.progress_msg, "Finished");
        let kb = h.service.knowledge_base(&kb.id).unwrap();
        assert_eq!((kb.chunk_num, kb.token_num), (2, 12));
        assert_eq!(h.chunks(&kb, &doc.id), 2);
    }

    #[test]
    fn chunks_are_stamped_and_index_created() {
        let h = Harness::new();
        let kb = h
            .service
            .create_knowledge_base(
                "user-1",
                &KnowledgeBaseUpdate {
                    name: "Ranked".to_string(),
                    pagerank: Some(3),
                    ..Default::default()
                },
            )
            .unwrap();
        let doc = h.service.create_virtual(&kb.id, "v.txt", "user-1").unwrap();
        h.service.change_status(&doc.id, false).unwrap();
        h.service
            .run_documents(&[doc.id.clone()], RunStatus::Running, false)
            .unwrap();
        let task = h.db.tasks_for_document(&doc.id).unwrap().remove(0);

        h.service
            .store_task_chunks(
                &task.id,
                vec![chunk(json!({"id": "c1", "doc_id": "spoofed", "kb_id": "other"}))],
                1,
            )
            .unwrap();

        let rows = h.rows(&kb, &IndexFilter::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["doc_id"], json!(doc.id));
        assert_eq!(rows[0]["kb_id"], json!(kb.id));
        assert_eq!(rows[0][AVAILABLE_FIELD], json!(0));
        assert_eq!(rows[0][PAGERANK_FIELD], json!(3));
    }

    #[test]
    fn progress_is_validated_and_needs_a_live_task() {
        let h = Harness::new();
        let kb = h.kb("K1");
        let doc = h.service.create_virtual(&kb.id, "v.txt", "user-1").unwrap();
        h.service
            .run_documents(&[doc.id.clone()], RunStatus::Running, false)
            .unwrap();
        let task = h.db.tasks_for_document(&doc.id).unwrap().remove(0);

        assert!(matches!(
            h.service.report_task_progress(&task.id, 1.5, ""),
            Err(ServiceError::Validation { .. })
        ));
        h.service.report_task_progress(&task.id, -1.0, "boom").unwrap();

        h.service.delete_documents(&[doc.id.clone()]).unwrap();
        assert!(matches!(
            h.service.report_task_progress(&task.id, 0.5, ""),
            Err(ServiceError::TaskNotFound { .. })
        ));
        assert!(matches!(
            h.service.store_task_chunks(&task.id, vec![chunk(json!({}))], 1),
            Err(ServiceError::TaskNotFound { .. })
        ));
        assert!(h.service.claim_task("").is_err());
    }
}
