//! Service wired to real local stores wrapped in recording fakes.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tempfile::TempDir;

use super::{KnowledgeBaseUpdate, LifecycleService};
use crate::blob::{BlobStore, FsBlobStore};
use crate::config::StaticConfig;
use crate::content::UploadedFile;
use crate::db::{Database, Document, KnowledgeBase, Task};
use crate::error::{IndexError, QueueError, StorageError};
use crate::index::{IndexFilter, IndexPatch, IndexStore, MemoryIndexStore, index_name};
use crate::providers::ProviderRegistry;
use crate::queue::{TaskMessage, TaskQueue};

/// Store calls the tests assert on, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    IndexDelete(String),
    IndexUpdate { filter: String, patch: IndexPatch },
    Enqueue(String),
}

type EventLog = Arc<Mutex<Vec<Event>>>;

fn describe(filter: &IndexFilter) -> String {
    let mut parts: Vec<String> = filter
        .terms
        .iter()
        .map(|(field, value)| match value {
            Value::String(s) => format!("{field}={s}"),
            other => format!("{field}={other}"),
        })
        .collect();
    if let Some(field) = &filter.exists {
        parts.push(format!("exists={field}"));
    }
    parts.join(",")
}

pub struct FaultyBlobs {
    inner: FsBlobStore,
    failing_puts: Mutex<HashSet<String>>,
    failing_removes: Mutex<HashSet<String>>,
    unhealthy: Mutex<bool>,
}

impl FaultyBlobs {
    pub fn fail_put(&self, key: &str) {
        self.failing_puts.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_remove(&self, key: &str) {
        self.failing_removes.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_health(&self) {
        *self.unhealthy.lock().unwrap() = true;
    }

    fn injected(bucket: &str, key: &str) -> StorageError {
        StorageError::Io {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: std::io::Error::other("injected failure"),
        }
    }
}

impl BlobStore for FaultyBlobs {
    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.failing_puts.lock().unwrap().contains(key) {
            return Err(Self::injected(bucket, key));
        }
        self.inner.put(bucket, key, data)
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        self.inner.get(bucket, key)
    }

    fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(bucket, key)
    }

    fn remove(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        if self.failing_removes.lock().unwrap().contains(key) {
            return Err(Self::injected(bucket, key));
        }
        self.inner.remove(bucket, key)
    }

    fn health(&self) -> Result<(), StorageError> {
        if *self.unhealthy.lock().unwrap() {
            return Err(Self::injected("", ".health"));
        }
        self.inner.health()
    }
}

pub struct RecordingIndex {
    inner: MemoryIndexStore,
    events: EventLog,
    failing_updates: Mutex<bool>,
}

impl RecordingIndex {
    pub fn fail_updates(&self) {
        *self.failing_updates.lock().unwrap() = true;
    }
}

impl IndexStore for RecordingIndex {
    fn create_idx(&self, index_name: &str, kb_id: &str) -> Result<(), IndexError> {
        self.inner.create_idx(index_name, kb_id)
    }

    fn delete_idx(&self, index_name: &str, kb_id: &str) -> Result<(), IndexError> {
        self.inner.delete_idx(index_name, kb_id)
    }

    fn index_exist(&self, index_name: &str, kb_id: &str) -> Result<bool, IndexError> {
        self.inner.index_exist(index_name, kb_id)
    }

    fn upsert(
        &self,
        index_name: &str,
        kb_id: &str,
        rows: Vec<Map<String, Value>>,
    ) -> Result<(), IndexError> {
        self.inner.upsert(index_name, kb_id, rows)
    }

    fn delete(
        &self,
        index_name: &str,
        kb_id: &str,
        filter: &IndexFilter,
    ) -> Result<usize, IndexError> {
        self.events
            .lock()
            .unwrap()
            .push(Event::IndexDelete(describe(filter)));
        self.inner.delete(index_name, kb_id, filter)
    }

    fn update(
        &self,
        index_name: &str,
        kb_id: &str,
        filter: &IndexFilter,
        patch: &IndexPatch,
    ) -> Result<usize, IndexError> {
        if *self.failing_updates.lock().unwrap() {
            return Err(IndexError::Unavailable {
                message: "injected failure".to_string(),
            });
        }
        self.events.lock().unwrap().push(Event::IndexUpdate {
            filter: describe(filter),
            patch: patch.clone(),
        });
        self.inner.update(index_name, kb_id, filter, patch)
    }

    fn term_counts(
        &self,
        index_name: &str,
        kb_id: &str,
        field: &str,
    ) -> Result<BTreeMap<String, usize>, IndexError> {
        self.inner.term_counts(index_name, kb_id, field)
    }

    fn health(&self) -> Result<(), IndexError> {
        self.inner.health()
    }
}

pub struct RecordingQueue {
    inner: Arc<Database>,
    events: EventLog,
    messages: Mutex<Vec<TaskMessage>>,
}

impl RecordingQueue {
    pub fn messages(&self) -> Vec<TaskMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl TaskQueue for RecordingQueue {
    fn enqueue(&self, message: &TaskMessage) -> Result<(), QueueError> {
        self.inner.enqueue(message)?;
        self.events
            .lock()
            .unwrap()
            .push(Event::Enqueue(message.doc.id.clone()));
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn claim(&self) -> Result<Option<TaskMessage>, QueueError> {
        self.inner.claim()
    }

    fn executor_ids(&self) -> Result<Vec<String>, QueueError> {
        self.inner.executor_ids()
    }

    fn heartbeats(&self, executor_id: &str, from: i64, to: i64) -> Result<Vec<Value>, QueueError> {
        self.inner.heartbeats(executor_id, from, to)
    }

    fn health(&self) -> Result<(), QueueError> {
        TaskQueue::health(self.inner.as_ref())
    }
}

pub struct Harness {
    pub service: LifecycleService,
    pub db: Arc<Database>,
    pub blobs: Arc<FaultyBlobs>,
    pub index: Arc<RecordingIndex>,
    pub queue: Arc<RecordingQueue>,
    events: EventLog,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let events: EventLog = Arc::default();

        let db = Arc::new(Database::open_in_memory().unwrap());
        let blobs = Arc::new(FaultyBlobs {
            inner: FsBlobStore::new(dir.path().join("blobs")),
            failing_puts: Mutex::default(),
            failing_removes: Mutex::default(),
            unhealthy: Mutex::new(false),
        });
        let index = Arc::new(RecordingIndex {
            inner: MemoryIndexStore::new(),
            events: events.clone(),
            failing_updates: Mutex::new(false),
        });
        let queue = Arc::new(RecordingQueue {
            inner: db.clone(),
            events: events.clone(),
            messages: Mutex::default(),
        });

        let service = LifecycleService::new(
            Arc::new(StaticConfig::default()),
            db.clone(),
            blobs.clone(),
            index.clone(),
            queue.clone(),
            Arc::new(ProviderRegistry::new()),
        );

        Self {
            service,
            db,
            blobs,
            index,
            queue,
            events,
            _dir: dir,
        }
    }

    /// Knowledge base owned by `user-1` with an index partition in place
    pub fn kb(&self, name: &str) -> KnowledgeBase {
        let kb = self
            .service
            .create_knowledge_base(
                "user-1",
                &KnowledgeBaseUpdate {
                    name: name.to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
        self.index
            .create_idx(&index_name(&kb.tenant_id), &kb.id)
            .unwrap();
        kb
    }

    /// Uploaded document that already went through a parse
    pub fn indexed_document(
        &self,
        kb: &KnowledgeBase,
        name: &str,
        chunks: i64,
        tokens: i64,
    ) -> Document {
        let doc = self
            .service
            .create_from_upload(&kb.id, &UploadedFile::new(name, "content"), "user-1")
            .unwrap();
        self.seed_chunks(kb, &doc.id, chunks, tokens);
        self.events.lock().unwrap().clear();
        self.service.document(&doc.id).unwrap()
    }

    /// Write chunk rows for a document and count them on the metadata side
    pub fn seed_chunks(&self, kb: &KnowledgeBase, doc_id: &str, chunks: i64, tokens: i64) {
        let name = index_name(&kb.tenant_id);
        self.index.create_idx(&name, &kb.id).unwrap();
        let rows = (0..chunks)
            .map(|n| match json!({"id": format!("{doc_id}-{n}"), "doc_id": doc_id, "kb_id": kb.id}) {
                Value::Object(row) => row,
                _ => unreachable!(),
            })
            .collect();
        self.index.upsert(&name, &kb.id, rows).unwrap();
        self.db
            .increment_chunk_num(doc_id, &kb.id, tokens, chunks, 0.0)
            .unwrap();
    }

    pub fn seed_task(&self, doc_id: &str) {
        let now = Utc::now();
        self.db
            .insert_task(&Task {
                id: uuid::Uuid::new_v4().to_string(),
                doc_id: doc_id.to_string(),
                from_page: 0,
                to_page: 10,
                progress: 1.0,
                progress_msg: "old".to_string(),
                created_at: now,
                updated_at: now,
            })
            .unwrap();
    }

    pub fn chunks(&self, kb: &KnowledgeBase, doc_id: &str) -> usize {
        self.rows(kb, &IndexFilter::doc(doc_id)).len()
    }

    pub fn rows(&self, kb: &KnowledgeBase, filter: &IndexFilter) -> Vec<Map<String, Value>> {
        self.index
            .inner
            .search(&index_name(&kb.tenant_id), &kb.id, filter)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn limit_document_size(&mut self, max_bytes: u64) {
        let mut config = (*self.service.config).clone();
        config.limits.max_document_size_bytes = max_bytes;
        self.service.config = Arc::new(config);
    }

    pub fn limit_tenant_documents(&mut self, max_documents: i64) {
        let mut config = (*self.service.config).clone();
        config.limits.max_documents_per_tenant = max_documents;
        self.service.config = Arc::new(config);
    }
}
