use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{ChangeKind, Document, QueueChange, SignalingStore, Snapshot, Subscription};
use crate::error::StoreError;
use crate::utils::random_id;

struct QueueEntry {
    id: String,
    record: Value,
}

#[derive(Default)]
struct DocSlot {
    fields: Option<Document>,
    queues: HashMap<String, Vec<QueueEntry>>,
    doc_subs: Vec<mpsc::UnboundedSender<Snapshot>>,
    queue_subs: HashMap<String, Vec<mpsc::UnboundedSender<QueueChange>>>,
}

impl DocSlot {
    fn notify_document(&mut self) {
        let snapshot = self.fields.clone();
        self.doc_subs.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }

    fn notify_queue(&mut self, queue: &str, change: QueueChange) {
        if let Some(subs) = self.queue_subs.get_mut(queue) {
            subs.retain(|tx| tx.send(change.clone()).is_ok());
        }
    }
}

/// Хранилище сигналинга в памяти процесса.
///
/// Повторяет семантику документного хранилища с подписками: снимок документа
/// приходит сразу при подписке и после каждой записи, подписка на очередь
/// сначала отдаёт все существующие записи как `Added`. Для тестов есть хуки
/// повторной доставки и имитации отказов записи.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<(String, String), DocSlot>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    fail_appends: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Количество успешных записей (create/set/update/append)
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Отклонять create/set/update
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Отклонять дописывание в очереди
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn document(&self, collection: &str, id: &str) -> Snapshot {
        self.docs
            .lock()
            .get(&key(collection, id))
            .and_then(|slot| slot.fields.clone())
    }

    pub fn queue(&self, collection: &str, id: &str, queue: &str) -> Vec<Value> {
        self.docs
            .lock()
            .get(&key(collection, id))
            .and_then(|slot| slot.queues.get(queue))
            .map(|entries| entries.iter().map(|e| e.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Повторно рассылает текущий снимок документа
    pub fn redeliver_document(&self, collection: &str, id: &str) {
        if let Some(slot) = self.docs.lock().get_mut(&key(collection, id)) {
            slot.notify_document();
        }
    }

    /// Повторно рассылает все записи очереди как `Added`
    pub fn redeliver_queue(&self, collection: &str, id: &str, queue: &str) {
        let mut docs = self.docs.lock();
        let Some(slot) = docs.get_mut(&key(collection, id)) else {
            return;
        };
        let changes: Vec<QueueChange> = slot
            .queues
            .get(queue)
            .map(|entries| entries.iter().map(added).collect())
            .unwrap_or_default();
        for change in changes {
            slot.notify_queue(queue, change);
        }
    }

    /// Рассылает `Modified` для существующей записи
    pub fn mark_modified(&self, collection: &str, id: &str, queue: &str, entry_id: &str) {
        let mut docs = self.docs.lock();
        let Some(slot) = docs.get_mut(&key(collection, id)) else {
            return;
        };
        let record = slot
            .queues
            .get(queue)
            .and_then(|entries| entries.iter().find(|e| e.id == entry_id))
            .map(|e| e.record.clone());
        if let Some(record) = record {
            slot.notify_queue(
                queue,
                QueueChange {
                    kind: ChangeKind::Modified,
                    entry_id: entry_id.to_string(),
                    record,
                },
            );
        }
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected("writes disabled".into()));
        }
        Ok(())
    }
}

fn key(collection: &str, id: &str) -> (String, String) {
    (collection.to_string(), id.to_string())
}

fn added(entry: &QueueEntry) -> QueueChange {
    QueueChange {
        kind: ChangeKind::Added,
        entry_id: entry.id.clone(),
        record: entry.record.clone(),
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_document(&self, collection: &str) -> Result<String, StoreError> {
        self.check_writable()?;
        let id = random_id();
        let mut docs = self.docs.lock();
        let slot = docs.entry(key(collection, &id)).or_default();
        slot.fields = Some(Document::new());
        slot.notify_document();
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(collection, id = %id, "document created");
        Ok(id)
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Snapshot, StoreError> {
        Ok(self.document(collection, id))
    }

    async fn set_fields(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut docs = self.docs.lock();
        let slot = docs.entry(key(collection, id)).or_default();
        slot.fields = Some(fields);
        slot.notify_document();
        self.writes.fetch_add(1, Ordering::SeqCst);
        trace!(collection, id, "document set");
        Ok(())
    }

    async fn update_fields(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        self.check_writable()?;
        let not_found = || StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        };
        let mut docs = self.docs.lock();
        let slot = docs.get_mut(&key(collection, id)).ok_or_else(not_found)?;
        let doc = slot.fields.as_mut().ok_or_else(not_found)?;
        for (name, value) in fields {
            doc.insert(name, value);
        }
        slot.notify_document();
        self.writes.fetch_add(1, Ordering::SeqCst);
        trace!(collection, id, "document updated");
        Ok(())
    }

    async fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Subscription<Snapshot>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut docs = self.docs.lock();
        let slot = docs.entry(key(collection, id)).or_default();
        // отправка в только что созданный канал не падает
        let _ = tx.send(slot.fields.clone());
        slot.doc_subs.push(tx);
        Ok(rx)
    }

    async fn append_to_queue(
        &self,
        collection: &str,
        id: &str,
        queue: &str,
        record: Value,
    ) -> Result<String, StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected("appends disabled".into()));
        }
        let entry = QueueEntry {
            id: random_id(),
            record,
        };
        let change = added(&entry);
        let entry_id = entry.id.clone();

        let mut docs = self.docs.lock();
        let slot = docs.entry(key(collection, id)).or_default();
        slot.queues.entry(queue.to_string()).or_default().push(entry);
        slot.notify_queue(queue, change);
        self.writes.fetch_add(1, Ordering::SeqCst);
        trace!(collection, id, queue, entry_id = %entry_id, "queue entry appended");
        Ok(entry_id)
    }

    async fn subscribe_queue(
        &self,
        collection: &str,
        id: &str,
        queue: &str,
    ) -> Result<Subscription<QueueChange>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut docs = self.docs.lock();
        let slot = docs.entry(key(collection, id)).or_default();
        if let Some(entries) = slot.queues.get(queue) {
            for entry in entries {
                let _ = tx.send(added(entry));
            }
        }
        slot.queue_subs.entry(queue.to_string()).or_default().push(tx);
        Ok(rx)
    }
}
