//! Граница с общим хранилищем сигналинга (документы + очереди с подпиской).

pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::StoreError;

pub use memory::MemoryStore;

/// Документ хранилища: плоская карта полей верхнего уровня
pub type Document = Map<String, Value>;

/// Снимок документа; `None`, если документа нет
pub type Snapshot = Option<Document>;

/// Подписки закрываются тем, что получатель выбрасывается
pub type Subscription<T> = mpsc::UnboundedReceiver<T>;

/// Тип изменения записи очереди
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// Изменение в очереди. `entry_id` это идентичность записи на стороне хранилища.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueChange {
    pub kind: ChangeKind,
    pub entry_id: String,
    pub record: Value,
}

#[async_trait]
pub trait SignalingStore: Send + Sync + 'static {
    /// Создаёт пустой документ и возвращает его id
    async fn create_document(&self, collection: &str) -> Result<String, StoreError>;

    async fn get_document(&self, collection: &str, id: &str) -> Result<Snapshot, StoreError>;

    /// Первичная запись: заменяет документ целиком
    async fn set_fields(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError>;

    /// Слияние полей верхнего уровня; остальные поля не трогаются
    async fn update_fields(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError>;

    /// Текущий снимок сразу, затем снимок после каждой записи (at-least-once)
    async fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Subscription<Snapshot>, StoreError>;

    /// Дописывает запись в очередь, возвращает id записи
    async fn append_to_queue(
        &self,
        collection: &str,
        id: &str,
        queue: &str,
        record: Value,
    ) -> Result<String, StoreError>;

    /// Существующие записи как `Added`, затем новые в порядке добавления
    async fn subscribe_queue(
        &self,
        collection: &str,
        id: &str,
        queue: &str,
    ) -> Result<Subscription<QueueChange>, StoreError>;
}
