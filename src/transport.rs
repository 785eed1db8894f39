//! Граница с медиа-транспортом (ICE/DTLS/SRTP остаются на его стороне).

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::peer::types::{Candidate, SessionDescription};

/// Состояние соединения, как его сообщает транспорт
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Входящие события транспорта
#[derive(Debug, Clone)]
pub enum TransportEvent<R> {
    LocalCandidate(Candidate),
    /// Сбор локальных кандидатов завершён
    GatheringComplete,
    ConnectionState(TransportState),
    RemoteTrack(R),
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type LocalTrack: Send + Sync + 'static;
    type RemoteTrack: Clone + Send + Sync + 'static;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError>;
    async fn has_remote_description(&self) -> bool;

    /// Кандидат может прийти раньше remote description; транспорт обязан его придержать.
    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<(), TransportError>;

    async fn attach_local_media(&self, tracks: Vec<Self::LocalTrack>) -> Result<(), TransportError>;

    /// Новый поток событий. События, случившиеся до подписки, не повторяются.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent<Self::RemoteTrack>>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Рассылка событий транспорта всем подписчикам; закрытые подписки выкидываются.
pub struct EventHub<R> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TransportEvent<R>>>>,
}

impl<R: Clone> EventHub<R> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent<R>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: TransportEvent<R>) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<R: Clone> Default for EventHub<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_subscribers_are_pruned() {
        let hub: EventHub<()> = EventHub::new();
        let mut keep = hub.subscribe();
        let gone = hub.subscribe();
        drop(gone);

        hub.emit(TransportEvent::GatheringComplete);
        assert_eq!(hub.subscriber_count(), 1);
        assert!(matches!(keep.try_recv(), Ok(TransportEvent::GatheringComplete)));
    }
}
