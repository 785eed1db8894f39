//! Координатор сигналинга: одна сторона одного звонка.
//!
//! Offerer создаёт канал и публикует offer, answerer находит канал по id,
//! принимает offer и дописывает answer. Кандидаты ходят через две очереди
//! канала параллельно обмену описаниями. После запуска всё состояние звонка
//! принадлежит одной задаче-драйверу, которая разбирает события транспорта
//! и подписок хранилища по очереди.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, ChannelRecord};
use crate::config::{CallConfig, DEFAULT_COLLECTION};
use crate::error::CallError;
use crate::logger::dump_candidate;
use crate::peer::ice::analyze_candidates;
use crate::peer::state::{CallState, Role};
use crate::peer::types::Candidate;
use crate::session::{CallStatus, Session};
use crate::store::{QueueChange, SignalingStore, Snapshot, Subscription};
use crate::transport::{Transport, TransportEvent, TransportState};

pub struct Coordinator<T: Transport, S: SignalingStore> {
    transport: Arc<T>,
    store: Arc<S>,
    collection: String,
    status_tx: Option<watch::Sender<CallStatus>>,
    status_rx: watch::Receiver<CallStatus>,
    tracks_tx: mpsc::UnboundedSender<T::RemoteTrack>,
    tracks_rx: Option<mpsc::UnboundedReceiver<T::RemoteTrack>>,
    driver: Option<JoinHandle<()>>,
    closed: bool,
}

impl<T: Transport, S: SignalingStore> Coordinator<T, S> {
    pub fn new(transport: Arc<T>, store: Arc<S>) -> Self {
        Self::with_collection(transport, store, DEFAULT_COLLECTION)
    }

    pub fn from_config(transport: Arc<T>, store: Arc<S>, config: &CallConfig) -> Self {
        Self::with_collection(transport, store, &config.collection)
    }

    pub fn with_collection(transport: Arc<T>, store: Arc<S>, collection: &str) -> Self {
        let (status_tx, status_rx) = watch::channel(CallStatus::default());
        let (tracks_tx, tracks_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            store,
            collection: collection.to_string(),
            status_tx: Some(status_tx),
            status_rx,
            tracks_tx,
            tracks_rx: Some(tracks_rx),
            driver: None,
            closed: false,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn status(&self) -> CallStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<CallStatus> {
        self.status_rx.clone()
    }

    pub fn channel_id(&self) -> Option<String> {
        self.status_rx.borrow().channel_id.clone()
    }

    pub fn call_state(&self) -> CallState {
        self.status_rx.borrow().state
    }

    /// Ждёт `target` или терминального состояния
    pub async fn wait_for_state(&self, target: CallState) -> CallStatus {
        let mut rx = self.status_rx.clone();
        let result = rx
            .wait_for(|s| s.state == target || s.state.is_terminal())
            .await
            .map(|s| s.clone());
        match result {
            Ok(status) => status,
            // отправитель ушёл: последнее значение окончательное
            Err(_) => self.status(),
        }
    }

    pub async fn attach_local_media(&self, tracks: Vec<T::LocalTrack>) -> Result<(), CallError> {
        self.transport.attach_local_media(tracks).await?;
        Ok(())
    }

    /// Треки собеседника, как их отдаёт транспорт. Получатель выдаётся один раз.
    pub fn take_remote_tracks(&mut self) -> Option<mpsc::UnboundedReceiver<T::RemoteTrack>> {
        self.tracks_rx.take()
    }

    pub fn is_running(&self) -> bool {
        self.driver.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Offerer: создаёт канал, публикует offer и возвращает id канала для передачи собеседнику
    pub async fn start_call(&mut self) -> Result<String, CallError> {
        let status = self.status_tx.take().ok_or(CallError::AlreadyStarted)?;
        let mut session = Session::new(Role::Offerer, status);

        match self.offer(&mut session).await {
            Ok((channel, inputs)) => {
                let id = channel.id().to_string();
                info!(channel_id = %id, "call started");
                self.spawn_driver(session, channel, inputs);
                Ok(id)
            }
            Err(err) => {
                session.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Answerer: находит канал, принимает offer и публикует answer
    pub async fn join_call(&mut self, channel_id: &str) -> Result<(), CallError> {
        let status = self.status_tx.take().ok_or(CallError::AlreadyStarted)?;
        let mut session = Session::new(Role::Answerer, status);

        match self.answer(&mut session, channel_id).await {
            Ok((channel, inputs)) => {
                info!(channel_id = %channel.id(), "call joined");
                self.spawn_driver(session, channel, inputs);
                Ok(())
            }
            Err(err @ (CallError::ChannelNotFound(_) | CallError::NoOfferPresent(_))) => {
                self.status_tx = Some(session.reject(err.clone()));
                Err(err)
            }
            Err(err) => {
                session.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Останавливает драйвер (подписки и обработчики больше не срабатывают) и закрывает транспорт.
    /// Незавершённые записи в хранилище не ждём.
    pub async fn hangup(&mut self) -> Result<(), CallError> {
        if let Some(handle) = self.driver.take() {
            handle.abort();
        }
        self.closed = true;
        self.transport.close().await?;
        info!("call hung up");
        Ok(())
    }

    async fn offer(&self, session: &mut Session) -> Result<(Channel<S>, Inputs<T>), CallError> {
        let channel = Channel::create(self.store.clone(), &self.collection).await?;
        session.set_channel(channel.id());

        // подписываемся до создания offer, чтобы не потерять ранние кандидаты
        let events = self.transport.subscribe();

        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        channel.publish_offer(&offer).await?;
        session.advance(CallState::DescriptionPublished);

        let snapshots = channel.subscribe().await?;
        let candidates = channel.subscribe_peer_candidates(Role::Offerer).await?;
        Ok((
            channel,
            Inputs {
                events,
                snapshots: Some(snapshots),
                candidates,
            },
        ))
    }

    async fn answer(
        &self,
        session: &mut Session,
        channel_id: &str,
    ) -> Result<(Channel<S>, Inputs<T>), CallError> {
        let (channel, record) = Channel::open(self.store.clone(), &self.collection, channel_id).await?;
        let offer = record
            .offer
            .ok_or_else(|| CallError::NoOfferPresent(channel_id.to_string()))?;
        session.set_channel(channel.id());

        let events = self.transport.subscribe();

        self.transport.set_remote_description(offer).await?;
        session.mark_remote_applied();

        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        channel.publish_answer(&answer).await?;
        session.advance(CallState::DescriptionPublished);
        // offer уже принят до публикации
        session.advance(CallState::RemoteDescriptionApplied);

        let candidates = channel.subscribe_peer_candidates(Role::Answerer).await?;
        Ok((
            channel,
            Inputs {
                events,
                snapshots: None,
                candidates,
            },
        ))
    }

    fn spawn_driver(&mut self, session: Session, channel: Channel<S>, inputs: Inputs<T>) {
        let driver = Driver {
            session,
            channel,
            transport: self.transport.clone(),
            tracks: self.tracks_tx.clone(),
            local_candidates: Vec::new(),
            events: Some(inputs.events),
            snapshots: inputs.snapshots,
            candidates: Some(inputs.candidates),
        };
        self.driver = Some(tokio::spawn(driver.run()));
    }
}

/// Без `hangup` транспорт закрывается в фоне, если есть рантайм tokio.
/// Вне рантайма соединение живёт до последнего `Arc` на транспорт.
impl<T: Transport, S: SignalingStore> Drop for Coordinator<T, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.take() {
            handle.abort();
        }
        if self.closed {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let transport = self.transport.clone();
            runtime.spawn(async move {
                if let Err(err) = transport.close().await {
                    warn!(error = %err, "failed to close transport of dropped call");
                }
            });
        }
    }
}

struct Inputs<T: Transport> {
    events: mpsc::UnboundedReceiver<TransportEvent<T::RemoteTrack>>,
    snapshots: Option<Subscription<Snapshot>>,
    candidates: Subscription<QueueChange>,
}

struct Driver<T: Transport, S: SignalingStore> {
    session: Session,
    channel: Channel<S>,
    transport: Arc<T>,
    tracks: mpsc::UnboundedSender<T::RemoteTrack>,
    local_candidates: Vec<Candidate>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent<T::RemoteTrack>>>,
    snapshots: Option<Subscription<Snapshot>>,
    candidates: Option<Subscription<QueueChange>>,
}

impl<T: Transport, S: SignalingStore> Driver<T, S> {
    async fn run(mut self) {
        while self.events.is_some() || self.snapshots.is_some() || self.candidates.is_some() {
            tokio::select! {
                event = recv_or_pending(&mut self.events) => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => {
                        debug!("transport event stream closed");
                        self.events = None;
                    }
                },
                snapshot = recv_or_pending(&mut self.snapshots) => match snapshot {
                    Some(snapshot) => self.on_snapshot(snapshot).await,
                    None => {
                        debug!("channel subscription closed");
                        self.snapshots = None;
                    }
                },
                change = recv_or_pending(&mut self.candidates) => match change {
                    Some(change) => self.on_peer_candidate(change).await,
                    None => {
                        debug!("candidate subscription closed");
                        self.candidates = None;
                    }
                },
            }

            if self.session.state() == CallState::Failed {
                break;
            }
        }
        debug!(
            role = self.session.role().as_str(),
            state = %self.session.state(),
            "signaling driver stopped"
        );
    }

    async fn on_transport_event(&mut self, event: TransportEvent<T::RemoteTrack>) {
        match event {
            TransportEvent::LocalCandidate(candidate) => self.publish_local_candidate(candidate).await,
            TransportEvent::GatheringComplete => {
                debug!(count = self.local_candidates.len(), "local candidate gathering complete");
                analyze_candidates(&self.local_candidates);
            }
            TransportEvent::ConnectionState(state) => self.on_connection_state(state),
            TransportEvent::RemoteTrack(track) => {
                // получатель мог быть выброшен UI
                let _ = self.tracks.send(track);
            }
        }
    }

    /// Потеря кандидата допустима: ошибка записи только логируется
    async fn publish_local_candidate(&mut self, candidate: Candidate) {
        dump_candidate("LOCAL", &candidate);
        let role = self.session.role();
        match self.channel.append_candidate(role, &candidate).await {
            Ok(entry_id) => trace!(entry_id = %entry_id, queue = role.local_queue(), "candidate published"),
            Err(err) => warn!(error = %err, queue = role.local_queue(), "failed to publish local candidate"),
        }
        self.local_candidates.push(candidate);
    }

    fn on_connection_state(&mut self, state: TransportState) {
        debug!(?state, "transport connection state");
        match state {
            TransportState::Connected => {
                self.session.advance(CallState::Connected);
            }
            TransportState::Failed => {
                self.session
                    .fail(CallError::TransportNegotiation("peer connection failed".into()));
            }
            _ => {}
        }
    }

    async fn on_snapshot(&mut self, snapshot: Snapshot) {
        let Some(doc) = snapshot else {
            debug!("channel document missing");
            return;
        };
        let record = match ChannelRecord::from_document(&doc) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "ignoring malformed channel snapshot");
                return;
            }
        };
        let Some(answer) = record.answer else {
            return;
        };
        if self.session.remote_applied() {
            trace!("answer already applied, snapshot ignored");
            return;
        }
        if self.transport.has_remote_description().await {
            debug!("transport already has a remote description, not reapplying answer");
            self.session.mark_remote_applied();
            return;
        }

        match self.transport.set_remote_description(answer).await {
            Ok(()) => {
                self.session.mark_remote_applied();
            }
            Err(err) => self.session.fail(err.into()),
        }
    }

    async fn on_peer_candidate(&mut self, change: QueueChange) {
        let candidate = match self.session.candidates().admit(&change) {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                trace!(entry_id = %change.entry_id, kind = ?change.kind, "candidate change skipped");
                return;
            }
            Err(err) => {
                warn!(entry_id = %change.entry_id, error = %err, "skipping malformed candidate");
                return;
            }
        };
        dump_candidate("REMOTE", &candidate);
        if let Err(err) = self.transport.add_remote_candidate(candidate).await {
            self.session.fail(err.into());
        }
    }
}

async fn recv_or_pending<U>(rx: &mut Option<mpsc::UnboundedReceiver<U>>) -> Option<U> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
