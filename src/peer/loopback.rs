//! Детерминированный транспорт в памяти: пишет журнал вызовов и сам
//! объявляет соединение, когда обмен описаниями и кандидатами завершён.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransportError;
use crate::peer::types::{Candidate, SdpType, SessionDescription};
use crate::transport::{EventHub, Transport, TransportEvent, TransportState};

const TRACK_ATTR: &str = "a=track:";

/// Медиатрек петлевого транспорта
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackTrack {
    pub id: String,
}

impl LoopbackTrack {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Default)]
struct LoopbackState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_description_calls: Vec<SessionDescription>,
    received: Vec<Candidate>,
    pending: Vec<Candidate>,
    applied: Vec<Candidate>,
    tracks: Vec<LoopbackTrack>,
    fail_next_remote: bool,
    connected: bool,
    closed: bool,
}

pub struct LoopbackTransport {
    name: String,
    candidate_count: usize,
    state: Mutex<LoopbackState>,
    hub: EventHub<LoopbackTrack>,
}

impl LoopbackTransport {
    /// `candidate_count` host-кандидатов выдаётся после установки local description
    pub fn new(name: &str, candidate_count: usize) -> Self {
        Self {
            name: name.to_string(),
            candidate_count,
            state: Mutex::new(LoopbackState::default()),
            hub: EventHub::new(),
        }
    }

    /// Следующий `set_remote_description` будет отклонён
    pub fn fail_next_remote_description(&self) {
        self.state.lock().fail_next_remote = true;
    }

    /// Все вызовы `set_remote_description`, включая отклонённые
    pub fn remote_description_calls(&self) -> Vec<SessionDescription> {
        self.state.lock().remote_description_calls.clone()
    }

    /// Все вызовы `add_remote_candidate`
    pub fn received_candidates(&self) -> Vec<Candidate> {
        self.state.lock().received.clone()
    }

    /// Кандидаты, реально принятые после установки remote description
    pub fn applied_candidates(&self) -> Vec<Candidate> {
        self.state.lock().applied.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Имитация сигнала состояния от нижележащего стека
    pub fn report_state(&self, state: TransportState) {
        self.hub.emit(TransportEvent::ConnectionState(state));
    }

    fn description(&self, kind: SdpType, tracks: &[LoopbackTrack]) -> SessionDescription {
        let mut sdp = format!("v=0\r\no={} 0 0 IN IP4 127.0.0.1\r\ns={}\r\n", self.name, kind.as_str());
        for track in tracks {
            sdp.push_str(TRACK_ATTR);
            sdp.push_str(&track.id);
            sdp.push_str("\r\n");
        }
        SessionDescription { kind, sdp }
    }

    fn host_candidate(&self, n: usize) -> Candidate {
        Candidate {
            candidate: format!(
                "candidate:{n} 1 udp 2122260223 127.0.0.1 {} typ host",
                50000 + n
            ),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some(self.name.clone()),
        }
    }

    /// Соединение считается установленным, когда есть оба описания и хотя бы один кандидат
    fn check_connected(&self, state: &mut LoopbackState) {
        if state.connected || state.local.is_none() || state.remote.is_none() || state.applied.is_empty() {
            return;
        }
        state.connected = true;
        debug!(transport = %self.name, "loopback connected");
        self.hub.emit(TransportEvent::ConnectionState(TransportState::Connected));
    }

    fn ensure_open(state: &LoopbackState) -> Result<(), TransportError> {
        if state.closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    type LocalTrack = LoopbackTrack;
    type RemoteTrack = LoopbackTrack;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;
        Ok(self.description(SdpType::Offer, &state.tracks))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;
        match &state.remote {
            Some(remote) if remote.kind == SdpType::Offer => {
                Ok(self.description(SdpType::Answer, &state.tracks))
            }
            _ => Err(TransportError::rejected("create_answer", "no remote offer")),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.local = Some(desc);
        self.hub.emit(TransportEvent::ConnectionState(TransportState::Connecting));
        for n in 0..self.candidate_count {
            self.hub.emit(TransportEvent::LocalCandidate(self.host_candidate(n)));
        }
        self.hub.emit(TransportEvent::GatheringComplete);
        self.check_connected(&mut state);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.remote_description_calls.push(desc.clone());
        if state.fail_next_remote {
            state.fail_next_remote = false;
            return Err(TransportError::rejected("set_remote_description", "injected failure"));
        }
        if state.remote.is_some() {
            return Err(TransportError::rejected(
                "set_remote_description",
                "remote description already set",
            ));
        }

        for line in desc.sdp.lines() {
            if let Some(id) = line.strip_prefix(TRACK_ATTR) {
                self.hub.emit(TransportEvent::RemoteTrack(LoopbackTrack::new(id)));
            }
        }
        state.remote = Some(desc);
        let pending = std::mem::take(&mut state.pending);
        state.applied.extend(pending);
        self.check_connected(&mut state);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.state.lock().remote.is_some()
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.received.push(candidate.clone());
        if state.remote.is_none() {
            state.pending.push(candidate);
            return Ok(());
        }
        state.applied.push(candidate);
        self.check_connected(&mut state);
        Ok(())
    }

    async fn attach_local_media(&self, tracks: Vec<LoopbackTrack>) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.tracks.extend(tracks);
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent<LoopbackTrack>> {
        self.hub.subscribe()
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            self.hub.emit(TransportEvent::ConnectionState(TransportState::Closed));
        }
        Ok(())
    }
}
