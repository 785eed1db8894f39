use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::CallConfig;
use crate::error::TransportError;
use crate::peer::types::{Candidate, SdpType, ServerConfig, SessionDescription};
use crate::transport::{EventHub, Transport, TransportEvent, TransportState};
use crate::utils::add_ice_url_scheme;

/// Транспорт поверх `RTCPeerConnection` из webrtc-rs
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
    hub: Arc<EventHub<Arc<TrackRemote>>>,
    /// Кандидаты, полученные до установки remote description.
    /// Этот же lock сериализует установку remote description и приём кандидатов.
    pending: Mutex<Vec<Candidate>>,
}

impl RtcTransport {
    /// создаём Peer и вешаем обработчики кандидатов, состояния и треков
    pub async fn new(config: &CallConfig) -> Result<Self, TransportError> {
        Self::with_settings(config, SettingEngine::default()).await
    }

    /// То же, но с настройками ICE-агента (таймауты, loopback, типы сетей)
    pub async fn with_settings(config: &CallConfig, setting: SettingEngine) -> Result<Self, TransportError> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| TransportError::rejected("register_default_codecs", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| TransportError::rejected("register_default_interceptors", e))?;
        let api = APIBuilder::new()
            .with_setting_engine(setting)
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(config))
                .await
                .map_err(|e| TransportError::rejected("new_peer_connection", e))?,
        );
        let hub = Arc::new(EventHub::new());
        install_handlers(&pc, &hub);

        Ok(Self {
            pc,
            hub,
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    pub async fn pending_candidates(&self) -> usize {
        self.pending.lock().await.len()
    }
}

fn install_handlers(pc: &Arc<RTCPeerConnection>, hub: &Arc<EventHub<Arc<TrackRemote>>>) {
    let candidates = hub.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => match c.to_json() {
                Ok(init) => candidates.emit(TransportEvent::LocalCandidate(from_init(init))),
                Err(e) => warn!(error = %e, "failed to serialize local candidate"),
            },
            // cand == None означает конец сбора
            None => candidates.emit(TransportEvent::GatheringComplete),
        }
        Box::pin(async {})
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    let states = hub.clone();
    let pc_stats = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(state = ?st, "peer connection state changed");
        if st == RTCPeerConnectionState::Failed {
            if let Some(pc) = pc_stats.upgrade() {
                tokio::spawn(async move {
                    dump_selected_pair(&pc, "BEFORE-FAIL").await;
                });
            }
        }
        states.emit(TransportEvent::ConnectionState(map_state(st)));
        Box::pin(async {})
    }));

    let tracks = hub.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            debug!(kind = %track.kind(), id = %track.id(), "remote track");
            tracks.emit(TransportEvent::RemoteTrack(track));
            Box::pin(async {})
        },
    ));
}

/// Быстрый снимок getStats → выбранная пара
async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    moment,
                    local = %pair.local_candidate_id,
                    remote = %pair.remote_candidate_id,
                    bytes_sent = pair.bytes_sent,
                    bytes_received = pair.bytes_received,
                    state = ?pair.state,
                    "selected candidate pair"
                );
            }
        }
    }
}

fn map_state(st: RTCPeerConnectionState) -> TransportState {
    match st {
        RTCPeerConnectionState::Connecting => TransportState::Connecting,
        RTCPeerConnectionState::Connected => TransportState::Connected,
        RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
        RTCPeerConnectionState::Failed => TransportState::Failed,
        RTCPeerConnectionState::Closed => TransportState::Closed,
        _ => TransportState::New,
    }
}

fn from_init(init: RTCIceCandidateInit) -> Candidate {
    Candidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_init(candidate: Candidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let parsed = match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| TransportError::rejected("parse description", e))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, TransportError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        other => {
            return Err(TransportError::rejected(
                "describe session",
                format!("unsupported sdp type {other}"),
            ))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}

/// Создает конфигурацию для peer connection
pub fn rtc_config(config: &CallConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(&config.ice_servers),
        ice_candidate_pool_size: config.ice_candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

#[async_trait]
impl Transport for RtcTransport {
    type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;
    type RemoteTrack = Arc<TrackRemote>;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::rejected("create_offer", e))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::rejected("create_answer", e))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| TransportError::rejected("set_local_description", e))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let mut pending = self.pending.lock().await;
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| TransportError::rejected("set_remote_description", e))?;

        // Применяем все отложенные кандидаты
        for candidate in pending.drain(..) {
            debug!(candidate = %candidate.candidate, "applying pending candidate");
            if let Err(e) = self.pc.add_ice_candidate(to_init(candidate)).await {
                warn!(error = %e, "failed to apply pending candidate");
            }
        }
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<(), TransportError> {
        let mut pending = self.pending.lock().await;
        if self.pc.remote_description().await.is_none() {
            debug!("remote description not set yet, queuing candidate");
            pending.push(candidate);
            return Ok(());
        }
        self.pc
            .add_ice_candidate(to_init(candidate))
            .await
            .map_err(|e| TransportError::rejected("add_ice_candidate", e))
    }

    async fn attach_local_media(&self, tracks: Vec<Self::LocalTrack>) -> Result<(), TransportError> {
        for track in tracks {
            let sender = self
                .pc
                .add_track(track)
                .await
                .map_err(|e| TransportError::rejected("add_track", e))?;
            // RTCP нужно вычитывать, иначе интерсепторы встанут
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent<Arc<TrackRemote>>> {
        self.hub.subscribe()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc
            .close()
            .await
            .map_err(|e| TransportError::rejected("close", e))
    }
}
