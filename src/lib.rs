pub mod channel;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod store;
pub mod transport;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub use config::CallConfig;
pub use error::{CallError, ConfigError, StoreError, TransportError};
pub use peer::{CallState, Candidate, LoopbackTrack, LoopbackTransport, Role, RtcTransport, SessionDescription};
pub use session::CallStatus;
pub use signaling::Coordinator;
pub use store::{MemoryStore, SignalingStore};
pub use transport::{Transport, TransportEvent, TransportState};

/// Сколько ждём соединения в локальном прогоне
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Локальный прогон звонка: две стороны, общее хранилище в памяти, петлевые транспорты.
pub async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = CallConfig::from_env()?;
    logger::init(&config.log);

    let store = Arc::new(MemoryStore::new());
    let mut caller = Coordinator::from_config(
        Arc::new(LoopbackTransport::new("caller", 2)),
        store.clone(),
        &config,
    );
    let mut callee = Coordinator::from_config(
        Arc::new(LoopbackTransport::new("callee", 2)),
        store,
        &config,
    );

    caller
        .attach_local_media(vec![LoopbackTrack::new("caller-camera")])
        .await?;
    callee
        .attach_local_media(vec![LoopbackTrack::new("callee-camera")])
        .await?;
    let mut caller_tracks = caller.take_remote_tracks();

    let channel_id = caller.start_call().await?;
    info!(channel_id = %channel_id, "share this channel id with the callee");
    callee.join_call(&channel_id).await?;

    let caller_status = tokio::time::timeout(CONNECT_TIMEOUT, caller.wait_for_state(CallState::Connected)).await?;
    let callee_status = tokio::time::timeout(CONNECT_TIMEOUT, callee.wait_for_state(CallState::Connected)).await?;
    info!(
        caller = %caller_status.state,
        callee = %callee_status.state,
        "call finished negotiating"
    );
    if let Some(rx) = caller_tracks.as_mut() {
        while let Ok(track) = rx.try_recv() {
            info!(track = %track.id, "caller received remote track");
        }
    }

    caller.hangup().await?;
    callee.hangup().await?;

    if let Some(err) = caller_status.failure.or(callee_status.failure) {
        return Err(err.into());
    }
    Ok(())
}
