pub mod connection;
pub mod ice;
pub mod loopback;
pub mod state;
pub mod types;

pub use connection::RtcTransport;
pub use loopback::{LoopbackTrack, LoopbackTransport};
pub use state::{CallState, Role};
pub use types::{Candidate, SdpType, ServerConfig, SessionDescription};
