pub mod batcher;
pub mod connection;
pub mod ice;
pub mod monitor;
pub mod transport;
pub mod types;

pub use batcher::CandidateBatcher;
pub use connection::{WebRtcTransport, WebRtcTransportFactory};
pub use ice::{CandidateStats, PendingCandidateCache};
pub use monitor::ConnectionMonitor;
pub use transport::{
    ConnectionState, PeerEvent, PeerEvents, PeerTransport, SessionEvent, TransportFactory,
};
pub use types::{CallKind, IceCandidate, PeerId, PeerProfile, SdpKind, SessionDescription};
