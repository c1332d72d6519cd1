//! Call signaling and media negotiation between two chat users.
//!
//! A [`CallSession`] drives one call at a time over a [`SignalingChannel`]
//! (the chat relay) and a [`PeerTransport`] (a WebRTC peer connection). UI
//! code talks to it through a [`CallHandle`] and hears back through
//! [`CallEvents`].

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

#[cfg(test)]
mod testing;

pub use commands::{spawn_call_loop, CallCommand, CallHandle};
pub use config::{CallConfig, ServerConfig};
pub use error::{CallError, ConfigError, MediaError, SignalingError, TransportError};
pub use events::{CallEvent, CallEvents, EventEmitter};
pub use media::{LocalStream, MediaDevices, MediaRequest, RemoteStream, StreamSwitcher};
pub use peer::{
    CallKind, PeerId, PeerProfile, PeerTransport, TransportFactory, WebRtcTransportFactory,
};
pub use session::{CallSession, CallState};
pub use signaling::{InboundSignal, OutboundSignal, RelayFrame, RelaySignaling, SignalingChannel};
