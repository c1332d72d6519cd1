use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::TransportError;
use crate::media::{LocalTrack, RemoteTrack};
use crate::peer::types::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Something that happened underneath the session and must be handled by it
#[derive(Debug, Clone)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    RemoteTrack(RemoteTrack),
    StateChanged(ConnectionState),
    /// A local track was terminated by the platform
    LocalTrackEnded(String),
}

/// A [`PeerEvent`] tagged with the call it belongs to.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub call_id: u64,
    pub event: PeerEvent,
}

/// Sender side handed to transports and track watchers for one call.
#[derive(Debug, Clone)]
pub struct PeerEvents {
    call_id: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl PeerEvents {
    pub fn new(call_id: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { call_id, tx }
    }

    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    pub fn emit(&self, event: PeerEvent) {
        let tagged = SessionEvent {
            call_id: self.call_id,
            event,
        };
        if self.tx.send(tagged).is_err() {
            trace!(call_id = self.call_id, "session event dropped, call loop gone");
        }
    }
}

/// One peer connection, as driven by the session.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), TransportError>;

    /// Creates an offer and installs it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Creates an answer and installs it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;

    async fn has_remote_description(&self) -> bool;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Swaps the track of the outgoing video sender without renegotiating.
    async fn replace_video_track(&self, track: &LocalTrack) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates a fresh [`PeerTransport`] for every call.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, events: PeerEvents) -> Result<Arc<dyn PeerTransport>, TransportError>;
}
