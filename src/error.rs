//! Error types for the call engine

use thiserror::Error;

use crate::session::CallState;

/// Session level failures returned by [`crate::CallSession`] operations.
#[derive(Debug, Error)]
pub enum CallError {
    /// Another call is already in progress
    #[error("call already in progress ({0:?})")]
    Busy(CallState),

    /// Operation is not valid in the current state
    #[error("operation not allowed in state {0:?}")]
    InvalidState(CallState),

    /// Local media could not be acquired
    #[error(transparent)]
    Media(#[from] MediaError),

    /// The peer connection rejected an operation
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The relay could not take the message
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    /// The call loop is gone
    #[error("call loop stopped")]
    LoopClosed,
}

/// Media acquisition failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission to use {0} was denied")]
    PermissionDenied(String),

    #[error("no {0} device available")]
    DeviceUnavailable(String),

    #[error("capture returned no {0} track")]
    MissingTrack(String),
}

/// Failures reported by a [`crate::peer::PeerTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// Session description could not be parsed or applied
    #[error("invalid session description: {0}")]
    SessionDescription(String),

    /// Candidate could not be applied
    #[error("invalid ICE candidate: {0}")]
    Candidate(String),

    /// No sender carries a video track
    #[error("no outgoing video sender")]
    NoVideoSender,

    /// Error from the underlying WebRTC stack
    #[error("webrtc: {0}")]
    WebRtc(#[from] webrtc::Error),
}

/// Relay encode/decode and delivery failures.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("relay channel closed")]
    Closed,

    #[error("unknown relay event '{0}'")]
    UnknownEvent(String),

    #[error("malformed '{event}' payload: {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("'{0}' carried no candidates")]
    EmptyCandidates(String),

    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("ICE server '{0}' has an empty URL")]
    EmptyUrl(String),

    #[error("TURN server '{0}' requires username and credential")]
    MissingTurnCredentials(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
