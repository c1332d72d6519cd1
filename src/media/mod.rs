//! Local and remote media as seen by the call engine.
//!
//! Capture itself happens outside this crate: a [`MediaDevices`] implementation
//! hands back [`LocalStream`]s whose tracks it keeps feeding with samples.

pub mod switcher;
pub mod track;

use async_trait::async_trait;

use crate::error::MediaError;
use crate::peer::types::CallKind;

pub use switcher::StreamSwitcher;
pub use track::{
    LocalStream, LocalTrack, ReadyState, RemoteStream, RemoteTrack, TrackKind, TrackSource,
};

/// What to ask the capture layer for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaRequest {
    /// Camera and/or microphone
    User { audio: bool, video: bool },
    /// Screen capture
    Display { audio: bool },
}

impl MediaRequest {
    /// Media requested when a call of `kind` starts or is accepted.
    ///
    /// Audio calls still ask for the camera so video can be enabled later.
    pub fn for_call(kind: CallKind) -> Self {
        match kind {
            CallKind::Audio | CallKind::Video => MediaRequest::User {
                audio: true,
                video: true,
            },
            CallKind::Screen => MediaRequest::Display { audio: true },
        }
    }

    pub fn camera() -> Self {
        MediaRequest::User {
            audio: false,
            video: true,
        }
    }

    pub fn screen() -> Self {
        MediaRequest::Display { audio: false }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            MediaRequest::User { video: true, .. } => "camera",
            MediaRequest::User { .. } => "microphone",
            MediaRequest::Display { .. } => "screen capture",
        }
    }
}

/// Capture devices of the host platform
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, request: MediaRequest) -> Result<LocalStream, MediaError>;
}
