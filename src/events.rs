use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::media::{LocalStream, RemoteStream};
use crate::peer::types::{CallKind, PeerProfile};

/// Callbacks the call UI implements.
///
/// Every failure the user should see arrives here; nothing is raised into UI code.
pub trait CallEvents: Send + Sync {
    fn on_incoming_call(&self, from_user: &PeerProfile, kind: CallKind);

    fn on_local_stream_ready(&self, stream: &LocalStream);

    fn on_remote_stream_ready(&self, stream: &RemoteStream);

    fn on_call_ended(&self);

    fn on_track_switch_failed(&self, reason: &str);

    /// Starting or accepting a call failed
    fn on_call_failed(&self, reason: &str);

    fn on_connection_problem(&self) {}

    fn on_connection_recovered(&self) {}

    fn on_connection_failed(&self) {}
}

/// Owned form of a [`CallEvents`] callback
#[derive(Debug, Clone)]
pub enum CallEvent {
    IncomingCall { from_user: PeerProfile, kind: CallKind },
    LocalStreamReady(LocalStream),
    RemoteStreamReady(RemoteStream),
    CallEnded,
    TrackSwitchFailed(String),
    CallFailed(String),
    ConnectionProblem,
    ConnectionRecovered,
    ConnectionFailed,
}

/// Forwards callbacks as [`CallEvent`]s to whoever renders the call UI.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<CallEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: CallEvent) {
        trace!(?event, "emit");
        if self.tx.send(event).is_err() {
            debug!("UI receiver is gone, event dropped");
        }
    }
}

impl CallEvents for EventEmitter {
    fn on_incoming_call(&self, from_user: &PeerProfile, kind: CallKind) {
        self.emit(CallEvent::IncomingCall {
            from_user: from_user.clone(),
            kind,
        });
    }

    fn on_local_stream_ready(&self, stream: &LocalStream) {
        self.emit(CallEvent::LocalStreamReady(stream.clone()));
    }

    fn on_remote_stream_ready(&self, stream: &RemoteStream) {
        self.emit(CallEvent::RemoteStreamReady(stream.clone()));
    }

    fn on_call_ended(&self) {
        self.emit(CallEvent::CallEnded);
    }

    fn on_track_switch_failed(&self, reason: &str) {
        self.emit(CallEvent::TrackSwitchFailed(reason.to_owned()));
    }

    fn on_call_failed(&self, reason: &str) {
        self.emit(CallEvent::CallFailed(reason.to_owned()));
    }

    fn on_connection_problem(&self) {
        self.emit(CallEvent::ConnectionProblem);
    }

    fn on_connection_recovered(&self) {
        self.emit(CallEvent::ConnectionRecovered);
    }

    fn on_connection_failed(&self) {
        self.emit(CallEvent::ConnectionFailed);
    }
}
