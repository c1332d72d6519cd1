//! In-memory stand-ins for the transport, capture devices and relay.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{MediaError, SignalingError, TransportError};
use crate::media::{LocalStream, LocalTrack, MediaDevices, MediaRequest, TrackSource};
use crate::peer::transport::{PeerEvent, PeerEvents, PeerTransport, TransportFactory};
use crate::peer::types::{IceCandidate, PeerProfile, SdpKind, SessionDescription};
use crate::signaling::{InboundSignal, OutboundSignal, RelayFrame, SignalingChannel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    AddTrack(String),
    CreateOffer,
    CreateAnswer,
    SetRemote(SdpKind),
    AddCandidate(String),
    ReplaceVideo(String),
    Close,
}

#[derive(Default)]
struct TransportState {
    ops: Vec<TransportOp>,
    remote: Option<SessionDescription>,
    rejected: Vec<String>,
    applied: Vec<String>,
    fail_replace: bool,
    closed: bool,
}

/// Records every call; descriptions are accepted when they start with `v=0`.
pub struct FakeTransport {
    id: usize,
    events: Option<PeerEvents>,
    state: Mutex<TransportState>,
}

static NEXT_TRANSPORT: AtomicUsize = AtomicUsize::new(1);

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    fn build(events: Option<PeerEvents>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_TRANSPORT.fetch_add(1, Ordering::SeqCst),
            events,
            state: Mutex::new(TransportState::default()),
        })
    }

    pub fn reject_candidate(&self, candidate: &str) {
        self.state.lock().unwrap().rejected.push(candidate.to_owned());
    }

    pub fn fail_replace(&self) {
        self.state.lock().unwrap().fail_replace = true;
    }

    pub fn ops(&self) -> Vec<TransportOp> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Pretends the ICE agent or the media stack produced `event`.
    pub fn emit(&self, event: PeerEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    fn record(&self, op: TransportOp) {
        self.state.lock().unwrap().ops.push(op);
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        self.record(TransportOp::AddTrack(track.id().to_owned()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.record(TransportOp::CreateOffer);
        Ok(SessionDescription::offer(format!("v=0 offer {}", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.record(TransportOp::CreateAnswer);
        Ok(SessionDescription::answer(format!("v=0 answer {}", self.id)))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.record(TransportOp::SetRemote(desc.kind));
        if !desc.sdp.starts_with("v=0") {
            return Err(TransportError::SessionDescription(desc.sdp));
        }
        self.state.lock().unwrap().remote = Some(desc);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.state.lock().unwrap().remote.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.record(TransportOp::AddCandidate(candidate.candidate.clone()));
        let mut state = self.state.lock().unwrap();
        if state.rejected.contains(&candidate.candidate) {
            return Err(TransportError::Candidate(candidate.candidate));
        }
        state.applied.push(candidate.candidate);
        Ok(())
    }

    async fn replace_video_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        if self.state.lock().unwrap().fail_replace {
            return Err(TransportError::NoVideoSender);
        }
        self.record(TransportOp::ReplaceVideo(track.id().to_owned()));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.record(TransportOp::Close);
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out [`FakeTransport`]s wired to the session's event channel.
#[derive(Default)]
pub struct FakeTransportFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last(&self) -> Option<Arc<FakeTransport>> {
        self.created.lock().unwrap().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn connect(&self, events: PeerEvents) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let transport = FakeTransport::build(Some(events));
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

/// Capture devices that hand out fresh tracks unless the device was denied.
#[derive(Default)]
pub struct FakeMedia {
    denied: Mutex<Vec<&'static str>>,
    requests: Mutex<Vec<MediaRequest>>,
    streams: Mutex<Vec<LocalStream>>,
}

impl FakeMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Denies every later request for the same device as `request`.
    pub fn deny(&self, request: MediaRequest) {
        self.denied.lock().unwrap().push(request.describe());
    }

    pub fn allow_all(&self) {
        self.denied.lock().unwrap().clear();
    }

    pub fn requests(&self) -> Vec<MediaRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Every stream handed out so far; clones share track state.
    pub fn streams(&self) -> Vec<LocalStream> {
        self.streams.lock().unwrap().clone()
    }

    pub fn all_tracks(&self) -> Vec<LocalTrack> {
        self.streams()
            .iter()
            .flat_map(|s| s.tracks().to_vec())
            .collect()
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn acquire(&self, request: MediaRequest) -> Result<LocalStream, MediaError> {
        self.requests.lock().unwrap().push(request);
        if self.denied.lock().unwrap().contains(&request.describe()) {
            return Err(MediaError::PermissionDenied(request.describe().to_owned()));
        }
        let mut sources = Vec::new();
        match request {
            MediaRequest::User { audio, video } => {
                if audio {
                    sources.push((TrackSource::Microphone, "Fake microphone"));
                }
                if video {
                    sources.push((TrackSource::Camera, "Fake camera"));
                }
            }
            MediaRequest::Display { audio } => {
                sources.push((TrackSource::Screen, "Screen 1"));
                if audio {
                    sources.push((TrackSource::ScreenAudio, "System audio"));
                }
            }
        }
        let stream = LocalStream::capture(&sources);
        self.streams.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

/// Keeps everything sent; can be closed to simulate a dead socket.
#[derive(Default)]
pub struct FakeSignaling {
    sent: Mutex<Vec<OutboundSignal>>,
    closed: AtomicBool,
}

impl FakeSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<OutboundSignal> {
        self.sent.lock().unwrap().clone()
    }

    /// Returns and forgets everything sent so far.
    pub fn take(&self) -> Vec<OutboundSignal> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn end_calls(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, OutboundSignal::EndCall { .. }))
            .count()
    }
}

impl SignalingChannel for FakeSignaling {
    fn send(&self, message: OutboundSignal) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalingError::Closed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Runs `message` through the relay wire format as the server would forward it from `from`.
pub fn relay(message: &OutboundSignal, from: &PeerProfile) -> InboundSignal {
    let mut frame = RelayFrame::encode(message).unwrap();
    if let Value::Object(data) = &mut frame.data {
        data.remove("target_user_id");
        data.insert("from_user_id".into(), json!(from.id));
        data.insert("from_user".into(), json!(from));
    }
    RelayFrame::parse(&frame.to_json().unwrap())
        .unwrap()
        .decode()
        .unwrap()
}
