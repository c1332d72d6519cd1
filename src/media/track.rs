use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;
use tokio::sync::watch;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Where a local track's samples come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
    ScreenAudio,
}

impl TrackSource {
    pub fn kind(self) -> TrackKind {
        match self {
            TrackSource::Microphone | TrackSource::ScreenAudio => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Live,
    /// Stopped by us
    Stopped,
    /// Terminated by the platform, e.g. the OS "stop sharing" control
    Ended,
}

/// A locally captured track. Clones share enabled/ready state.
///
/// The capture driver writes samples into [`LocalTrack::sample_track`]; the
/// call engine only attaches, swaps and stops tracks.
#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    source: TrackSource,
    label: String,
    sample: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
    ready: Arc<watch::Sender<ReadyState>>,
}

impl LocalTrack {
    pub fn new(source: TrackSource, label: impl Into<String>, stream_id: &str) -> Self {
        let id = random_id();
        let codec = match source.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90_000,
                ..Default::default()
            },
        };
        let sample = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.clone(),
            stream_id.to_owned(),
        ));
        let (ready, _) = watch::channel(ReadyState::Live);
        Self {
            id,
            source,
            label: label.into(),
            sample,
            enabled: Arc::new(AtomicBool::new(true)),
            ready: Arc::new(ready),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.source.kind()
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        self.sample.clone()
    }

    pub fn rtp_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.sample.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.ready.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.ready_state() == ReadyState::Live
    }

    /// Releases the device. Does not fire the platform-end hook.
    pub fn stop(&self) {
        self.ready.send_if_modified(|state| {
            if *state == ReadyState::Live {
                *state = ReadyState::Stopped;
                true
            } else {
                false
            }
        });
    }

    /// Called by the capture driver when the platform terminates the track.
    pub fn end(&self) {
        self.ready.send_if_modified(|state| {
            if *state == ReadyState::Live {
                *state = ReadyState::Ended;
                true
            } else {
                false
            }
        });
    }

    /// Resolves once the track leaves `Live`; `true` when the platform ended it.
    pub async fn ended_by_platform(&self) -> bool {
        let mut rx = self.ready.subscribe();
        let ended = match rx.wait_for(|state| *state != ReadyState::Live).await {
            Ok(state) => *state == ReadyState::Ended,
            Err(_) => false,
        };
        ended
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("label", &self.label)
            .field("enabled", &self.is_enabled())
            .field("ready", &self.ready_state())
            .finish()
    }
}

/// Tracks returned by one capture request
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Builds a stream with one fresh track per `(source, label)` pair.
    pub fn capture(sources: &[(TrackSource, &str)]) -> Self {
        let id = random_id();
        let tracks = sources
            .iter()
            .map(|(source, label)| LocalTrack::new(*source, *label, &id))
            .collect();
        Self { id, tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn audio_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    /// Swaps the video track for `track`, returning the previous one.
    pub fn replace_video(&mut self, track: LocalTrack) -> Option<LocalTrack> {
        match self.tracks.iter().position(|t| t.kind() == TrackKind::Video) {
            Some(idx) => Some(std::mem::replace(&mut self.tracks[idx], track)),
            None => {
                self.tracks.push(track);
                None
            }
        }
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Stops and drops every track except the first video track.
    pub fn into_video_track(self) -> Option<LocalTrack> {
        let mut video = None;
        for track in self.tracks {
            if video.is_none() && track.kind() == TrackKind::Video {
                video = Some(track);
            } else {
                track.stop();
            }
        }
        video
    }
}

/// A track received from the peer; owned by the transport.
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: String,
    stopped: Arc<AtomicBool>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, stream_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            stream_id: stream_id.into(),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Everything received from the peer, as shown by the UI
#[derive(Debug, Clone, Default)]
pub struct RemoteStream {
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    /// Adds `track` unless a track with the same id is already present.
    pub fn add(&mut self, track: RemoteTrack) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
