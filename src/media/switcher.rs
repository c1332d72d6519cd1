use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{CallError, MediaError};
use crate::media::{LocalStream, LocalTrack, MediaDevices, MediaRequest};
use crate::peer::transport::{PeerEvent, PeerEvents, PeerTransport};

/// Spawns a task that reports `track` once the platform terminates it.
///
/// Stopping the track ourselves ends the task silently.
pub fn watch_platform_end(track: &LocalTrack, hook: PeerEvents) -> JoinHandle<()> {
    let track = track.clone();
    tokio::spawn(async move {
        if track.ended_by_platform().await {
            debug!(id = track.id(), label = track.label(), "track ended by platform");
            hook.emit(PeerEvent::LocalTrackEnded(track.id().to_owned()));
        }
    })
}

/// Swaps the outgoing video between camera and screen capture on a live call.
pub struct StreamSwitcher {
    media: Arc<dyn MediaDevices>,
    sharing: Option<String>,
    watcher: Option<JoinHandle<()>>,
}

impl StreamSwitcher {
    pub fn new(media: Arc<dyn MediaDevices>) -> Self {
        Self {
            media,
            sharing: None,
            watcher: None,
        }
    }

    /// Id of the screen track currently being sent, if any
    pub fn sharing_track(&self) -> Option<&str> {
        self.sharing.as_deref()
    }

    pub fn is_sharing(&self) -> bool {
        self.sharing.is_some()
    }

    /// Replaces the outgoing video with a fresh screen capture.
    ///
    /// On error nothing has changed: the previous track is still sent and live.
    pub async fn switch_to_screen(
        &mut self,
        transport: &dyn PeerTransport,
        stream: &mut LocalStream,
        hook: PeerEvents,
    ) -> Result<(), CallError> {
        let screen = self.acquire_video(MediaRequest::screen()).await?;
        carry_enabled(stream, &screen);
        if let Err(e) = transport.replace_video_track(&screen).await {
            screen.stop();
            return Err(e.into());
        }
        if let Some(previous) = stream.replace_video(screen.clone()) {
            previous.stop();
        }
        info!(id = screen.id(), label = screen.label(), "screen share started");

        self.cancel_watch();
        self.watcher = Some(watch_platform_end(&screen, hook));
        self.sharing = Some(screen.id().to_owned());
        Ok(())
    }

    /// Puts the camera back on the outgoing video sender and stops the screen track.
    pub async fn switch_to_camera(
        &mut self,
        transport: &dyn PeerTransport,
        stream: &mut LocalStream,
    ) -> Result<(), CallError> {
        let camera = self.acquire_video(MediaRequest::camera()).await?;
        carry_enabled(stream, &camera);
        if let Err(e) = transport.replace_video_track(&camera).await {
            camera.stop();
            return Err(e.into());
        }
        if let Some(previous) = stream.replace_video(camera) {
            previous.stop();
        }
        info!("switched back to camera");

        self.cancel_watch();
        self.sharing = None;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.cancel_watch();
        self.sharing = None;
    }

    async fn acquire_video(&self, request: MediaRequest) -> Result<LocalTrack, CallError> {
        let captured = self.media.acquire(request).await?;
        captured
            .into_video_track()
            .ok_or_else(|| MediaError::MissingTrack(request.describe().to_owned()).into())
    }

    fn cancel_watch(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

// A video the user turned off stays off across swaps.
fn carry_enabled(stream: &LocalStream, replacement: &LocalTrack) {
    if let Some(current) = stream.video_track() {
        replacement.set_enabled(current.is_enabled());
    }
}

impl Drop for StreamSwitcher {
    fn drop(&mut self) {
        self.cancel_watch();
    }
}
