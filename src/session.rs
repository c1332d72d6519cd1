//! The call state machine.
//!
//! One [`CallSession`] lives for the whole app. It is owned by the call loop
//! (see [`crate::commands`]) and handles one command, signal or transport
//! event at a time, so no call state is shared between tasks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CallConfig;
use crate::error::CallError;
use crate::events::CallEvents;
use crate::media::switcher::watch_platform_end;
use crate::media::{LocalStream, MediaDevices, MediaRequest, RemoteStream, StreamSwitcher};
use crate::peer::{
    CallKind, CandidateBatcher, ConnectionMonitor, IceCandidate, PeerEvent, PeerEvents, PeerId,
    PeerProfile, PeerTransport, PendingCandidateCache, SessionDescription, SessionEvent,
    TransportFactory,
};
use crate::signaling::{InboundSignal, OutboundSignal, SignalingChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    OutgoingNegotiating,
    IncomingRinging,
    IncomingNegotiating,
    Active,
    Ended,
}

impl CallState {
    /// `Idle` and `Ended` accept a new call; everything else is a call in progress.
    pub fn in_call(self) -> bool {
        !matches!(self, CallState::Idle | CallState::Ended)
    }
}

pub struct CallSession {
    signaling: Arc<dyn SignalingChannel>,
    media: Arc<dyn MediaDevices>,
    transports: Arc<dyn TransportFactory>,
    events: Arc<dyn CallEvents>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,

    state: CallState,
    /// Bumped on every call start and teardown; events tagged otherwise are stale
    call_id: u64,
    target: Option<PeerId>,
    kind: Option<CallKind>,
    pending_offer: Option<SessionDescription>,
    transport: Option<Arc<dyn PeerTransport>>,
    local_stream: Option<LocalStream>,
    remote_stream: RemoteStream,
    connected_at: Option<DateTime<Utc>>,

    candidates: PendingCandidateCache,
    batcher: CandidateBatcher,
    switcher: StreamSwitcher,
    monitor: ConnectionMonitor,
    /// Ends a screen-kind call when the platform stops the share
    share_hook: Option<JoinHandle<()>>,
}

impl CallSession {
    /// Creates an idle session and the receiver its transports report to.
    pub fn new(
        config: &CallConfig,
        signaling: Arc<dyn SignalingChannel>,
        media: Arc<dyn MediaDevices>,
        transports: Arc<dyn TransportFactory>,
        events: Arc<dyn CallEvents>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let batcher = CandidateBatcher::new(
            Arc::clone(&signaling),
            config.candidate_batch_size,
            config.batch_window(),
        );
        let session = Self {
            switcher: StreamSwitcher::new(Arc::clone(&media)),
            monitor: ConnectionMonitor::new(Arc::clone(&events), config.reconnect_grace()),
            signaling,
            media,
            transports,
            events,
            session_tx,
            state: CallState::Idle,
            call_id: 0,
            target: None,
            kind: None,
            pending_offer: None,
            transport: None,
            local_stream: None,
            remote_stream: RemoteStream::default(),
            connected_at: None,
            candidates: PendingCandidateCache::new(),
            batcher,
            share_hook: None,
        };
        (session, session_rx)
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn target(&self) -> Option<&PeerId> {
        self.target.as_ref()
    }

    pub fn kind(&self) -> Option<CallKind> {
        self.kind
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.local_stream.as_ref()
    }

    pub fn remote_stream(&self) -> &RemoteStream {
        &self.remote_stream
    }

    pub fn is_sharing_screen(&self) -> bool {
        self.switcher.is_sharing()
    }

    /// Places a call to `target`.
    ///
    /// Fails with [`CallError::Busy`] while another call is in progress; in
    /// that case nothing is sent. Any other failure tears the attempt down and
    /// is reported through `on_call_failed`.
    pub async fn start(&mut self, target: PeerId, kind: CallKind) -> Result<(), CallError> {
        if self.state.in_call() {
            warn!(%target, state = ?self.state, "call already in progress");
            return Err(CallError::Busy(self.state));
        }
        info!(%target, ?kind, "starting call");
        self.begin(target, kind, CallState::OutgoingNegotiating);

        if let Err(e) = self.negotiate_outgoing(kind).await {
            // sending the offer is the last step, so the peer never heard of this call
            warn!("outgoing call failed: {e}");
            self.teardown(false, CallState::Idle).await;
            self.events.on_call_failed(&e.to_string());
            return Err(e);
        }
        Ok(())
    }

    async fn negotiate_outgoing(&mut self, kind: CallKind) -> Result<(), CallError> {
        let stream = self.media.acquire(MediaRequest::for_call(kind)).await?;
        self.attach_local(stream);

        let transport = self.transports.connect(self.peer_events()).await?;
        self.transport = Some(Arc::clone(&transport));
        self.add_local_tracks(transport.as_ref()).await?;

        let offer = transport.create_offer().await?;
        let target = self.current_target()?;
        self.signaling.send(OutboundSignal::Offer {
            target,
            offer,
            kind,
        })?;
        debug!("offer sent, waiting for answer");
        Ok(())
    }

    /// Answers the ringing call with local media.
    pub async fn accept_incoming(&mut self) -> Result<(), CallError> {
        if self.state != CallState::IncomingRinging {
            debug!(state = ?self.state, "no incoming call to accept");
            return Err(CallError::InvalidState(self.state));
        }
        self.state = CallState::IncomingNegotiating;
        info!(target = ?self.target, "accepting call");

        if let Err(e) = self.negotiate_incoming().await {
            warn!("accepting call failed: {e}");
            self.teardown(true, CallState::Idle).await;
            self.events.on_call_failed(&e.to_string());
            return Err(e);
        }
        Ok(())
    }

    async fn negotiate_incoming(&mut self) -> Result<(), CallError> {
        let transport = self.current_transport()?;
        let offer = self
            .pending_offer
            .take()
            .ok_or(CallError::InvalidState(self.state))?;
        transport.set_remote_description(offer).await?;
        self.candidates.flush_to(transport.as_ref()).await;

        let kind = self.kind.unwrap_or_default();
        let stream = self.media.acquire(MediaRequest::for_call(kind)).await?;
        self.attach_local(stream);
        self.add_local_tracks(transport.as_ref()).await?;

        let answer = transport.create_answer().await?;
        let target = self.current_target()?;
        self.signaling
            .send(OutboundSignal::Answer { target, answer })?;
        self.activate();
        Ok(())
    }

    /// Hangs up, declines or cancels. No-op when there is no call.
    pub async fn end(&mut self) -> Result<(), CallError> {
        if !self.state.in_call() {
            debug!(state = ?self.state, "end requested without a call");
            return Ok(());
        }
        info!(target = ?self.target, "ending call");
        self.teardown(true, CallState::Ended).await;
        self.events.on_call_ended();
        Ok(())
    }

    /// Replaces the outgoing camera video with screen capture.
    pub async fn switch_to_screen(&mut self) -> Result<(), CallError> {
        let transport = self.active_transport()?;
        let hook = self.peer_events();
        let Some(stream) = self.local_stream.as_mut() else {
            return Err(CallError::InvalidState(self.state));
        };
        match self
            .switcher
            .switch_to_screen(transport.as_ref(), stream, hook)
            .await
        {
            Ok(()) => {
                self.events.on_local_stream_ready(stream);
                Ok(())
            }
            Err(e) => {
                warn!("switch to screen failed: {e}");
                self.events.on_track_switch_failed(&e.to_string());
                Err(e)
            }
        }
    }

    /// Puts the camera back on the outgoing video.
    pub async fn switch_to_camera(&mut self) -> Result<(), CallError> {
        let transport = self.active_transport()?;
        let Some(stream) = self.local_stream.as_mut() else {
            return Err(CallError::InvalidState(self.state));
        };
        match self.switcher.switch_to_camera(transport.as_ref(), stream).await {
            Ok(()) => {
                self.events.on_local_stream_ready(stream);
                Ok(())
            }
            Err(e) => {
                warn!("switch to camera failed: {e}");
                self.events.on_track_switch_failed(&e.to_string());
                Err(e)
            }
        }
    }

    /// Flips the microphone; returns `true` when it is now muted.
    pub fn toggle_mute(&mut self) -> bool {
        let Some(track) = self.local_stream.as_ref().and_then(|s| s.audio_track()) else {
            return false;
        };
        track.set_enabled(!track.is_enabled());
        debug!(muted = !track.is_enabled(), "microphone toggled");
        !track.is_enabled()
    }

    /// Flips the outgoing video; returns `true` when it is now off.
    pub fn toggle_video(&mut self) -> bool {
        let Some(track) = self.local_stream.as_ref().and_then(|s| s.video_track()) else {
            return false;
        };
        track.set_enabled(!track.is_enabled());
        debug!(off = !track.is_enabled(), "video toggled");
        !track.is_enabled()
    }

    pub async fn handle_signal(&mut self, signal: InboundSignal) -> Result<(), CallError> {
        match signal {
            InboundSignal::Offer {
                from,
                from_user,
                offer,
                kind,
            } => self.on_offer(from, from_user, offer, kind).await,
            InboundSignal::Answer { from, answer } => self.on_answer(from, answer).await,
            InboundSignal::IceCandidates { from, candidates } => {
                self.on_remote_candidates(from, candidates).await;
                Ok(())
            }
            InboundSignal::EndCall { from } => {
                self.on_remote_end(from).await;
                Ok(())
            }
            InboundSignal::Error { message } => {
                self.on_relay_error(message).await;
                Ok(())
            }
        }
    }

    async fn on_offer(
        &mut self,
        from: PeerId,
        from_user: PeerProfile,
        offer: SessionDescription,
        kind: CallKind,
    ) -> Result<(), CallError> {
        if self.state.in_call() {
            debug!(%from, state = ?self.state, "busy, dropping incoming offer");
            return Ok(());
        }
        info!(%from, ?kind, "incoming call");
        self.begin(from, kind, CallState::IncomingRinging);

        match self.transports.connect(self.peer_events()).await {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => {
                warn!("cannot create transport for incoming call: {e}");
                self.teardown(true, CallState::Idle).await;
                return Err(e.into());
            }
        }
        self.pending_offer = Some(offer);
        self.events.on_incoming_call(&from_user, kind);
        Ok(())
    }

    async fn on_answer(
        &mut self,
        from: Option<PeerId>,
        answer: SessionDescription,
    ) -> Result<(), CallError> {
        if self.state != CallState::OutgoingNegotiating || !self.is_current_peer(from.as_ref()) {
            debug!(?from, state = ?self.state, "ignoring unexpected answer");
            return Ok(());
        }
        let transport = self.current_transport()?;
        if let Err(e) = transport.set_remote_description(answer).await {
            warn!("cannot apply answer: {e}");
            self.teardown(true, CallState::Idle).await;
            self.events.on_call_failed(&e.to_string());
            return Err(e.into());
        }
        self.candidates.flush_to(transport.as_ref()).await;
        self.activate();
        Ok(())
    }

    async fn on_remote_candidates(&mut self, from: Option<PeerId>, candidates: Vec<IceCandidate>) {
        if !self.state.in_call() || !self.is_current_peer(from.as_ref()) {
            debug!(?from, count = candidates.len(), "dropping candidates for no call");
            return;
        }
        self.candidates
            .handle_incoming(self.transport.as_deref(), candidates)
            .await;
    }

    async fn on_remote_end(&mut self, from: Option<PeerId>) {
        if !self.state.in_call() || !self.is_current_peer(from.as_ref()) {
            debug!(?from, state = ?self.state, "ignoring stale end-call");
            return;
        }
        info!(target = ?self.target, "peer ended the call");
        self.teardown(false, CallState::Ended).await;
        self.events.on_call_ended();
    }

    async fn on_relay_error(&mut self, message: String) {
        if self.state != CallState::OutgoingNegotiating {
            debug!(state = ?self.state, "relay error outside of call setup: {message}");
            return;
        }
        warn!("relay refused the call: {message}");
        self.teardown(false, CallState::Idle).await;
        self.events.on_call_failed(&message);
    }

    pub async fn handle_session_event(&mut self, event: SessionEvent) {
        if event.call_id != self.call_id {
            debug!(
                event_call = event.call_id,
                current = self.call_id,
                "dropping event of a finished call"
            );
            return;
        }
        match event.event {
            PeerEvent::LocalCandidate(candidate) => self.batcher.enqueue(candidate),
            PeerEvent::GatheringComplete => self.batcher.flush(),
            PeerEvent::RemoteTrack(track) => {
                if self.remote_stream.add(track) {
                    self.events.on_remote_stream_ready(&self.remote_stream);
                }
            }
            PeerEvent::StateChanged(state) => {
                debug!(?state, "connection state");
                self.monitor.observe(state);
            }
            PeerEvent::LocalTrackEnded(id) => self.on_local_track_ended(id).await,
        }
    }

    async fn on_local_track_ended(&mut self, id: String) {
        if self.switcher.sharing_track() == Some(id.as_str()) {
            info!("screen share stopped from the system, back to camera");
            // failure is reported through on_track_switch_failed
            if self.switch_to_camera().await.is_err() {
                self.switcher.reset();
            }
            return;
        }
        let is_call_video = self
            .local_stream
            .as_ref()
            .and_then(|s| s.video_track())
            .is_some_and(|t| t.id() == id);
        if self.kind == Some(CallKind::Screen) && is_call_video {
            info!("shared screen closed, ending call");
            let _ = self.end().await;
        }
    }

    fn begin(&mut self, target: PeerId, kind: CallKind, state: CallState) {
        self.call_id += 1;
        self.batcher.bind(target.clone());
        self.target = Some(target);
        self.kind = Some(kind);
        self.state = state;
    }

    fn activate(&mut self) {
        self.state = CallState::Active;
        self.connected_at = Some(Utc::now());
        info!(target = ?self.target, "call active");
    }

    fn attach_local(&mut self, stream: LocalStream) {
        if self.kind == Some(CallKind::Screen) {
            if let Some(video) = stream.video_track() {
                self.share_hook = Some(watch_platform_end(video, self.peer_events()));
            }
        }
        self.events.on_local_stream_ready(&stream);
        self.local_stream = Some(stream);
    }

    async fn add_local_tracks(&self, transport: &dyn PeerTransport) -> Result<(), CallError> {
        let Some(stream) = &self.local_stream else {
            return Ok(());
        };
        for track in stream.tracks() {
            transport.add_track(track).await?;
        }
        Ok(())
    }

    /// Releases everything the call holds and moves to `next`.
    ///
    /// Local tracks are stopped before the transport is closed. End-call goes
    /// out only when `notify` is set and a peer is known.
    async fn teardown(&mut self, notify: bool, next: CallState) {
        if let Some(stream) = self.local_stream.take() {
            stream.stop_all();
        }
        self.remote_stream.stop_all();
        self.remote_stream = RemoteStream::default();
        if let Some(hook) = self.share_hook.take() {
            hook.abort();
        }
        self.switcher.reset();
        self.batcher.reset();
        self.monitor.reset();
        self.candidates.clear();
        self.pending_offer = None;

        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("closing transport failed: {e}");
            }
        }

        let target = self.target.take();
        if notify {
            if let Some(target) = target {
                if let Err(e) = self.signaling.send(OutboundSignal::EndCall { target }) {
                    warn!("could not notify peer about call end: {e}");
                }
            }
        }
        if let Some(since) = self.connected_at.take() {
            let secs = (Utc::now() - since).num_seconds();
            info!("call lasted {secs}s");
        }
        self.kind = None;
        self.call_id += 1;
        self.state = next;
    }

    fn peer_events(&self) -> PeerEvents {
        PeerEvents::new(self.call_id, self.session_tx.clone())
    }

    fn is_current_peer(&self, from: Option<&PeerId>) -> bool {
        match (from, &self.target) {
            (Some(from), Some(target)) => from == target,
            _ => true,
        }
    }

    fn current_target(&self) -> Result<PeerId, CallError> {
        self.target.clone().ok_or(CallError::InvalidState(self.state))
    }

    fn current_transport(&self) -> Result<Arc<dyn PeerTransport>, CallError> {
        self.transport
            .clone()
            .ok_or(CallError::InvalidState(self.state))
    }

    fn active_transport(&self) -> Result<Arc<dyn PeerTransport>, CallError> {
        if self.state != CallState::Active {
            debug!(state = ?self.state, "track switch outside of an active call");
            return Err(CallError::InvalidState(self.state));
        }
        self.current_transport()
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if let Some(hook) = self.share_hook.take() {
            hook.abort();
        }
        if let Some(stream) = self.local_stream.take() {
            stream.stop_all();
        }
        self.remote_stream.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CallEvent, EventEmitter};
    use crate::media::{ReadyState, TrackSource};
    use crate::testing::{relay, FakeMedia, FakeSignaling, FakeTransportFactory, TransportOp};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Peer {
        session: CallSession,
        session_rx: UnboundedReceiver<SessionEvent>,
        ui: UnboundedReceiver<CallEvent>,
        signaling: Arc<FakeSignaling>,
        media: Arc<FakeMedia>,
        transports: Arc<FakeTransportFactory>,
        profile: PeerProfile,
    }

    impl Peer {
        fn new(id: i64, name: &str) -> Self {
            let signaling = FakeSignaling::new();
            let media = FakeMedia::new();
            let transports = FakeTransportFactory::new();
            let (emitter, ui) = EventEmitter::channel();
            let (session, session_rx) = CallSession::new(
                &CallConfig::default(),
                signaling.clone(),
                media.clone(),
                transports.clone(),
                Arc::new(emitter),
            );
            Self {
                session,
                session_rx,
                ui,
                signaling,
                media,
                transports,
                profile: PeerProfile {
                    id: PeerId::from(id),
                    username: name.into(),
                    avatar: None,
                },
            }
        }

        fn id(&self) -> PeerId {
            self.profile.id.clone()
        }

        fn ui_events(&mut self) -> Vec<&'static str> {
            let mut seen = Vec::new();
            while let Ok(event) = self.ui.try_recv() {
                seen.push(match event {
                    CallEvent::IncomingCall { .. } => "incoming",
                    CallEvent::LocalStreamReady(_) => "local",
                    CallEvent::RemoteStreamReady(_) => "remote",
                    CallEvent::CallEnded => "ended",
                    CallEvent::TrackSwitchFailed(_) => "switch-failed",
                    CallEvent::CallFailed(_) => "failed",
                    CallEvent::ConnectionProblem => "problem",
                    CallEvent::ConnectionRecovered => "recovered",
                    CallEvent::ConnectionFailed => "connection-failed",
                });
            }
            seen
        }

        /// Handles transport events that are already queued.
        async fn pump(&mut self) {
            while let Ok(event) = self.session_rx.try_recv() {
                self.session.handle_session_event(event).await;
            }
        }

        /// Hands everything `self` sent to `to`, as the relay would.
        async fn deliver_to(&self, to: &mut Peer) {
            for message in self.signaling.take() {
                to.session
                    .handle_signal(relay(&message, &self.profile))
                    .await
                    .unwrap();
            }
        }

        fn video(&self) -> crate::media::LocalTrack {
            self.session
                .local_stream()
                .and_then(|s| s.video_track())
                .cloned()
                .unwrap()
        }
    }

    async fn connect_pair(kind: CallKind) -> (Peer, Peer) {
        let mut a = Peer::new(1, "alice");
        let mut b = Peer::new(2, "bob");
        a.session.start(b.id(), kind).await.unwrap();
        a.deliver_to(&mut b).await;
        b.session.accept_incoming().await.unwrap();
        b.deliver_to(&mut a).await;
        (a, b)
    }

    fn offer_from(from: &PeerProfile, to: PeerId, sdp: &str) -> InboundSignal {
        relay(
            &OutboundSignal::Offer {
                target: to,
                offer: SessionDescription::offer(sdp),
                kind: CallKind::Video,
            },
            from,
        )
    }

    #[tokio::test]
    async fn second_start_is_rejected_as_busy() {
        let mut a = Peer::new(1, "alice");
        a.session.start(PeerId::from(2), CallKind::Video).await.unwrap();
        assert_eq!(a.session.state(), CallState::OutgoingNegotiating);

        let err = a
            .session
            .start(PeerId::from(3), CallKind::Audio)
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::Busy(CallState::OutgoingNegotiating)));
        assert_eq!(a.signaling.sent().len(), 1);
        assert_eq!(a.transports.count(), 1);
        assert_eq!(a.session.target(), Some(&PeerId::from(2)));
    }

    #[tokio::test]
    async fn outgoing_call_requests_camera_and_microphone() {
        let mut a = Peer::new(1, "alice");
        a.session.start(PeerId::from(2), CallKind::Audio).await.unwrap();

        assert_eq!(
            a.media.requests(),
            vec![MediaRequest::User {
                audio: true,
                video: true
            }]
        );
        let transport = a.transports.last().unwrap();
        let ops = transport.ops();
        assert_eq!(
            ops.iter()
                .filter(|op| matches!(op, TransportOp::AddTrack(_)))
                .count(),
            2
        );
        assert_eq!(ops.last(), Some(&TransportOp::CreateOffer));
        assert!(matches!(
            a.signaling.sent().as_slice(),
            [OutboundSignal::Offer {
                kind: CallKind::Audio,
                ..
            }]
        ));
        assert_eq!(a.ui_events(), vec!["local"]);
    }

    #[tokio::test]
    async fn incoming_offer_rings_without_media() {
        let alice = Peer::new(1, "alice");
        let mut b = Peer::new(2, "bob");

        b.session
            .handle_signal(offer_from(&alice.profile, b.id(), "v=0 a"))
            .await
            .unwrap();

        assert_eq!(b.session.state(), CallState::IncomingRinging);
        assert_eq!(b.session.target(), Some(&alice.id()));
        assert!(b.media.requests().is_empty());
        assert!(b.signaling.sent().is_empty());
        assert_eq!(b.ui_events(), vec!["incoming"]);
    }

    #[tokio::test]
    async fn offer_while_ringing_is_dropped() {
        let alice = Peer::new(1, "alice");
        let carol = Peer::new(3, "carol");
        let mut b = Peer::new(2, "bob");

        b.session
            .handle_signal(offer_from(&alice.profile, b.id(), "v=0 a"))
            .await
            .unwrap();
        b.session
            .handle_signal(offer_from(&carol.profile, b.id(), "v=0 c"))
            .await
            .unwrap();

        assert_eq!(b.session.target(), Some(&alice.id()));
        assert_eq!(b.transports.count(), 1);
        assert_eq!(b.ui_events(), vec!["incoming"]);

        // carol hanging up must not end alice's call
        b.session
            .handle_signal(InboundSignal::EndCall {
                from: Some(carol.id()),
            })
            .await
            .unwrap();
        assert_eq!(b.session.state(), CallState::IncomingRinging);
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let mut a = Peer::new(1, "alice");
        a.session.start(PeerId::from(2), CallKind::Video).await.unwrap();
        let transport = a.transports.last().unwrap();

        a.session.end().await.unwrap();
        a.session.end().await.unwrap();

        assert_eq!(a.session.state(), CallState::Ended);
        assert_eq!(a.signaling.end_calls(), 1);
        assert!(transport.is_closed());
        assert!(a
            .media
            .all_tracks()
            .iter()
            .all(|t| t.ready_state() == ReadyState::Stopped));
        assert_eq!(a.ui_events(), vec!["local", "ended"]);
        assert!(a.session.target().is_none());
    }

    #[tokio::test]
    async fn end_without_call_sends_nothing() {
        let mut a = Peer::new(1, "alice");
        a.session.end().await.unwrap();

        assert_eq!(a.session.state(), CallState::Idle);
        assert!(a.signaling.sent().is_empty());
        assert!(a.ui_events().is_empty());
    }

    #[tokio::test]
    async fn early_candidates_are_applied_after_the_offer() {
        let alice = Peer::new(1, "alice");
        let mut b = Peer::new(2, "bob");
        let candidates = |names: &[&str]| OutboundSignal::IceCandidates {
            target: PeerId::from(2),
            candidates: names.iter().map(|n| IceCandidate::new(*n)).collect(),
        };

        b.session
            .handle_signal(offer_from(&alice.profile, b.id(), "v=0 a"))
            .await
            .unwrap();
        b.session
            .handle_signal(relay(&candidates(&["c1", "c2"]), &alice.profile))
            .await
            .unwrap();
        let transport = b.transports.last().unwrap();
        assert!(transport.applied_candidates().is_empty());

        b.session.accept_incoming().await.unwrap();
        b.session
            .handle_signal(relay(&candidates(&["c3"]), &alice.profile))
            .await
            .unwrap();

        assert_eq!(transport.applied_candidates(), vec!["c1", "c2", "c3"]);
        let ops = transport.ops();
        let remote_at = ops
            .iter()
            .position(|op| *op == TransportOp::SetRemote(crate::peer::SdpKind::Offer))
            .unwrap();
        let first_candidate_at = ops
            .iter()
            .position(|op| *op == TransportOp::AddCandidate("c1".into()))
            .unwrap();
        assert!(remote_at < first_candidate_at);
    }

    #[tokio::test]
    async fn call_between_two_peers() {
        let (mut a, mut b) = connect_pair(CallKind::Video).await;
        assert_eq!(a.session.state(), CallState::Active);
        assert_eq!(b.session.state(), CallState::Active);
        assert!(b.session.local_stream().is_some());

        // a full batch of local candidates reaches the other side at once
        let a_transport = a.transports.last().unwrap();
        for i in 0..5 {
            a_transport.emit(PeerEvent::LocalCandidate(IceCandidate::new(format!("a{i}"))));
        }
        a.pump().await;
        a.deliver_to(&mut b).await;
        let b_transport = b.transports.last().unwrap();
        assert_eq!(b_transport.applied_candidates().len(), 5);

        a.session.end().await.unwrap();
        a.deliver_to(&mut b).await;

        assert_eq!(a.session.state(), CallState::Ended);
        assert_eq!(b.session.state(), CallState::Ended);
        assert!(b.signaling.sent().is_empty(), "no end-call echo");
        assert!(b_transport.is_closed());
        assert_eq!(a.ui_events().last(), Some(&"ended"));
        assert_eq!(b.ui_events(), vec!["incoming", "local", "ended"]);
    }

    #[tokio::test]
    async fn denied_media_aborts_start_quietly() {
        let mut a = Peer::new(1, "alice");
        a.media.deny(MediaRequest::camera());

        let err = a
            .session
            .start(PeerId::from(2), CallKind::Video)
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::Media(_)));
        assert_eq!(a.session.state(), CallState::Idle);
        assert!(a.signaling.sent().is_empty());
        assert_eq!(a.ui_events(), vec!["failed"]);

        // and a new call can be placed afterwards
        a.media.allow_all();
        a.session.start(PeerId::from(2), CallKind::Video).await.unwrap();
    }

    #[tokio::test]
    async fn denied_media_on_accept_tells_the_caller() {
        let alice = Peer::new(1, "alice");
        let mut b = Peer::new(2, "bob");
        b.media.deny(MediaRequest::camera());
        b.session
            .handle_signal(offer_from(&alice.profile, b.id(), "v=0 a"))
            .await
            .unwrap();

        assert!(b.session.accept_incoming().await.is_err());

        assert_eq!(b.session.state(), CallState::Idle);
        assert_eq!(
            b.signaling.sent(),
            vec![OutboundSignal::EndCall { target: alice.id() }]
        );
        assert_eq!(b.ui_events(), vec!["incoming", "failed"]);
    }

    #[tokio::test]
    async fn malformed_answer_aborts_negotiation() {
        let mut a = Peer::new(1, "alice");
        a.session.start(PeerId::from(2), CallKind::Video).await.unwrap();

        let result = a
            .session
            .handle_signal(InboundSignal::Answer {
                from: Some(PeerId::from(2)),
                answer: SessionDescription::answer("garbage"),
            })
            .await;

        assert!(matches!(result, Err(CallError::Transport(_))));
        assert_eq!(a.session.state(), CallState::Idle);
        assert_eq!(a.signaling.end_calls(), 1);
        assert_eq!(a.ui_events(), vec!["local", "failed"]);
    }

    #[tokio::test]
    async fn relay_error_fails_outgoing_call_without_end_call() {
        let mut a = Peer::new(1, "alice");
        a.session.start(PeerId::from(2), CallKind::Video).await.unwrap();
        a.signaling.take();

        a.session
            .handle_signal(InboundSignal::Error {
                message: "user is offline".into(),
            })
            .await
            .unwrap();

        assert_eq!(a.session.state(), CallState::Idle);
        assert!(a.signaling.sent().is_empty());
        assert_eq!(a.ui_events(), vec!["local", "failed"]);
    }

    #[tokio::test]
    async fn answer_outside_negotiation_is_ignored() {
        let mut a = Peer::new(1, "alice");
        a.session
            .handle_signal(InboundSignal::Answer {
                from: None,
                answer: SessionDescription::answer("v=0"),
            })
            .await
            .unwrap();
        assert_eq!(a.session.state(), CallState::Idle);
        assert_eq!(a.transports.count(), 0);
    }

    #[tokio::test]
    async fn failed_screen_switch_keeps_call_and_track() {
        let (mut a, _b) = connect_pair(CallKind::Video).await;
        a.ui_events();
        let camera = a.video();
        a.media.deny(MediaRequest::screen());

        assert!(a.session.switch_to_screen().await.is_err());

        assert_eq!(a.session.state(), CallState::Active);
        assert_eq!(a.video().id(), camera.id());
        assert!(camera.is_live());
        assert!(!a.session.is_sharing_screen());
        assert_eq!(a.ui_events(), vec!["switch-failed"]);
    }

    #[tokio::test]
    async fn screen_switch_needs_active_call() {
        let mut a = Peer::new(1, "alice");
        a.session.start(PeerId::from(2), CallKind::Video).await.unwrap();

        let err = a.session.switch_to_screen().await.unwrap_err();
        assert!(matches!(err, CallError::InvalidState(CallState::OutgoingNegotiating)));
    }

    #[tokio::test]
    async fn stopping_share_from_the_system_returns_to_camera() {
        let (mut a, _b) = connect_pair(CallKind::Video).await;
        a.session.switch_to_screen().await.unwrap();
        let screen = a.video();
        assert_eq!(screen.source(), TrackSource::Screen);

        screen.end();
        let event = a.session_rx.recv().await.unwrap();
        a.session.handle_session_event(event).await;

        assert_eq!(a.session.state(), CallState::Active);
        assert_eq!(a.video().source(), TrackSource::Camera);
        assert!(!a.session.is_sharing_screen());
    }

    #[tokio::test]
    async fn screen_call_ends_when_share_stops() {
        let (mut a, mut b) = connect_pair(CallKind::Screen).await;
        let screen = a.video();
        assert_eq!(screen.source(), TrackSource::Screen);

        screen.end();
        let event = a.session_rx.recv().await.unwrap();
        a.session.handle_session_event(event).await;
        a.deliver_to(&mut b).await;

        assert_eq!(a.session.state(), CallState::Ended);
        assert_eq!(b.session.state(), CallState::Ended);
    }

    #[tokio::test]
    async fn toggles_flip_local_tracks() {
        let mut a = Peer::new(1, "alice");
        assert!(!a.session.toggle_mute());

        a.session.start(PeerId::from(2), CallKind::Video).await.unwrap();
        assert!(a.session.toggle_mute());
        assert!(!a.session.toggle_mute());
        assert!(a.session.toggle_video());
        assert!(!a.video().is_enabled());
    }

    #[tokio::test]
    async fn remote_tracks_are_announced_once() {
        let (mut a, _b) = connect_pair(CallKind::Video).await;
        a.ui_events();
        let transport = a.transports.last().unwrap();
        let track = crate::media::RemoteTrack::new("r1", crate::media::TrackKind::Video, "s");

        transport.emit(PeerEvent::RemoteTrack(track.clone()));
        transport.emit(PeerEvent::RemoteTrack(track));
        a.pump().await;

        assert_eq!(a.ui_events(), vec!["remote"]);
        assert_eq!(a.session.remote_stream().tracks().len(), 1);
    }

    #[tokio::test]
    async fn events_of_a_finished_call_are_dropped() {
        let (mut a, _b) = connect_pair(CallKind::Video).await;
        let old = a.transports.last().unwrap();
        a.session.end().await.unwrap();
        a.ui_events();

        old.emit(PeerEvent::RemoteTrack(crate::media::RemoteTrack::new(
            "late",
            crate::media::TrackKind::Audio,
            "s",
        )));
        a.pump().await;

        assert!(a.session.remote_stream().is_empty());
        assert!(a.ui_events().is_empty());
    }

    #[tokio::test]
    async fn dropping_the_session_releases_devices() {
        let (a, _b) = connect_pair(CallKind::Video).await;
        let media = a.media.clone();
        assert!(media.all_tracks().iter().all(|t| t.is_live()));

        drop(a);

        assert!(media
            .all_tracks()
            .iter()
            .all(|t| t.ready_state() == ReadyState::Stopped));
    }

    #[tokio::test]
    async fn closed_relay_fails_start_and_releases_media() {
        let mut a = Peer::new(1, "alice");
        a.signaling.close();

        let err = a
            .session
            .start(PeerId::from(2), CallKind::Video)
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::Signaling(_)));
        assert_eq!(a.session.state(), CallState::Idle);
        assert!(a.transports.last().unwrap().is_closed());
        assert!(a
            .media
            .all_tracks()
            .iter()
            .all(|t| t.ready_state() == ReadyState::Stopped));
        assert_eq!(a.ui_events(), vec!["local", "failed"]);
    }

    #[tokio::test]
    async fn hangup_completes_when_relay_is_gone() {
        let (mut a, _b) = connect_pair(CallKind::Video).await;
        a.ui_events();
        a.signaling.close();

        a.session.end().await.unwrap();

        assert_eq!(a.session.state(), CallState::Ended);
        assert!(a.signaling.sent().is_empty());
        assert!(a.transports.last().unwrap().is_closed());
        assert_eq!(a.ui_events(), vec!["ended"]);
    }

    #[tokio::test]
    async fn share_flag_clears_when_camera_cannot_take_over() {
        let (mut a, _b) = connect_pair(CallKind::Video).await;
        a.session.switch_to_screen().await.unwrap();
        a.ui_events();
        let screen = a.video();
        a.media.deny(MediaRequest::camera());

        screen.end();
        let event = a.session_rx.recv().await.unwrap();
        a.session.handle_session_event(event).await;

        assert_eq!(a.session.state(), CallState::Active);
        assert!(!a.session.is_sharing_screen());
        assert_eq!(a.ui_events(), vec!["switch-failed"]);
    }
}
