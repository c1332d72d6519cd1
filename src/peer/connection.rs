use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::config::CallConfig;
use crate::error::TransportError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::peer::transport::{
    ConnectionState, PeerEvent, PeerEvents, PeerTransport, TransportFactory,
};
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};

/// Builds one `RTCPeerConnection` per call from a [`CallConfig`].
pub struct WebRtcTransportFactory {
    config: CallConfig,
}

impl WebRtcTransportFactory {
    pub fn new(config: CallConfig) -> Self {
        Self { config }
    }

    fn rtc_config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.config.rtc_ice_servers(),
            ice_candidate_pool_size: self.config.ice_candidate_pool_size,
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn connect(&self, events: PeerEvents) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let pc = Arc::new(api.new_peer_connection(self.rtc_config()).await?);
        info!(call_id = events.call_id(), "peer connection created");

        attach_handlers(&pc, events);
        Ok(Arc::new(WebRtcTransport { pc }))
    }
}

fn attach_handlers(pc: &Arc<RTCPeerConnection>, events: PeerEvents) {
    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        Box::pin(async move {
            let Some(cand) = cand else {
                debug!("ICE gathering complete");
                events.emit(PeerEvent::GatheringComplete);
                return;
            };
            match cand.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate::from(init);
                    dump_candidate("local", &candidate);
                    events.emit(PeerEvent::LocalCandidate(candidate));
                }
                Err(e) => warn!("failed to serialize local candidate: {e}"),
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(|state| {
        debug!("ICE gathering state changed to {state:?}");
        Box::pin(async {})
    }));

    let track_events = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            let remote = RemoteTrack::new(track.id(), kind, track.stream_id());
            info!(id = %remote.id, kind = ?remote.kind, "remote track received");
            track_events.emit(PeerEvent::RemoteTrack(remote));
            Box::pin(async {})
        },
    ));

    // weak so the handler does not keep its own connection alive
    let pc_stats: Weak<RTCPeerConnection> = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("peer connection state changed to {st:?}");
        let state = match st {
            RTCPeerConnectionState::New => ConnectionState::New,
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
            _ => return Box::pin(async {}),
        };
        events.emit(PeerEvent::StateChanged(state));

        if matches!(state, ConnectionState::Disconnected | ConnectionState::Failed) {
            if let Some(pc) = pc_stats.upgrade() {
                tokio::spawn(async move { dump_selected_pair(&pc, "before-fail").await });
            }
        }
        Box::pin(async {})
    }));
}

/// [`PeerTransport`] over a webrtc-rs peer connection
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcTransport {
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| TransportError::SessionDescription(e.to_string()))
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        let sender = self.pc.add_track(track.rtp_track()).await?;
        debug!(id = track.id(), kind = ?track.kind(), "local track attached");

        // RTCP has to be drained for the interceptors to keep working
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        let desc = to_rtc(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| TransportError::SessionDescription(e.to_string()))
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| TransportError::Candidate(e.to_string()))
    }

    async fn replace_video_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        for sender in self.pc.get_senders().await {
            let Some(current) = sender.track().await else {
                continue;
            };
            if current.kind() == RTPCodecType::Video {
                sender.replace_track(Some(track.rtp_track())).await?;
                return Ok(());
            }
        }
        Err(TransportError::NoVideoSender)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc.close().await?;
        Ok(())
    }
}
