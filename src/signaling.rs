//! Messages exchanged with the signaling relay and their wire encoding.
//!
//! The relay is the chat server's socket: it forwards `webrtc_*` events
//! between the two participants without looking at their content.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::SignalingError;
use crate::peer::types::{CallKind, IceCandidate, PeerId, PeerProfile, SessionDescription};

pub const EVENT_OFFER: &str = "webrtc_offer";
pub const EVENT_ANSWER: &str = "webrtc_answer";
pub const EVENT_ICE_CANDIDATE: &str = "webrtc_ice_candidate";
pub const EVENT_END_CALL: &str = "webrtc_end_call";
pub const EVENT_ERROR: &str = "webrtc_error";

/// Message sent to the peer through the relay
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundSignal {
    Offer {
        target: PeerId,
        offer: SessionDescription,
        kind: CallKind,
    },
    Answer {
        target: PeerId,
        answer: SessionDescription,
    },
    IceCandidates {
        target: PeerId,
        candidates: Vec<IceCandidate>,
    },
    EndCall {
        target: PeerId,
    },
}

impl OutboundSignal {
    pub fn target(&self) -> &PeerId {
        match self {
            OutboundSignal::Offer { target, .. }
            | OutboundSignal::Answer { target, .. }
            | OutboundSignal::IceCandidates { target, .. }
            | OutboundSignal::EndCall { target } => target,
        }
    }

    pub fn event(&self) -> &'static str {
        match self {
            OutboundSignal::Offer { .. } => EVENT_OFFER,
            OutboundSignal::Answer { .. } => EVENT_ANSWER,
            OutboundSignal::IceCandidates { .. } => EVENT_ICE_CANDIDATE,
            OutboundSignal::EndCall { .. } => EVENT_END_CALL,
        }
    }
}

/// Message delivered by the relay. `from` is absent when the relay omits it.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundSignal {
    Offer {
        from: PeerId,
        from_user: PeerProfile,
        offer: SessionDescription,
        kind: CallKind,
    },
    Answer {
        from: Option<PeerId>,
        answer: SessionDescription,
    },
    IceCandidates {
        from: Option<PeerId>,
        candidates: Vec<IceCandidate>,
    },
    EndCall {
        from: Option<PeerId>,
    },
    /// The relay refused to forward something we sent
    Error {
        message: String,
    },
}

/// Outgoing half of the relay connection. Sending never blocks.
pub trait SignalingChannel: Send + Sync {
    fn send(&self, message: OutboundSignal) -> Result<(), SignalingError>;
}

#[derive(Serialize)]
struct OfferOut<'a> {
    target_user_id: &'a PeerId,
    offer: &'a SessionDescription,
    call_type: CallKind,
}

#[derive(Serialize)]
struct AnswerOut<'a> {
    target_user_id: &'a PeerId,
    answer: &'a SessionDescription,
}

#[derive(Serialize)]
struct CandidatesOut<'a> {
    target_user_id: &'a PeerId,
    candidates: &'a [IceCandidate],
}

#[derive(Serialize)]
struct EndCallOut<'a> {
    target_user_id: &'a PeerId,
}

#[derive(Deserialize)]
struct OfferIn {
    from_user_id: PeerId,
    #[serde(default)]
    from_user: Option<PeerProfile>,
    offer: SessionDescription,
    #[serde(default)]
    call_type: Option<CallKind>,
}

#[derive(Deserialize)]
struct AnswerIn {
    #[serde(default)]
    from_user_id: Option<PeerId>,
    answer: SessionDescription,
}

#[derive(Deserialize)]
struct CandidatesIn {
    #[serde(default)]
    from_user_id: Option<PeerId>,
    #[serde(default)]
    candidates: Option<Vec<IceCandidate>>,
    /// Older clients send one candidate per message
    #[serde(default)]
    candidate: Option<IceCandidate>,
}

#[derive(Deserialize, Default)]
struct EndCallIn {
    #[serde(default)]
    from_user_id: Option<PeerId>,
}

#[derive(Deserialize)]
struct ErrorIn {
    #[serde(default)]
    error: String,
}

/// One socket event: `{"event": "webrtc_offer", "data": {...}}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RelayFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl RelayFrame {
    pub fn encode(message: &OutboundSignal) -> Result<Self, SignalingError> {
        let data = match message {
            OutboundSignal::Offer {
                target,
                offer,
                kind,
            } => serde_json::to_value(OfferOut {
                target_user_id: target,
                offer,
                call_type: *kind,
            })?,
            OutboundSignal::Answer { target, answer } => serde_json::to_value(AnswerOut {
                target_user_id: target,
                answer,
            })?,
            OutboundSignal::IceCandidates { target, candidates } => {
                if candidates.is_empty() {
                    return Err(SignalingError::EmptyCandidates(EVENT_ICE_CANDIDATE.into()));
                }
                serde_json::to_value(CandidatesOut {
                    target_user_id: target,
                    candidates,
                })?
            }
            OutboundSignal::EndCall { target } => serde_json::to_value(EndCallOut {
                target_user_id: target,
            })?,
        };
        Ok(Self {
            event: message.event().to_owned(),
            data,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, SignalingError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(self) -> Result<InboundSignal, SignalingError> {
        let RelayFrame { event, data } = self;
        match event.as_str() {
            EVENT_OFFER => {
                let msg: OfferIn = payload(&event, data)?;
                let from_user = msg.from_user.unwrap_or_else(|| PeerProfile {
                    id: msg.from_user_id.clone(),
                    username: String::new(),
                    avatar: None,
                });
                Ok(InboundSignal::Offer {
                    from: msg.from_user_id,
                    from_user,
                    offer: msg.offer,
                    kind: msg.call_type.unwrap_or_default(),
                })
            }
            EVENT_ANSWER => {
                let msg: AnswerIn = payload(&event, data)?;
                Ok(InboundSignal::Answer {
                    from: msg.from_user_id,
                    answer: msg.answer,
                })
            }
            EVENT_ICE_CANDIDATE => {
                let msg: CandidatesIn = payload(&event, data)?;
                let candidates = match (msg.candidates, msg.candidate) {
                    (Some(batch), _) if !batch.is_empty() => batch,
                    (_, Some(single)) => vec![single],
                    _ => return Err(SignalingError::EmptyCandidates(event)),
                };
                Ok(InboundSignal::IceCandidates {
                    from: msg.from_user_id,
                    candidates,
                })
            }
            EVENT_END_CALL => {
                let msg: EndCallIn = if data.is_null() {
                    EndCallIn::default()
                } else {
                    payload(&event, data)?
                };
                Ok(InboundSignal::EndCall {
                    from: msg.from_user_id,
                })
            }
            EVENT_ERROR => {
                let msg: ErrorIn = payload(&event, data)?;
                Ok(InboundSignal::Error { message: msg.error })
            }
            _ => Err(SignalingError::UnknownEvent(event)),
        }
    }
}

fn payload<T: for<'de> Deserialize<'de>>(event: &str, data: Value) -> Result<T, SignalingError> {
    serde_json::from_value(data).map_err(|source| SignalingError::Malformed {
        event: event.to_owned(),
        source,
    })
}

/// [`SignalingChannel`] that hands encoded frames to the chat socket task.
#[derive(Debug, Clone)]
pub struct RelaySignaling {
    outbound: mpsc::UnboundedSender<RelayFrame>,
}

impl RelaySignaling {
    pub fn new(outbound: mpsc::UnboundedSender<RelayFrame>) -> Self {
        Self { outbound }
    }
}

impl SignalingChannel for RelaySignaling {
    fn send(&self, message: OutboundSignal) -> Result<(), SignalingError> {
        let frame = RelayFrame::encode(&message)?;
        trace!(event = %frame.event, target = %message.target(), "relay send");
        self.outbound
            .send(frame)
            .map_err(|_| SignalingError::Closed)
    }
}
