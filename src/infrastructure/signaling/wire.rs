//! JSON wire protocol between clients and the relay
//!
//! Every text frame is `{"event": <name>, "data": {...}}` with camelCase
//! fields. Clients send `call:start|accept|reject|end`; the relay answers with
//! `call:incoming|accepted|rejected|ended`. The `rtc:*` events are identical in
//! both directions.

use crate::domain::shared::value_objects::{CallId, UserId};
use crate::domain::signaling::{IceCandidate, SessionDescription, SignalingError, SignalingMessage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCallData {
    pub call_id: CallId,
    pub recipient_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallData {
    pub call_id: CallId,
    pub initiator_id: UserId,
    pub initiator_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRef {
    pub call_id: CallId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferData {
    pub call_id: CallId,
    pub offer: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerData {
    pub call_id: CallId,
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateData {
    pub call_id: CallId,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: String,
    pub message: String,
}

/// Frames a client sends to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    #[serde(rename = "call:start")]
    Start(StartCallData),
    #[serde(rename = "call:accept")]
    Accept(CallRef),
    #[serde(rename = "call:reject")]
    Reject(CallRef),
    #[serde(rename = "call:end")]
    End(CallRef),
    #[serde(rename = "rtc:offer")]
    Offer(OfferData),
    #[serde(rename = "rtc:answer")]
    Answer(AnswerData),
    #[serde(rename = "rtc:ice-candidate")]
    IceCandidate(CandidateData),
}

impl ClientFrame {
    /// Encode an outbound message; `IncomingCall` is relay-only and has no client frame
    pub fn from_message(message: SignalingMessage, initiator_name: Option<&str>) -> Option<Self> {
        let frame = match message {
            SignalingMessage::StartCall {
                call_id,
                recipient_id,
            } => ClientFrame::Start(StartCallData {
                call_id,
                recipient_id,
                initiator_name: initiator_name.map(str::to_string),
            }),
            SignalingMessage::IncomingCall { .. } => return None,
            SignalingMessage::AcceptCall { call_id } => ClientFrame::Accept(CallRef { call_id }),
            SignalingMessage::RejectCall { call_id } => ClientFrame::Reject(CallRef { call_id }),
            SignalingMessage::EndCall { call_id } => ClientFrame::End(CallRef { call_id }),
            SignalingMessage::Offer { call_id, sdp } => ClientFrame::Offer(OfferData {
                call_id,
                offer: sdp,
            }),
            SignalingMessage::Answer { call_id, sdp } => ClientFrame::Answer(AnswerData {
                call_id,
                answer: sdp,
            }),
            SignalingMessage::IceCandidate { call_id, candidate } => {
                ClientFrame::IceCandidate(CandidateData { call_id, candidate })
            }
        };
        Some(frame)
    }

    /// Display name the caller announced in `call:start`
    pub fn initiator_name(&self) -> Option<&str> {
        match self {
            ClientFrame::Start(data) => data.initiator_name.as_deref(),
            _ => None,
        }
    }

    pub fn into_message(self) -> SignalingMessage {
        match self {
            ClientFrame::Start(data) => SignalingMessage::StartCall {
                call_id: data.call_id,
                recipient_id: data.recipient_id,
            },
            ClientFrame::Accept(data) => SignalingMessage::AcceptCall {
                call_id: data.call_id,
            },
            ClientFrame::Reject(data) => SignalingMessage::RejectCall {
                call_id: data.call_id,
            },
            ClientFrame::End(data) => SignalingMessage::EndCall {
                call_id: data.call_id,
            },
            ClientFrame::Offer(data) => SignalingMessage::Offer {
                call_id: data.call_id,
                sdp: data.offer,
            },
            ClientFrame::Answer(data) => SignalingMessage::Answer {
                call_id: data.call_id,
                sdp: data.answer,
            },
            ClientFrame::IceCandidate(data) => SignalingMessage::IceCandidate {
                call_id: data.call_id,
                candidate: data.candidate,
            },
        }
    }
}

/// Frames the relay sends to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerFrame {
    #[serde(rename = "call:incoming")]
    Incoming(IncomingCallData),
    #[serde(rename = "call:accepted")]
    Accepted(CallRef),
    #[serde(rename = "call:rejected")]
    Rejected(CallRef),
    #[serde(rename = "call:ended")]
    Ended(CallRef),
    #[serde(rename = "rtc:offer")]
    Offer(OfferData),
    #[serde(rename = "rtc:answer")]
    Answer(AnswerData),
    #[serde(rename = "rtc:ice-candidate")]
    IceCandidate(CandidateData),
    #[serde(rename = "error")]
    Error(ErrorData),
}

impl ServerFrame {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error(ErrorData {
            code: code.into(),
            message: message.into(),
        })
    }

    /// Encode a routed message; `StartCall` never travels relay → client
    pub fn from_message(message: SignalingMessage) -> Option<Self> {
        let frame = match message {
            SignalingMessage::StartCall { .. } => return None,
            SignalingMessage::IncomingCall {
                call_id,
                initiator_id,
                initiator_name,
            } => ServerFrame::Incoming(IncomingCallData {
                call_id,
                initiator_id,
                initiator_name,
            }),
            SignalingMessage::AcceptCall { call_id } => ServerFrame::Accepted(CallRef { call_id }),
            SignalingMessage::RejectCall { call_id } => ServerFrame::Rejected(CallRef { call_id }),
            SignalingMessage::EndCall { call_id } => ServerFrame::Ended(CallRef { call_id }),
            SignalingMessage::Offer { call_id, sdp } => ServerFrame::Offer(OfferData {
                call_id,
                offer: sdp,
            }),
            SignalingMessage::Answer { call_id, sdp } => ServerFrame::Answer(AnswerData {
                call_id,
                answer: sdp,
            }),
            SignalingMessage::IceCandidate { call_id, candidate } => {
                ServerFrame::IceCandidate(CandidateData { call_id, candidate })
            }
        };
        Some(frame)
    }

    /// Decode into a call message; `error` frames carry none
    pub fn into_message(self) -> Option<SignalingMessage> {
        let message = match self {
            ServerFrame::Incoming(data) => SignalingMessage::IncomingCall {
                call_id: data.call_id,
                initiator_id: data.initiator_id,
                initiator_name: data.initiator_name,
            },
            ServerFrame::Accepted(data) => SignalingMessage::AcceptCall {
                call_id: data.call_id,
            },
            ServerFrame::Rejected(data) => SignalingMessage::RejectCall {
                call_id: data.call_id,
            },
            ServerFrame::Ended(data) => SignalingMessage::EndCall {
                call_id: data.call_id,
            },
            ServerFrame::Offer(data) => SignalingMessage::Offer {
                call_id: data.call_id,
                sdp: data.offer,
            },
            ServerFrame::Answer(data) => SignalingMessage::Answer {
                call_id: data.call_id,
                sdp: data.answer,
            },
            ServerFrame::IceCandidate(data) => SignalingMessage::IceCandidate {
                call_id: data.call_id,
                candidate: data.candidate,
            },
            ServerFrame::Error(_) => return None,
        };
        Some(message)
    }
}

pub fn encode<T: Serialize>(frame: &T) -> Result<String, SignalingError> {
    serde_json::to_string(frame).map_err(|e| SignalingError::Encode(e.to_string()))
}
