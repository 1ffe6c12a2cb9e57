//! Signaling messages exchanged between the two call participants

use crate::domain::shared::value_objects::{CallId, UserId};
use serde::{Deserialize, Serialize};

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description (`{type, sdp}` on the wire)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate (`{candidate, sdpMid, sdpMLineIndex}` on the wire)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }
}

/// Every message of the call protocol
///
/// The same variant is used in both directions; the wire layer decides the
/// event name (`call:accept` outbound, `call:accepted` inbound).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    /// Client → relay only: ring `recipient_id`
    StartCall {
        call_id: CallId,
        recipient_id: UserId,
    },
    /// Relay → client only: someone is calling
    IncomingCall {
        call_id: CallId,
        initiator_id: UserId,
        initiator_name: String,
    },
    AcceptCall {
        call_id: CallId,
    },
    RejectCall {
        call_id: CallId,
    },
    EndCall {
        call_id: CallId,
    },
    Offer {
        call_id: CallId,
        sdp: SessionDescription,
    },
    Answer {
        call_id: CallId,
        sdp: SessionDescription,
    },
    IceCandidate {
        call_id: CallId,
        candidate: IceCandidate,
    },
}

impl SignalingMessage {
    pub fn call_id(&self) -> &CallId {
        match self {
            SignalingMessage::StartCall { call_id, .. }
            | SignalingMessage::IncomingCall { call_id, .. }
            | SignalingMessage::AcceptCall { call_id }
            | SignalingMessage::RejectCall { call_id }
            | SignalingMessage::EndCall { call_id }
            | SignalingMessage::Offer { call_id, .. }
            | SignalingMessage::Answer { call_id, .. }
            | SignalingMessage::IceCandidate { call_id, .. } => call_id,
        }
    }

    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::StartCall { .. } => "start_call",
            SignalingMessage::IncomingCall { .. } => "incoming_call",
            SignalingMessage::AcceptCall { .. } => "accept_call",
            SignalingMessage::RejectCall { .. } => "reject_call",
            SignalingMessage::EndCall { .. } => "end_call",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice_candidate",
        }
    }

    /// Whether the message terminates the call it refers to
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignalingMessage::RejectCall { .. } | SignalingMessage::EndCall { .. }
        )
    }
}
