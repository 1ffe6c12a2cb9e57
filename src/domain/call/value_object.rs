//! Call value objects

use crate::domain::media::MediaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Call direction, seen from the local client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// We placed the call
    Outgoing,
    /// The remote party called us
    Incoming,
}

/// Call status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// No call
    Idle,
    /// Acquiring local media for an outgoing call
    Initiating,
    /// Waiting for the callee to answer (or for us to answer)
    Ringing,
    /// Accepted, negotiating the peer transport
    Connecting,
    /// Remote media is flowing
    Active,
    /// Torn down; immediately followed by `Idle`
    Ended,
}

impl CallStatus {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_status: &CallStatus) -> bool {
        use CallStatus::*;

        match (self, new_status) {
            (Idle, Initiating) => true,
            (Idle, Ringing) => true,

            (Initiating, Ringing) => true,
            (Initiating, Ended) => true,

            (Ringing, Connecting) => true,
            (Ringing, Ended) => true,

            (Connecting, Active) => true,
            (Connecting, Ended) => true,

            (Active, Ended) => true,

            (Ended, Idle) => true,

            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Idle => "idle",
            CallStatus::Initiating => "initiating",
            CallStatus::Ringing => "ringing",
            CallStatus::Connecting => "connecting",
            CallStatus::Active => "active",
            CallStatus::Ended => "ended",
        }
    }

    /// A call is in progress
    pub fn is_in_call(&self) -> bool {
        !matches!(self, CallStatus::Idle | CallStatus::Ended)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason for call ending
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// We hung up
    LocalHangup,
    /// The remote party hung up
    RemoteHangup,
    /// We declined the incoming call
    Declined,
    /// The remote party declined (or could not be reached)
    RemoteDeclined,
    /// Nobody answered before the ring timeout
    NoAnswer,
    /// Local capture failed
    MediaFailure(MediaError),
    /// Offer/answer or candidate application failed
    NegotiationFailed(String),
    /// The peer link dropped or signaling became unusable
    TransportFailed(String),
    /// The orchestrator was shut down
    Shutdown,
}

impl EndReason {
    /// Stable label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            EndReason::LocalHangup => "local_hangup",
            EndReason::RemoteHangup => "remote_hangup",
            EndReason::Declined => "declined",
            EndReason::RemoteDeclined => "remote_declined",
            EndReason::NoAnswer => "no_answer",
            EndReason::MediaFailure(_) => "media_failure",
            EndReason::NegotiationFailed(_) => "negotiation_failed",
            EndReason::TransportFailed(_) => "transport_failed",
            EndReason::Shutdown => "shutdown",
        }
    }

    /// Failures surface one message to the user; normal endings none
    pub fn user_message(&self) -> Option<String> {
        match self {
            EndReason::MediaFailure(e) => Some(e.to_string()),
            EndReason::NegotiationFailed(_) => Some("The call could not be set up".to_string()),
            EndReason::TransportFailed(_) => {
                Some("The connection to the other party was lost".to_string())
            }
            EndReason::NoAnswer => Some("No answer".to_string()),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EndReason::MediaFailure(_)
                | EndReason::NegotiationFailed(_)
                | EndReason::TransportFailed(_)
        )
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::MediaFailure(e) => write!(f, "media failure ({})", e.kind()),
            EndReason::NegotiationFailed(detail) => write!(f, "negotiation failed: {}", detail),
            EndReason::TransportFailed(detail) => write!(f, "transport failed: {}", detail),
            other => f.write_str(other.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_state_transitions() {
        assert!(CallStatus::Idle.can_transition_to(&CallStatus::Initiating));
        assert!(CallStatus::Idle.can_transition_to(&CallStatus::Ringing));
        assert!(CallStatus::Initiating.can_transition_to(&CallStatus::Ringing));
        assert!(CallStatus::Ringing.can_transition_to(&CallStatus::Connecting));
        assert!(CallStatus::Connecting.can_transition_to(&CallStatus::Active));
        assert!(CallStatus::Active.can_transition_to(&CallStatus::Ended));
        assert!(CallStatus::Ended.can_transition_to(&CallStatus::Idle));
    }

    #[test]
    fn test_invalid_state_transitions() {
        assert!(!CallStatus::Idle.can_transition_to(&CallStatus::Active));
        assert!(!CallStatus::Initiating.can_transition_to(&CallStatus::Connecting));
        assert!(!CallStatus::Ringing.can_transition_to(&CallStatus::Active));
        assert!(!CallStatus::Active.can_transition_to(&CallStatus::Connecting));
        assert!(!CallStatus::Ended.can_transition_to(&CallStatus::Ringing));
    }

    #[test]
    fn test_every_live_status_can_end() {
        for status in [
            CallStatus::Initiating,
            CallStatus::Ringing,
            CallStatus::Connecting,
            CallStatus::Active,
        ] {
            assert!(status.can_transition_to(&CallStatus::Ended), "{}", status);
            assert!(status.is_in_call());
        }
        assert!(!CallStatus::Idle.is_in_call());
    }

    #[test]
    fn test_only_failures_carry_user_messages() {
        assert!(EndReason::LocalHangup.user_message().is_none());
        assert!(EndReason::RemoteDeclined.user_message().is_none());
        assert_eq!(
            EndReason::MediaFailure(MediaError::PermissionDenied).user_message(),
            Some(MediaError::PermissionDenied.to_string())
        );
        assert!(EndReason::TransportFailed("failed".into()).is_failure());
    }
}
