//! Call orchestration errors

use crate::domain::media::MediaError;
use crate::domain::shared::value_objects::CallId;
use crate::domain::signaling::SignalingError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Local capture devices could not be acquired
    #[error("Media unavailable: {0}")]
    MediaUnavailable(#[from] MediaError),

    /// Another call is already in progress
    #[error("Another call is already in progress")]
    Busy,

    /// No ringing incoming call matches the identifier
    #[error("No matching call: {0}")]
    NoSuchCall(CallId),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// The call was ended before the operation completed
    #[error("Call was cancelled")]
    Cancelled,

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Transport failed: {0}")]
    Transport(String),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// The orchestrator has been shut down
    #[error("Call orchestrator is shut down")]
    Shutdown,
}
