//! Signaling transport port

use crate::domain::signaling::message::SignalingMessage;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Failed to connect to signaling relay: {0}")]
    Connect(String),

    #[error("Not connected to the signaling relay")]
    NotConnected,

    #[error("Message cannot be sent by a client: {0}")]
    Unsendable(&'static str),

    #[error("Failed to encode signaling message: {0}")]
    Encode(String),
}

/// Outbound half of the signaling bus
///
/// `send` only queues; delivery is at-least-once and may reorder across
/// calls, which the orchestrator tolerates.
#[cfg_attr(test, mockall::automock)]
pub trait SignalingTransport: Send + Sync {
    fn send(&self, message: SignalingMessage) -> Result<(), SignalingError>;
}

/// Inbound half: messages addressed to the local user
pub type SignalingInbox = mpsc::UnboundedReceiver<SignalingMessage>;
