//! Peer transport port
//!
//! A negotiated point-to-point media channel. The orchestrator drives it
//! through offer/answer/candidate calls and learns about its progress through
//! [`PeerEvent`]s pushed into a [`PeerEventSink`].

use crate::domain::media::MediaTrack;
use crate::domain::shared::value_objects::CallId;
use crate::domain::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("Failed to create peer transport: {0}")]
    Creation(String),

    #[error("Operation not valid in current state: {0}")]
    InvalidState(String),

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Failed to apply ICE candidate: {0}")]
    Candidate(String),

    #[error("Peer transport is closed")]
    Closed,

    #[error("Peer transport error: {0}")]
    Backend(String),
}

/// Connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// Disconnected and failed links are never recovered
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PeerConnectionState::Disconnected | PeerConnectionState::Failed
        )
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerConnectionState::New => "new",
            PeerConnectionState::Connecting => "connecting",
            PeerConnectionState::Connected => "connected",
            PeerConnectionState::Disconnected => "disconnected",
            PeerConnectionState::Failed => "failed",
            PeerConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Something the transport observed
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local candidate was gathered and must reach the remote side
    LocalCandidate(IceCandidate),
    /// Media from the remote side started arriving
    RemoteTrack(Arc<dyn MediaTrack>),
    ConnectionStateChanged(PeerConnectionState),
}

/// Channel end handed to a transport at creation, tagging events with their call
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    call_id: CallId,
    tx: mpsc::UnboundedSender<(CallId, PeerEvent)>,
}

impl PeerEventSink {
    pub fn new(call_id: CallId, tx: mpsc::UnboundedSender<(CallId, PeerEvent)>) -> Self {
        Self { call_id, tx }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn emit(&self, event: PeerEvent) {
        if self.tx.send((self.call_id.clone(), event)).is_err() {
            trace!(call_id = %self.call_id, "Peer event dropped, orchestrator gone");
        }
    }
}

/// One negotiated peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Attach a local track. Only valid before any description is generated.
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerError>;

    /// Create an offer and install it as the local description
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    /// Create an answer to the applied remote offer and install it locally
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_remote_description(&self, description: SessionDescription)
        -> Result<(), PeerError>;

    /// Apply a remote candidate. Requires the remote description; duplicates are tolerated.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    fn connection_state(&self) -> PeerConnectionState;

    /// Tear the connection down. Idempotent.
    async fn close(&self);
}

/// Creates one transport per call
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerTransport>, PeerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_lost_links_are_fatal() {
        assert!(PeerConnectionState::Failed.is_fatal());
        assert!(PeerConnectionState::Disconnected.is_fatal());
        assert!(!PeerConnectionState::Closed.is_fatal());
        assert!(!PeerConnectionState::Connected.is_fatal());
    }

    #[tokio::test]
    async fn test_sink_tags_events_with_call() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = PeerEventSink::new(CallId::from("c1"), tx);
        sink.emit(PeerEvent::ConnectionStateChanged(PeerConnectionState::Connected));

        let (call_id, event) = rx.recv().await.unwrap();
        assert_eq!(call_id, CallId::from("c1"));
        assert!(matches!(
            event,
            PeerEvent::ConnectionStateChanged(PeerConnectionState::Connected)
        ));
    }
}
