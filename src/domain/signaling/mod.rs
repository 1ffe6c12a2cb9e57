//! Signaling bounded context - the call protocol and its relay rules

pub mod message;
pub mod routing;
pub mod transport;

pub use message::{IceCandidate, SdpType, SessionDescription, SignalingMessage};
pub use routing::{CallRoute, Delivery, SignalRouter};
pub use transport::{SignalingError, SignalingInbox, SignalingTransport};

#[cfg(test)]
pub use transport::MockSignalingTransport;
