//! Interface layer - the signaling relay and its metrics endpoint

pub mod metrics;
pub mod relay;

pub use relay::{RelayError, RelayState, SignalingRelay};
