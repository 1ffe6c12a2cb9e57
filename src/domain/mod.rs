//! Domain layer - Core call model and the ports it talks through
//!
//! This layer contains:
//! - Aggregates: the call session and its state machine
//! - Value Objects: identifiers, statuses, constraints, signaling messages
//! - Ports: media source, signaling transport, peer transport
//! - Domain Services: relay routing rules

pub mod call;
pub mod media;
pub mod peer;
pub mod shared;
pub mod signaling;

// Re-export commonly used types
pub use shared::{CallError, Result};
