//! Application layer - the call orchestrator
//!
//! Drives one user's call through its lifecycle by coordinating the
//! signaling bus, the local media source and the peer transport.

mod engine;
mod negotiation;
pub mod orchestrator;

pub use orchestrator::{CallOrchestrator, Collaborators};
