//! peercall - peer-to-peer call establishment
//!
//! A call orchestrator that takes two clients from idle to a live audio/video
//! session over an asynchronous signaling relay, plus the relay itself and
//! in-process collaborators for tests and demos.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use application::{CallOrchestrator, Collaborators};
pub use domain::shared::error::CallError;
pub use domain::shared::result::Result;
