//! Infrastructure layer - concrete collaborators of the orchestrator

pub mod media;
pub mod peer;
pub mod signaling;
