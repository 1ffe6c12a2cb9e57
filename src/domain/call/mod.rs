//! Call bounded context - the lifecycle of the single active call

pub mod aggregate;
pub mod entity;
pub mod state;
pub mod value_object;

pub use aggregate::CallSession;
pub use entity::Participant;
pub use state::CallState;
pub use value_object::{CallDirection, CallStatus, EndReason};
