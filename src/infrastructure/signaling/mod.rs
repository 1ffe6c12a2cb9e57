//! Signaling transports and the wire protocol

pub mod memory;
pub mod wire;
pub mod ws_client;

pub use memory::{MemorySignaling, MemorySignalingHub};
pub use wire::{ClientFrame, ServerFrame};
pub use ws_client::WsSignalingClient;
