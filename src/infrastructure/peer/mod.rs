//! Peer transport implementations

pub mod loopback;
#[cfg(feature = "webrtc-transport")]
pub mod webrtc;

pub use loopback::{LoopbackNetwork, LoopbackPeer};
#[cfg(feature = "webrtc-transport")]
pub use self::webrtc::{WebRtcPeer, WebRtcPeerFactory};
