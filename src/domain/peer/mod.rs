//! Peer transport bounded context

pub mod transport;

pub use transport::{
    PeerConnectionState, PeerError, PeerEvent, PeerEventSink, PeerTransport, PeerTransportFactory,
};
