//! Per-call negotiation bookkeeping
//!
//! Tracks the peer transport of the current call, which SDP has been seen
//! and the candidates that arrived before the remote description.

use crate::domain::peer::PeerTransport;
use crate::domain::signaling::{IceCandidate, SessionDescription};
use std::collections::HashSet;
use std::sync::Arc;

/// Candidates waiting for the remote description, in arrival order
#[derive(Debug, Default)]
pub(crate) struct CandidateBuffer {
    queue: Vec<IceCandidate>,
    seen: HashSet<IceCandidate>,
}

impl CandidateBuffer {
    /// Queue a candidate; exact duplicates are dropped
    pub(crate) fn push(&mut self, candidate: IceCandidate) -> bool {
        if !self.seen.insert(candidate.clone()) {
            return false;
        }
        self.queue.push(candidate);
        true
    }

    pub(crate) fn drain(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.queue)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

#[derive(Default)]
pub(crate) struct Negotiation {
    /// Transport of the current call, once created
    pub(crate) peer: Option<Arc<dyn PeerTransport>>,
    /// Creation has been started
    pub(crate) peer_requested: bool,
    /// Caller: offer creation has been started
    pub(crate) offer_requested: bool,
    /// Caller: offer went out, an answer may be applied
    pub(crate) offer_sent: bool,
    /// Callee: an offer was accepted for this call
    pub(crate) offer_received: bool,
    /// Caller: an answer was accepted for this call
    pub(crate) answer_received: bool,
    pub(crate) pending_offer: Option<SessionDescription>,
    pub(crate) pending_answer: Option<SessionDescription>,
    /// Candidates may be applied directly once this is set
    pub(crate) remote_description_set: bool,
    pub(crate) candidates: CandidateBuffer,
}

impl Negotiation {
    pub(crate) fn take_peer(&mut self) -> Option<Arc<dyn PeerTransport>> {
        self.peer.take()
    }

    /// Either queue the candidate or hand it back for immediate application
    pub(crate) fn accept_candidate(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_description_set && self.peer.is_some() {
            Some(candidate)
        } else {
            self.candidates.push(candidate);
            None
        }
    }
}
