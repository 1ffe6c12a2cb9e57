//! In-process peer transports
//!
//! Every transport created by one [`LoopbackNetwork`] can reach every other.
//! Descriptions are plain SDP-looking text naming the sending transport and
//! its tracks; a pair connects once both sides hold a local and a remote
//! description and each has received at least one remote candidate. The
//! network exposes fault injection for failure tests.

use crate::domain::media::{MediaTrack, TrackHandle, TrackKind};
use crate::domain::peer::{
    PeerConnectionState, PeerError, PeerEvent, PeerEventSink, PeerTransport, PeerTransportFactory,
};
use crate::domain::shared::value_objects::CallId;
use crate::domain::signaling::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

const PEER_ATTRIBUTE: &str = "a=loopback-peer:";
const BASE_PORT: u64 = 40000;

struct PeerSlot {
    call_id: CallId,
    events: PeerEventSink,
    local_tracks: Vec<Arc<dyn MediaTrack>>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    remote_peer: Option<String>,
    remote_candidates: Vec<IceCandidate>,
    state: PeerConnectionState,
    closed: bool,
}

impl PeerSlot {
    fn ready(&self) -> bool {
        !self.closed
            && self.local_description.is_some()
            && self.remote_description.is_some()
            && !self.remote_candidates.is_empty()
            && matches!(
                self.state,
                PeerConnectionState::New | PeerConnectionState::Connecting
            )
    }

    fn set_state(&mut self, state: PeerConnectionState) {
        if self.state != state {
            self.state = state;
            self.events.emit(PeerEvent::ConnectionStateChanged(state));
        }
    }
}

#[derive(Default)]
struct NetworkState {
    peers: HashMap<String, PeerSlot>,
    created: u64,
    candidates: u64,
    create_failures: VecDeque<PeerError>,
}

impl NetworkState {
    fn slot(&mut self, id: &str) -> Result<&mut PeerSlot, PeerError> {
        match self.peers.get_mut(id) {
            Some(slot) if slot.closed => Err(PeerError::Closed),
            Some(slot) => Ok(slot),
            None => Err(PeerError::Closed),
        }
    }

    /// Gather one host candidate for `id`
    fn gather(&mut self, id: &str) {
        self.candidates += 1;
        let candidate = IceCandidate::new(format!(
            "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
            self.candidates,
            BASE_PORT + self.candidates
        ));
        if let Some(slot) = self.peers.get(id) {
            slot.events.emit(PeerEvent::LocalCandidate(candidate));
        }
    }

    fn try_connect(&mut self, id: &str) {
        let Some(slot) = self.peers.get_mut(id) else {
            return;
        };
        if slot.local_description.is_some()
            && slot.remote_description.is_some()
            && slot.state == PeerConnectionState::New
        {
            slot.set_state(PeerConnectionState::Connecting);
        }
        let Some(other_id) = slot.remote_peer.clone() else {
            return;
        };
        let (Some(a), Some(b)) = (self.peers.get(id), self.peers.get(&other_id)) else {
            return;
        };
        if !a.ready() || !b.ready() || b.remote_peer.as_deref() != Some(id) {
            return;
        }

        let a_tracks = a.local_tracks.clone();
        let b_tracks = b.local_tracks.clone();
        info!("Loopback peers {} and {} connected", id, other_id);
        for (peer, remote_tracks) in [(id, b_tracks), (other_id.as_str(), a_tracks)] {
            if let Some(slot) = self.peers.get_mut(peer) {
                slot.set_state(PeerConnectionState::Connected);
                for track in remote_tracks {
                    let remote = TrackHandle::with_id(track.id(), track.kind());
                    slot.events.emit(PeerEvent::RemoteTrack(Arc::new(remote)));
                }
            }
        }
    }

    /// Drop the link of `id` and its counterpart
    fn break_link(&mut self, id: &str, state: PeerConnectionState) -> bool {
        let Some(other) = self.peers.get(id).map(|s| s.remote_peer.clone()) else {
            return false;
        };
        for peer in std::iter::once(id.to_string()).chain(other) {
            if let Some(slot) = self.peers.get_mut(&peer) {
                if !slot.closed {
                    slot.set_state(state);
                }
            }
        }
        true
    }
}

/// Shared medium of loopback transports; also the factory
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create` fail with `error`
    pub fn fail_next_create(&self, error: PeerError) {
        self.state.lock().create_failures.push_back(error);
    }

    /// Report `Failed` on the transport and its counterpart
    pub fn fail(&self, peer_id: &str) -> bool {
        self.state.lock().break_link(peer_id, PeerConnectionState::Failed)
    }

    /// Report `Disconnected` on the transport and its counterpart
    pub fn disconnect(&self, peer_id: &str) -> bool {
        self.state
            .lock()
            .break_link(peer_id, PeerConnectionState::Disconnected)
    }

    /// Transports of `call_id`, oldest first
    pub fn peers_of(&self, call_id: &CallId) -> Vec<String> {
        let state = self.state.lock();
        let mut ids: Vec<(u64, String)> = state
            .peers
            .iter()
            .filter(|(_, slot)| &slot.call_id == call_id)
            .map(|(id, _)| (sequence(id), id.clone()))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Transports created and not yet closed
    pub fn open_count(&self) -> usize {
        self.state.lock().peers.values().filter(|s| !s.closed).count()
    }

    pub fn is_closed(&self, peer_id: &str) -> bool {
        self.state
            .lock()
            .peers
            .get(peer_id)
            .map(|s| s.closed)
            .unwrap_or(true)
    }

    pub fn state_of(&self, peer_id: &str) -> Option<PeerConnectionState> {
        self.state.lock().peers.get(peer_id).map(|s| s.state)
    }

    /// Candidates applied to `peer_id`, in application order
    pub fn remote_candidates(&self, peer_id: &str) -> Vec<IceCandidate> {
        self.state
            .lock()
            .peers
            .get(peer_id)
            .map(|s| s.remote_candidates.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PeerTransportFactory for LoopbackNetwork {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerTransport>, PeerError> {
        let mut state = self.state.lock();
        if let Some(error) = state.create_failures.pop_front() {
            return Err(error);
        }

        state.created += 1;
        let id = format!("{}-{}", events.call_id(), state.created);
        debug!("Created loopback peer {}", id);
        state.peers.insert(
            id.clone(),
            PeerSlot {
                call_id: events.call_id().clone(),
                events,
                local_tracks: Vec::new(),
                local_description: None,
                remote_description: None,
                remote_peer: None,
                remote_candidates: Vec::new(),
                state: PeerConnectionState::New,
                closed: false,
            },
        );

        Ok(Arc::new(LoopbackPeer {
            id,
            network: Arc::clone(&self.state),
        }))
    }
}

/// One loopback transport
pub struct LoopbackPeer {
    id: String,
    network: Arc<Mutex<NetworkState>>,
}

impl LoopbackPeer {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn describe(&self, sdp_type: SdpType, tracks: &[Arc<dyn MediaTrack>]) -> SessionDescription {
        let mut sdp = format!(
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\n{}{}\r\n",
            PEER_ATTRIBUTE, self.id
        );
        for track in tracks {
            sdp.push_str(&format!("m={} {}\r\n", track.kind(), track.id()));
        }
        SessionDescription { sdp_type, sdp }
    }
}

#[async_trait]
impl PeerTransport for LoopbackPeer {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerError> {
        let mut network = self.network.lock();
        let slot = network.slot(&self.id)?;
        if slot.local_description.is_some() {
            return Err(PeerError::InvalidState(
                "tracks must be added before negotiation".to_string(),
            ));
        }
        slot.local_tracks.push(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let mut network = self.network.lock();
        let slot = network.slot(&self.id)?;
        if slot.local_description.is_some() || slot.remote_description.is_some() {
            return Err(PeerError::InvalidState("offer already negotiated".to_string()));
        }
        let offer = self.describe(SdpType::Offer, &slot.local_tracks);
        slot.local_description = Some(offer.clone());

        network.gather(&self.id);
        network.try_connect(&self.id);
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let mut network = self.network.lock();
        let slot = network.slot(&self.id)?;
        let has_offer = slot
            .remote_description
            .as_ref()
            .map(|d| d.sdp_type == SdpType::Offer)
            .unwrap_or(false);
        if !has_offer || slot.local_description.is_some() {
            return Err(PeerError::InvalidState(
                "answer requires a remote offer".to_string(),
            ));
        }
        let answer = self.describe(SdpType::Answer, &slot.local_tracks);
        slot.local_description = Some(answer.clone());

        network.gather(&self.id);
        network.try_connect(&self.id);
        Ok(answer)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        let remote_peer = description
            .sdp
            .lines()
            .find_map(|line| line.strip_prefix(PEER_ATTRIBUTE))
            .map(|id| id.trim().to_string())
            .ok_or_else(|| {
                PeerError::InvalidDescription("no loopback peer attribute".to_string())
            })?;

        let mut network = self.network.lock();
        let slot = network.slot(&self.id)?;
        if slot.remote_description.is_some() {
            return Err(PeerError::InvalidState(
                "remote description already set".to_string(),
            ));
        }
        let expected = match &slot.local_description {
            Some(local) if local.sdp_type == SdpType::Offer => SdpType::Answer,
            Some(_) => {
                return Err(PeerError::InvalidState("negotiation complete".to_string()));
            }
            None => SdpType::Offer,
        };
        if description.sdp_type != expected {
            return Err(PeerError::InvalidDescription(format!(
                "expected {:?}, got {:?}",
                expected, description.sdp_type
            )));
        }

        slot.remote_description = Some(description);
        slot.remote_peer = Some(remote_peer);
        network.try_connect(&self.id);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        if candidate.candidate.trim().is_empty() {
            return Err(PeerError::Candidate("empty candidate".to_string()));
        }
        let mut network = self.network.lock();
        let slot = network.slot(&self.id)?;
        if slot.remote_description.is_none() {
            return Err(PeerError::InvalidState(
                "candidate before remote description".to_string(),
            ));
        }
        slot.remote_candidates.push(candidate);
        network.try_connect(&self.id);
        Ok(())
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.network
            .lock()
            .peers
            .get(&self.id)
            .map(|s| s.state)
            .unwrap_or(PeerConnectionState::Closed)
    }

    async fn close(&self) {
        let mut network = self.network.lock();
        if let Some(slot) = network.peers.get_mut(&self.id) {
            if !slot.closed {
                slot.closed = true;
                slot.state = PeerConnectionState::Closed;
                debug!("Closed loopback peer {}", self.id);
            }
        }
    }
}

fn sequence(peer_id: &str) -> u64 {
    peer_id
        .rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Media kinds announced in a loopback description
pub fn announced_kinds(description: &SessionDescription) -> Vec<TrackKind> {
    description
        .sdp
        .lines()
        .filter_map(|line| line.strip_prefix("m="))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter_map(TrackKind::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    type Events = mpsc::UnboundedReceiver<(CallId, PeerEvent)>;

    async fn peer(network: &LoopbackNetwork, call: &str) -> (Arc<dyn PeerTransport>, Events) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = network
            .create(PeerEventSink::new(CallId::from(call), tx))
            .await
            .unwrap();
        (peer, rx)
    }

    fn candidates(events: &mut Events) -> Vec<IceCandidate> {
        let mut found = Vec::new();
        while let Ok((_, event)) = events.try_recv() {
            if let PeerEvent::LocalCandidate(c) = event {
                found.push(c);
            }
        }
        found
    }

    fn remote_tracks(events: &mut Events) -> usize {
        let mut count = 0;
        while let Ok((_, event)) = events.try_recv() {
            if matches!(event, PeerEvent::RemoteTrack(_)) {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_pair_connects_after_full_exchange() {
        let network = LoopbackNetwork::new();
        let (caller, mut caller_events) = peer(&network, "c1").await;
        let (callee, mut callee_events) = peer(&network, "c1").await;
        caller
            .add_track(Arc::new(TrackHandle::new(TrackKind::Audio)))
            .await
            .unwrap();
        callee
            .add_track(Arc::new(TrackHandle::new(TrackKind::Audio)))
            .await
            .unwrap();
        callee
            .add_track(Arc::new(TrackHandle::new(TrackKind::Video)))
            .await
            .unwrap();

        let offer = caller.create_offer().await.unwrap();
        assert_eq!(announced_kinds(&offer), vec![TrackKind::Audio]);
        callee.set_remote_description(offer).await.unwrap();
        let answer = callee.create_answer().await.unwrap();
        caller.set_remote_description(answer).await.unwrap();

        for c in candidates(&mut caller_events) {
            callee.add_ice_candidate(c).await.unwrap();
        }
        assert_eq!(caller.connection_state(), PeerConnectionState::Connecting);
        for c in candidates(&mut callee_events) {
            caller.add_ice_candidate(c).await.unwrap();
        }

        assert_eq!(caller.connection_state(), PeerConnectionState::Connected);
        assert_eq!(callee.connection_state(), PeerConnectionState::Connected);
        assert_eq!(remote_tracks(&mut caller_events), 2);
        assert_eq!(remote_tracks(&mut callee_events), 1);
    }

    #[tokio::test]
    async fn test_candidate_requires_remote_description() {
        let network = LoopbackNetwork::new();
        let (peer, _events) = peer(&network, "c1").await;
        let result = peer.add_ice_candidate(IceCandidate::new("candidate:1")).await;
        assert!(matches!(result, Err(PeerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_tracks_are_fixed_once_negotiating() {
        let network = LoopbackNetwork::new();
        let (peer, _events) = peer(&network, "c1").await;
        peer.create_offer().await.unwrap();
        let result = peer
            .add_track(Arc::new(TrackHandle::new(TrackKind::Audio)))
            .await;
        assert!(matches!(result, Err(PeerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_foreign_sdp_is_rejected() {
        let network = LoopbackNetwork::new();
        let (peer, _events) = peer(&network, "c1").await;
        let result = peer
            .set_remote_description(SessionDescription::offer("v=0\r\n"))
            .await;
        assert!(matches!(result, Err(PeerError::InvalidDescription(_))));
    }

    #[tokio::test]
    async fn test_fail_reaches_both_ends() {
        let network = LoopbackNetwork::new();
        let (caller, mut caller_events) = peer(&network, "c1").await;
        let (callee, mut callee_events) = peer(&network, "c1").await;
        let offer = caller.create_offer().await.unwrap();
        callee.set_remote_description(offer).await.unwrap();
        caller
            .set_remote_description(callee.create_answer().await.unwrap())
            .await
            .unwrap();
        let _ = (candidates(&mut caller_events), candidates(&mut callee_events));

        let ids = network.peers_of(&CallId::from("c1"));
        assert_eq!(ids.len(), 2);
        assert!(network.fail(&ids[0]));

        assert_eq!(caller.connection_state(), PeerConnectionState::Failed);
        assert_eq!(callee.connection_state(), PeerConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let network = LoopbackNetwork::new();
        let (peer, _events) = peer(&network, "c1").await;
        assert_eq!(network.open_count(), 1);

        peer.close().await;
        peer.close().await;

        assert_eq!(network.open_count(), 0);
        assert_eq!(peer.connection_state(), PeerConnectionState::Closed);
        assert!(matches!(peer.create_offer().await, Err(PeerError::Closed)));
    }

    #[tokio::test]
    async fn test_injected_create_failure() {
        let network = LoopbackNetwork::new();
        network.fail_next_create(PeerError::Creation("no ports".to_string()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = network.create(PeerEventSink::new(CallId::from("c1"), tx)).await;
        assert!(matches!(result, Err(PeerError::Creation(_))));
    }
}
