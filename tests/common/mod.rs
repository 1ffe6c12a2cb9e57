#![allow(dead_code)]

use peercall::config::OrchestratorConfig;
use peercall::domain::call::CallState;
use peercall::domain::signaling::{SignalingError, SignalingMessage, SignalingTransport};
use peercall::infrastructure::media::{DeviceInventory, SyntheticMediaSource};
use peercall::infrastructure::peer::LoopbackNetwork;
use peercall::infrastructure::signaling::MemorySignalingHub;
use peercall::{CallOrchestrator, Collaborators};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const WAIT: Duration = Duration::from_secs(5);

/// One user wired to a shared hub and network
pub struct Client {
    pub orchestrator: CallOrchestrator,
    pub media: Arc<SyntheticMediaSource>,
}

impl Client {
    pub async fn wait_for(&self, predicate: impl FnMut(&CallState) -> bool) -> CallState {
        wait_for(self.orchestrator.subscribe(), predicate).await
    }
}

/// Shared in-process world for several clients
#[derive(Clone, Default)]
pub struct World {
    pub hub: MemorySignalingHub,
    pub network: LoopbackNetwork,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self, user_id: &str, name: &str) -> Client {
        self.client_with(user_id, name, OrchestratorConfig::default(), DeviceInventory::default())
    }

    pub fn client_with(
        &self,
        user_id: &str,
        name: &str,
        config: OrchestratorConfig,
        inventory: DeviceInventory,
    ) -> Client {
        let (signaling, inbox) = self.hub.connect(user_id, name);
        let media = Arc::new(SyntheticMediaSource::new(inventory));
        let collaborators = Collaborators {
            signaling: Arc::new(signaling),
            media: media.clone(),
            peers: Arc::new(self.network.clone()),
        };
        Client {
            orchestrator: CallOrchestrator::spawn(config, collaborators, inbox),
            media,
        }
    }
}

/// Wait until a published snapshot satisfies `predicate`
pub async fn wait_for(
    mut state: watch::Receiver<CallState>,
    predicate: impl FnMut(&CallState) -> bool,
) -> CallState {
    tokio::time::timeout(WAIT, state.wait_for(predicate))
        .await
        .expect("timed out waiting for call state")
        .expect("call engine stopped")
        .clone()
}

/// Signaling transport that hands every outbound message to the test
#[derive(Clone)]
pub struct RecordingSignaling {
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

impl RecordingSignaling {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SignalingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SignalingTransport for RecordingSignaling {
    fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        self.tx.send(message).map_err(|_| SignalingError::NotConnected)
    }
}

/// Next recorded message matching `predicate`, skipping the rest
pub async fn next_sent(
    sent: &mut mpsc::UnboundedReceiver<SignalingMessage>,
    mut predicate: impl FnMut(&SignalingMessage) -> bool,
) -> SignalingMessage {
    tokio::time::timeout(WAIT, async {
        loop {
            match sent.recv().await {
                Some(message) if predicate(&message) => return message,
                Some(_) => continue,
                None => panic!("signaling recorder closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for an outbound message")
}
