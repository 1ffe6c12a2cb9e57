//! Call orchestrator - the public handle over the call engine
//!
//! Cheap to hold, safe to share by reference across tasks. Every method is a
//! request to the engine task; the engine's replies are the only results.

use crate::application::engine::{CallEngine, Command};
use crate::config::OrchestratorConfig;
use crate::domain::call::{CallState, Participant};
use crate::domain::media::MediaSource;
use crate::domain::peer::PeerTransportFactory;
use crate::domain::shared::{CallError, CallId, Result, UserId};
use crate::domain::signaling::{SignalingInbox, SignalingTransport};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

const COMMAND_QUEUE: usize = 64;

/// The external capabilities one orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub signaling: Arc<dyn SignalingTransport>,
    pub media: Arc<dyn MediaSource>,
    pub peers: Arc<dyn PeerTransportFactory>,
}

/// Handle to the call state machine of one local user
pub struct CallOrchestrator {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<CallState>,
    worker: JoinHandle<()>,
}

impl CallOrchestrator {
    /// Start the engine task. `inbox` carries messages addressed to this user.
    pub fn spawn(
        config: OrchestratorConfig,
        collaborators: Collaborators,
        inbox: SignalingInbox,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (state_tx, state_rx) = watch::channel(CallState::idle());
        let (engine, channels) = CallEngine::new(config, collaborators, state_tx);
        let worker = tokio::spawn(engine.run(commands_rx, inbox, channels));

        Self {
            commands: commands_tx,
            state: state_rx,
            worker,
        }
    }

    /// Place a call. Resolves once local media is live and the call is ringing.
    pub async fn initiate_call(
        &self,
        recipient_id: impl Into<UserId>,
        display_name: impl Into<String>,
    ) -> Result<CallId> {
        let recipient = Participant::new(recipient_id, display_name);
        self.request(|reply| Command::Initiate { recipient, reply })
            .await?
    }

    /// Answer the ringing incoming call `call_id`
    pub async fn accept_call(&self, call_id: &CallId) -> Result<()> {
        let call_id = call_id.clone();
        self.request(|reply| Command::Accept { call_id, reply })
            .await?
    }

    /// Decline (or hang up) `call_id`; a no-op for any other call
    pub async fn reject_call(&self, call_id: &CallId) {
        let call_id = call_id.clone();
        if let Err(e) = self.request(|reply| Command::Reject { call_id, reply }).await {
            debug!("Reject not delivered: {}", e);
        }
    }

    /// Hang up whatever call is current; a no-op when idle
    pub async fn end_call(&self) {
        if let Err(e) = self.request(|reply| Command::End { reply }).await {
            debug!("End not delivered: {}", e);
        }
    }

    /// Returns the new muted flag
    pub async fn toggle_mute(&self) -> bool {
        self.request(|reply| Command::ToggleMute { reply })
            .await
            .unwrap_or(false)
    }

    /// Returns the new video-off flag
    pub async fn toggle_video(&self) -> bool {
        self.request(|reply| Command::ToggleVideo { reply })
            .await
            .unwrap_or(false)
    }

    /// Latest published snapshot
    pub fn state(&self) -> CallState {
        self.state.borrow().clone()
    }

    /// Observe every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.state.clone()
    }

    /// End any call, release everything and stop the engine
    pub async fn shutdown(self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }
        let _ = self.worker.await;
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| CallError::Shutdown)?;
        response.await.map_err(|_| CallError::Shutdown)
    }
}
