//! In-process signaling hub
//!
//! Per-user mailboxes behind the same routing table the network relay uses,
//! so two orchestrators in one process talk exactly as they would through
//! the relay.

use crate::domain::shared::value_objects::UserId;
use crate::domain::signaling::{
    Delivery, SignalRouter, SignalingError, SignalingInbox, SignalingMessage, SignalingTransport,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

struct Mailbox {
    display_name: String,
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

#[derive(Default)]
struct HubState {
    mailboxes: HashMap<UserId, Mailbox>,
    router: SignalRouter,
}

impl HubState {
    fn deliver(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match self.mailboxes.get(&delivery.to) {
                Some(mailbox) => {
                    if mailbox.tx.send(delivery.message).is_err() {
                        debug!("Mailbox of {} is closed", delivery.to);
                    }
                }
                None => debug!("{} went offline, dropping {}", delivery.to, delivery.message.kind()),
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemorySignalingHub {
    state: Arc<Mutex<HubState>>,
}

impl MemorySignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and hand back its transport and inbox.
    /// A second connect for the same user replaces the first mailbox.
    pub fn connect(
        &self,
        user_id: impl Into<UserId>,
        display_name: impl Into<String>,
    ) -> (MemorySignaling, SignalingInbox) {
        let user_id = user_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mailbox = Mailbox {
            display_name: display_name.into(),
            tx,
        };

        if self.state.lock().mailboxes.insert(user_id.clone(), mailbox).is_some() {
            info!("{} reconnected to the hub", user_id);
        }

        let transport = MemorySignaling {
            user_id,
            state: Arc::clone(&self.state),
        };
        (transport, rx)
    }

    /// Remove a user; its live calls end for the other party
    pub fn disconnect(&self, user_id: &UserId) {
        let mut state = self.state.lock();
        if state.mailboxes.remove(user_id).is_none() {
            return;
        }
        let deliveries = state.router.disconnect(user_id);
        state.deliver(deliveries);
    }

    pub fn is_connected(&self, user_id: &UserId) -> bool {
        self.state.lock().mailboxes.contains_key(user_id)
    }

    pub fn live_calls(&self) -> usize {
        self.state.lock().router.live_calls()
    }
}

/// Outbound side of one hub user
#[derive(Clone)]
pub struct MemorySignaling {
    user_id: UserId,
    state: Arc<Mutex<HubState>>,
}

impl MemorySignaling {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

impl SignalingTransport for MemorySignaling {
    fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        if matches!(message, SignalingMessage::IncomingCall { .. }) {
            return Err(SignalingError::Unsendable(message.kind()));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(mailbox) = state.mailboxes.get(&self.user_id) else {
            return Err(SignalingError::NotConnected);
        };
        let from_name = mailbox.display_name.clone();

        let mailboxes = &state.mailboxes;
        let deliveries = state.router.route(&self.user_id, &from_name, message, |user| {
            mailboxes.contains_key(user)
        });
        state.deliver(deliveries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::CallId;

    fn start(call_id: &str, to: &str) -> SignalingMessage {
        SignalingMessage::StartCall {
            call_id: CallId::from(call_id),
            recipient_id: UserId::from(to),
        }
    }

    #[tokio::test]
    async fn test_start_reaches_recipient_as_incoming() {
        let hub = MemorySignalingHub::new();
        let (alice, _alice_inbox) = hub.connect("alice", "Alice");
        let (_bob, mut bob_inbox) = hub.connect("bob", "Bob");

        alice.send(start("c1", "bob")).unwrap();

        assert_eq!(
            bob_inbox.recv().await,
            Some(SignalingMessage::IncomingCall {
                call_id: CallId::from("c1"),
                initiator_id: UserId::from("alice"),
                initiator_name: "Alice".to_string(),
            })
        );
        assert_eq!(hub.live_calls(), 1);
    }

    #[tokio::test]
    async fn test_offline_recipient_rejects() {
        let hub = MemorySignalingHub::new();
        let (alice, mut alice_inbox) = hub.connect("alice", "Alice");

        alice.send(start("c1", "carol")).unwrap();

        assert_eq!(
            alice_inbox.recv().await,
            Some(SignalingMessage::RejectCall {
                call_id: CallId::from("c1")
            })
        );
        assert_eq!(hub.live_calls(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_ends_calls_of_departing_user() {
        let hub = MemorySignalingHub::new();
        let (alice, _alice_inbox) = hub.connect("alice", "Alice");
        let (_bob, mut bob_inbox) = hub.connect("bob", "Bob");
        alice.send(start("c1", "bob")).unwrap();
        let _ = bob_inbox.recv().await;

        hub.disconnect(&UserId::from("alice"));

        assert_eq!(
            bob_inbox.recv().await,
            Some(SignalingMessage::EndCall {
                call_id: CallId::from("c1")
            })
        );
        assert!(!hub.is_connected(&UserId::from("alice")));
        assert_eq!(
            alice.send(SignalingMessage::EndCall {
                call_id: CallId::from("c1")
            }),
            Err(SignalingError::NotConnected)
        );
    }

    #[test]
    fn test_client_cannot_send_incoming_call() {
        let hub = MemorySignalingHub::new();
        let (alice, _inbox) = hub.connect("alice", "Alice");
        let result = alice.send(SignalingMessage::IncomingCall {
            call_id: CallId::from("c1"),
            initiator_id: UserId::from("alice"),
            initiator_name: "Alice".to_string(),
        });
        assert!(matches!(result, Err(SignalingError::Unsendable(_))));
    }
}
