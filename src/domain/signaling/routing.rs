//! Relay routing rules
//!
//! The relay only knows who is connected and which two users own each call.
//! Both the WebSocket relay and the in-memory hub route through this table so
//! they behave identically.

use crate::domain::shared::value_objects::{CallId, UserId};
use crate::domain::signaling::message::SignalingMessage;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// The two ends of a relayed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRoute {
    pub initiator: UserId,
    pub recipient: UserId,
}

impl CallRoute {
    /// The other participant, if `user` is part of this call
    pub fn counterpart(&self, user: &UserId) -> Option<&UserId> {
        if user == &self.initiator {
            Some(&self.recipient)
        } else if user == &self.recipient {
            Some(&self.initiator)
        } else {
            None
        }
    }
}

/// A message to hand to a connected user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub to: UserId,
    pub message: SignalingMessage,
}

impl Delivery {
    fn new(to: UserId, message: SignalingMessage) -> Self {
        Self { to, message }
    }
}

/// Live call table of the relay
#[derive(Debug, Default)]
pub struct SignalRouter {
    calls: HashMap<CallId, CallRoute>,
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a message sent by `from`
    pub fn route(
        &mut self,
        from: &UserId,
        from_name: &str,
        message: SignalingMessage,
        is_online: impl Fn(&UserId) -> bool,
    ) -> Vec<Delivery> {
        match message {
            SignalingMessage::StartCall {
                call_id,
                recipient_id,
            } => self.start(from, from_name, call_id, recipient_id, is_online),
            SignalingMessage::IncomingCall { call_id, .. } => {
                warn!(call_id = %call_id, from = %from, "Client sent a relay-only message, dropping");
                Vec::new()
            }
            message => {
                let call_id = message.call_id().clone();
                let Some(route) = self.calls.get(&call_id) else {
                    debug!(call_id = %call_id, "No live call for {} message, dropping", message.kind());
                    return Vec::new();
                };
                let Some(to) = route.counterpart(from).cloned() else {
                    warn!(call_id = %call_id, from = %from, "Sender is not a participant, dropping");
                    return Vec::new();
                };
                if message.is_terminal() {
                    self.calls.remove(&call_id);
                    info!(call_id = %call_id, "Call closed by {} ({})", from, message.kind());
                }
                vec![Delivery::new(to, message)]
            }
        }
    }

    fn start(
        &mut self,
        from: &UserId,
        from_name: &str,
        call_id: CallId,
        recipient_id: UserId,
        is_online: impl Fn(&UserId) -> bool,
    ) -> Vec<Delivery> {
        if self.calls.contains_key(&call_id) {
            debug!(call_id = %call_id, "Duplicate start, dropping");
            return Vec::new();
        }
        if &recipient_id == from || !is_online(&recipient_id) {
            info!(call_id = %call_id, "Recipient {} unavailable, rejecting", recipient_id);
            return vec![Delivery::new(
                from.clone(),
                SignalingMessage::RejectCall { call_id },
            )];
        }

        info!(call_id = %call_id, "Routing call {} -> {}", from, recipient_id);
        self.calls.insert(
            call_id.clone(),
            CallRoute {
                initiator: from.clone(),
                recipient: recipient_id.clone(),
            },
        );
        vec![Delivery::new(
            recipient_id,
            SignalingMessage::IncomingCall {
                call_id,
                initiator_id: from.clone(),
                initiator_name: from_name.to_string(),
            },
        )]
    }

    /// Drop every call of a departing user and tell the other ends
    pub fn disconnect(&mut self, user: &UserId) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        self.calls.retain(|call_id, route| match route.counterpart(user) {
            Some(other) => {
                deliveries.push(Delivery::new(
                    other.clone(),
                    SignalingMessage::EndCall {
                        call_id: call_id.clone(),
                    },
                ));
                false
            }
            None => true,
        });
        deliveries
    }

    pub fn live_calls(&self) -> usize {
        self.calls.len()
    }

    pub fn route_of(&self, call_id: &CallId) -> Option<&CallRoute> {
        self.calls.get(call_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signaling::message::SessionDescription;

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn bob() -> UserId {
        UserId::from("bob")
    }

    fn start(router: &mut SignalRouter, call_id: &str) -> Vec<Delivery> {
        router.route(
            &alice(),
            "Alice",
            SignalingMessage::StartCall {
                call_id: CallId::from(call_id),
                recipient_id: bob(),
            },
            |_| true,
        )
    }

    #[test]
    fn test_start_becomes_incoming_for_recipient() {
        let mut router = SignalRouter::new();
        let deliveries = start(&mut router, "c1");

        assert_eq!(
            deliveries,
            vec![Delivery::new(
                bob(),
                SignalingMessage::IncomingCall {
                    call_id: CallId::from("c1"),
                    initiator_id: alice(),
                    initiator_name: "Alice".to_string(),
                }
            )]
        );
        assert_eq!(router.live_calls(), 1);
    }

    #[test]
    fn test_offline_recipient_is_rejected_back() {
        let mut router = SignalRouter::new();
        let deliveries = router.route(
            &alice(),
            "Alice",
            SignalingMessage::StartCall {
                call_id: CallId::from("c1"),
                recipient_id: bob(),
            },
            |_| false,
        );

        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].to, alice());
        assert!(matches!(deliveries[0].message, SignalingMessage::RejectCall { .. }));
        assert_eq!(router.live_calls(), 0);
    }

    #[test]
    fn test_messages_flow_to_counterpart() {
        let mut router = SignalRouter::new();
        start(&mut router, "c1");

        let accept = router.route(
            &bob(),
            "Bob",
            SignalingMessage::AcceptCall {
                call_id: CallId::from("c1"),
            },
            |_| true,
        );
        assert_eq!(accept[0].to, alice());

        let offer = router.route(
            &alice(),
            "Alice",
            SignalingMessage::Offer {
                call_id: CallId::from("c1"),
                sdp: SessionDescription::offer("v=0"),
            },
            |_| true,
        );
        assert_eq!(offer[0].to, bob());
    }

    #[test]
    fn test_terminal_message_closes_route() {
        let mut router = SignalRouter::new();
        start(&mut router, "c1");

        let end = router.route(
            &bob(),
            "Bob",
            SignalingMessage::RejectCall {
                call_id: CallId::from("c1"),
            },
            |_| true,
        );
        assert_eq!(end[0].to, alice());
        assert_eq!(router.live_calls(), 0);

        let late = router.route(
            &alice(),
            "Alice",
            SignalingMessage::EndCall {
                call_id: CallId::from("c1"),
            },
            |_| true,
        );
        assert!(late.is_empty());
    }

    #[test]
    fn test_outsider_cannot_inject_into_call() {
        let mut router = SignalRouter::new();
        start(&mut router, "c1");

        let deliveries = router.route(
            &UserId::from("mallory"),
            "Mallory",
            SignalingMessage::EndCall {
                call_id: CallId::from("c1"),
            },
            |_| true,
        );
        assert!(deliveries.is_empty());
        assert_eq!(router.live_calls(), 1);
    }

    #[test]
    fn test_disconnect_ends_calls_of_user() {
        let mut router = SignalRouter::new();
        start(&mut router, "c1");

        let deliveries = router.disconnect(&bob());
        assert_eq!(
            deliveries,
            vec![Delivery::new(
                alice(),
                SignalingMessage::EndCall {
                    call_id: CallId::from("c1")
                }
            )]
        );
        assert_eq!(router.live_calls(), 0);
    }
}
