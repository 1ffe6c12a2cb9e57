//! Signaling relay for call clients
//!
//! Each user holds one WebSocket at `/signaling/:user_id?name=<display>`.
//! Frames are routed between the two participants of a call by the shared
//! [`SignalRouter`]; when a user drops, its calls end for the other side.

use crate::config::RelayConfig;
use crate::domain::shared::value_objects::UserId;
use crate::domain::signaling::{Delivery, SignalRouter};
use crate::infrastructure::signaling::wire::{self, ClientFrame, ServerFrame};
use crate::interface::metrics;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to bind {0}: {1}")]
    Bind(String, std::io::Error),

    #[error("Relay server failed: {0}")]
    Serve(std::io::Error),
}

/// A connected user
struct Connection {
    display_name: String,
    tx: mpsc::UnboundedSender<ServerFrame>,
}

#[derive(Default)]
struct RelayRegistry {
    users: HashMap<UserId, Connection>,
    router: SignalRouter,
}

impl RelayRegistry {
    fn deliver(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let Some(connection) = self.users.get(&delivery.to) else {
                debug!("{} is offline, dropping {}", delivery.to, delivery.message.kind());
                continue;
            };
            if let Some(frame) = ServerFrame::from_message(delivery.message) {
                let _ = connection.tx.send(frame);
            }
        }
    }
}

/// Relay state shared by every connection
#[derive(Default)]
pub struct RelayState {
    registry: Mutex<RelayRegistry>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; a user may hold only one
    async fn register(
        &self,
        user_id: &UserId,
        display_name: String,
        tx: mpsc::UnboundedSender<ServerFrame>,
    ) -> Result<(), String> {
        let mut registry = self.registry.lock().await;
        if registry.users.contains_key(user_id) {
            return Err(format!("{} is already connected", user_id));
        }
        registry
            .users
            .insert(user_id.clone(), Connection { display_name, tx });
        metrics::update_connected_users(registry.users.len());
        Ok(())
    }

    async fn unregister(&self, user_id: &UserId) {
        let mut registry = self.registry.lock().await;
        if registry.users.remove(user_id).is_none() {
            return;
        }
        let deliveries = registry.router.disconnect(user_id);
        if !deliveries.is_empty() {
            info!("{} left with {} live calls", user_id, deliveries.len());
        }
        registry.deliver(deliveries);
        metrics::update_connected_users(registry.users.len());
        metrics::update_live_calls(registry.router.live_calls());
    }

    async fn route(&self, from: &UserId, frame: ClientFrame) {
        let mut guard = self.registry.lock().await;
        let registry = &mut *guard;

        let from_name = frame
            .initiator_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| registry.users.get(from).map(|c| c.display_name.clone()))
            .unwrap_or_else(|| from.to_string());
        let message = frame.into_message();
        metrics::record_relayed_message(message.kind());

        let users = &registry.users;
        let deliveries = registry
            .router
            .route(from, &from_name, message, |user| users.contains_key(user));
        registry.deliver(deliveries);
        metrics::update_live_calls(registry.router.live_calls());
    }

    pub async fn connected_users(&self) -> usize {
        self.registry.lock().await.users.len()
    }

    pub async fn live_calls(&self) -> usize {
        self.registry.lock().await.router.live_calls()
    }
}

/// The relay server
#[derive(Clone, Default)]
pub struct SignalingRelay {
    state: Arc<RelayState>,
    metrics: Option<PrometheusHandle>,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `/metrics` from an installed recorder
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn state(&self) -> Arc<RelayState> {
        Arc::clone(&self.state)
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/signaling/:user_id", get(signaling_handler))
            .route("/health", get(health_check))
            .with_state(Arc::clone(&self.state));

        if let Some(handle) = &self.metrics {
            router = router.merge(metrics::metrics_router(handle.clone()));
        }
        router.layer(TraceLayer::new_for_http())
    }

    pub async fn bind(config: &RelayConfig) -> Result<TcpListener, RelayError> {
        let address = config.socket_addr();
        TcpListener::bind(&address)
            .await
            .map_err(|e| RelayError::Bind(address, e))
    }

    /// Serve until `shutdown` resolves
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), RelayError> {
        if let Ok(address) = listener.local_addr() {
            info!("Signaling relay listening on {}", address);
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(RelayError::Serve)
    }
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    name: Option<String>,
}

async fn health_check() -> Response {
    (StatusCode::OK, "OK").into_response()
}

async fn signaling_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    let display_name = params.name.unwrap_or_else(|| user_id.clone());
    ws.on_upgrade(move |socket| handle_socket(socket, UserId::from(user_id), display_name, state))
}

async fn handle_socket(
    socket: WebSocket,
    user_id: UserId,
    display_name: String,
    state: Arc<RelayState>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    if let Err(e) = state.register(&user_id, display_name, tx.clone()).await {
        warn!("Refusing connection: {}", e);
        if let Ok(text) = wire::encode(&ServerFrame::error("ALREADY_CONNECTED", e)) {
            let _ = sender.send(Message::Text(text)).await;
        }
        let _ = sender.close().await;
        return;
    }
    info!("Signaling connection established for {}", user_id);

    // Task to send frames to this user
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match wire::encode(&frame) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Task to receive frames from this user
    let recv_state = Arc::clone(&state);
    let recv_user = user_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    debug!("Received frame from {}: {}", recv_user, text);
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) => recv_state.route(&recv_user, frame).await,
                        Err(e) => {
                            warn!("Invalid frame from {}: {}", recv_user, e);
                            let _ = tx.send(ServerFrame::error(
                                "PARSE_ERROR",
                                format!("Invalid message format: {}", e),
                            ));
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket closed by {}", recv_user);
                    break;
                }
                // pings are answered by axum
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error for {}: {}", recv_user, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.unregister(&user_id).await;
    info!("Signaling connection closed for {}", user_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::CallId;
    use crate::infrastructure::signaling::wire::{CallRef, StartCallData};

    async fn connect(state: &RelayState, user: &str) -> mpsc::UnboundedReceiver<ServerFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .register(&UserId::from(user), user.to_uppercase(), tx)
            .await
            .unwrap();
        rx
    }

    fn start(call_id: &str, to: &str) -> ClientFrame {
        ClientFrame::Start(StartCallData {
            call_id: CallId::from(call_id),
            recipient_id: UserId::from(to),
            initiator_name: None,
        })
    }

    #[tokio::test]
    async fn test_duplicate_connection_is_refused() {
        let state = RelayState::new();
        let _alice = connect(&state, "alice").await;
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(state
            .register(&UserId::from("alice"), "Alice".to_string(), tx)
            .await
            .is_err());
        assert_eq!(state.connected_users().await, 1);
    }

    #[tokio::test]
    async fn test_start_uses_connection_name() {
        let state = RelayState::new();
        let _alice = connect(&state, "alice").await;
        let mut bob = connect(&state, "bob").await;

        state.route(&UserId::from("alice"), start("c1", "bob")).await;

        match bob.recv().await {
            Some(ServerFrame::Incoming(data)) => {
                assert_eq!(data.call_id, CallId::from("c1"));
                assert_eq!(data.initiator_name, "ALICE");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert_eq!(state.live_calls().await, 1);
    }

    #[tokio::test]
    async fn test_accept_is_forwarded_as_accepted() {
        let state = RelayState::new();
        let mut alice = connect(&state, "alice").await;
        let mut bob = connect(&state, "bob").await;
        state.route(&UserId::from("alice"), start("c1", "bob")).await;
        let _ = bob.recv().await;

        state
            .route(
                &UserId::from("bob"),
                ClientFrame::Accept(CallRef {
                    call_id: CallId::from("c1"),
                }),
            )
            .await;

        assert_eq!(
            alice.recv().await,
            Some(ServerFrame::Accepted(CallRef {
                call_id: CallId::from("c1")
            }))
        );
    }

    #[tokio::test]
    async fn test_departure_ends_calls() {
        let state = RelayState::new();
        let _alice = connect(&state, "alice").await;
        let mut bob = connect(&state, "bob").await;
        state.route(&UserId::from("alice"), start("c1", "bob")).await;
        let _ = bob.recv().await;

        state.unregister(&UserId::from("alice")).await;

        assert_eq!(
            bob.recv().await,
            Some(ServerFrame::Ended(CallRef {
                call_id: CallId::from("c1")
            }))
        );
        assert_eq!(state.live_calls().await, 0);
        assert_eq!(state.connected_users().await, 1);
    }
}
