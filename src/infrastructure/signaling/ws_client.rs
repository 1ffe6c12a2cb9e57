//! WebSocket signaling client
//!
//! Connects to `GET {base}/signaling/{user_id}?name={display_name}` on the
//! relay. A writer task drains the outbound queue; a reader task decodes
//! frames into the inbox.

use crate::domain::shared::value_objects::UserId;
use crate::domain::signaling::{
    SignalingError, SignalingInbox, SignalingMessage, SignalingTransport,
};
use crate::infrastructure::signaling::wire::{self, ClientFrame, ServerFrame};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

pub struct WsSignalingClient {
    user_id: UserId,
    display_name: String,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsSignalingClient {
    /// Open the relay connection for `user_id`
    pub async fn connect(
        base_url: &str,
        user_id: impl Into<UserId>,
        display_name: impl Into<String>,
    ) -> Result<(Self, SignalingInbox), SignalingError> {
        let user_id = user_id.into();
        let display_name = display_name.into();
        let url = signaling_url(base_url, &user_id, &display_name)?;

        info!("Connecting to signaling relay at {}", url);
        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| SignalingError::Connect(e.to_string()))?;
        debug!("Signaling connected (status={})", response.status());

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match wire::encode(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("{}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("Signaling send failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_user = user_id.clone();
        let reader = tokio::spawn(async move {
            while let Some(result) = source.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(ServerFrame::Error(error)) => {
                            warn!(user = %reader_user, "Relay error {}: {}", error.code, error.message);
                        }
                        Ok(frame) => {
                            if let Some(message) = frame.into_message() {
                                if inbox_tx.send(message).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => warn!(user = %reader_user, "Unparseable frame from relay: {}", e),
                    },
                    Ok(Message::Close(frame)) => {
                        info!(user = %reader_user, "Signaling closed: {:?}", frame);
                        break;
                    }
                    // pings are answered by the protocol layer
                    Ok(_) => {}
                    Err(e) => {
                        warn!(user = %reader_user, "Signaling receive error: {}", e);
                        break;
                    }
                }
            }
            debug!(user = %reader_user, "Signaling reader stopped");
        });

        let client = Self {
            user_id,
            display_name,
            outbound: outbound_tx,
            reader,
            writer,
        };
        Ok((client, inbox_rx))
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn is_connected(&self) -> bool {
        !self.reader.is_finished() && !self.writer.is_finished()
    }

    /// Flush queued frames and close the socket
    pub async fn close(self) {
        let Self {
            outbound,
            reader,
            writer,
            ..
        } = self;
        drop(outbound);
        let _ = writer.await;
        reader.abort();
    }
}

impl SignalingTransport for WsSignalingClient {
    fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        let kind = message.kind();
        let frame = ClientFrame::from_message(message, Some(&self.display_name))
            .ok_or(SignalingError::Unsendable(kind))?;
        self.outbound
            .send(frame)
            .map_err(|_| SignalingError::NotConnected)
    }
}

fn signaling_url(base: &str, user_id: &UserId, display_name: &str) -> Result<Url, SignalingError> {
    let mut url = Url::parse(base)
        .map_err(|e| SignalingError::Connect(format!("invalid relay url {}: {}", base, e)))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| SignalingError::Connect(format!("relay url {} cannot carry a path", base)))?;
        segments.pop_if_empty().push("signaling").push(user_id.as_str());
    }
    url.query_pairs_mut().append_pair("name", display_name);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signaling_url() {
        let url = signaling_url("ws://127.0.0.1:8080", &UserId::from("alice"), "Alice Liddell").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8080/signaling/alice?name=Alice+Liddell");
    }

    #[test]
    fn test_signaling_url_keeps_base_path() {
        let url = signaling_url("wss://relay.example/rtc/", &UserId::from("bob"), "Bob").unwrap();
        assert_eq!(url.as_str(), "wss://relay.example/rtc/signaling/bob?name=Bob");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            signaling_url("not a url", &UserId::from("bob"), "Bob"),
            Err(SignalingError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let result = WsSignalingClient::connect("ws://127.0.0.1:1", "alice", "Alice").await;
        assert!(matches!(result, Err(SignalingError::Connect(_))));
    }
}
