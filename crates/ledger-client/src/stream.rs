//! Live event stream
//!
//! One persistent websocket per session speaking JSON-RPC `eth_subscribe`.
//! Decoded [`GameEvent`]s are pushed onto an mpsc channel together with
//! connection lifecycle messages, so consumers never see transport detail.

use crate::contract::event_topics;
use crate::events::{GameEvent, RawLog};
use alloy::primitives::Address;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// How long to wait for the `eth_subscribe` response
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON-RPC id of the subscribe request
const SUBSCRIBE_REQUEST_ID: u64 = 1;

/// Message delivered to the stream consumer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    /// Subscription established. A fresh connection is a resynchronization point.
    Connected,
    Event(GameEvent),
    /// The connection dropped; no further events until a reconnect
    Disconnected { reason: String },
}

/// Event stream errors
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Subscription rejected: {0}")]
    Rejected(String),
    #[error("Connection closed before subscription was confirmed")]
    ClosedEarly,
    #[error("Timed out waiting for subscription")]
    Timeout,
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handle to the running subscription
pub struct EventStream {
    subscription_id: String,
    live: Arc<AtomicBool>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl EventStream {
    /// Connect to `ws_url`, subscribe to all game events emitted by
    /// `contract`, and start forwarding them to `sink`.
    ///
    /// `StreamMessage::Connected` is sent before any event.
    pub async fn connect(
        ws_url: &str,
        contract: Address,
        sink: mpsc::Sender<StreamMessage>,
    ) -> Result<Self, StreamError> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let request = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_REQUEST_ID,
            "method": "eth_subscribe",
            "params": ["logs", {
                "address": contract,
                "topics": [event_topics()],
            }],
        });
        ws_sender.send(Message::Text(serde_json::to_string(&request)?)).await?;

        let subscription_id = tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
            while let Some(msg) = ws_receiver.next().await {
                if let Message::Text(text) = msg? {
                    if let Some(result) = parse_subscribe_response(&text) {
                        return result;
                    }
                }
            }
            Err::<String, StreamError>(StreamError::ClosedEarly)
        })
        .await
        .map_err(|_| StreamError::Timeout)??;

        tracing::info!("Subscribed to game events at {} (subscription {})", ws_url, subscription_id);

        let live = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let _ = sink.send(StreamMessage::Connected).await;

        let task_live = live.clone();
        let task_sub_id = subscription_id.clone();
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        task_live.store(false, Ordering::SeqCst);
                        tracing::debug!("Event stream closed");
                        return;
                    }
                    msg = ws_receiver.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = parse_notification(&text, &task_sub_id) {
                                if sink.send(StreamMessage::Event(event)).await.is_err() {
                                    break "consumer dropped".to_string();
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws_sender.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) => break "closed by server".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break e.to_string(),
                        None => break "connection ended".to_string(),
                    }
                }
            };

            task_live.store(false, Ordering::SeqCst);
            tracing::warn!("Event stream disconnected: {}", reason);
            let _ = sink.send(StreamMessage::Disconnected { reason }).await;
        });

        Ok(Self {
            subscription_id,
            live,
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Whether the websocket is currently connected
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Close the connection. Safe to call any number of times.
    pub fn close(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        self.live.store(false, Ordering::SeqCst);
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parse the response to the subscribe request, ignoring anything else
fn parse_subscribe_response(text: &str) -> Option<Result<String, StreamError>> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_REQUEST_ID) {
        return None;
    }
    if let Some(error) = value.get("error") {
        return Some(Err(StreamError::Rejected(error.to_string())));
    }
    let sub_id = match value.get("result") {
        Some(Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => return Some(Err(StreamError::Rejected("missing result".to_string()))),
    };
    Some(Ok(sub_id))
}

/// Decode an `eth_subscription` notification into a game event
fn parse_notification(text: &str, subscription_id: &str) -> Option<GameEvent> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return None;
    }
    let params = value.get("params")?;
    let sub_matches = match params.get("subscription")? {
        Value::String(id) => id == subscription_id,
        other => other.to_string() == subscription_id,
    };
    if !sub_matches {
        return None;
    }

    let log: RawLog = match serde_json::from_value(params.get("result")?.clone()) {
        Ok(log) => log,
        Err(e) => {
            tracing::warn!("Malformed log notification: {}", e);
            return None;
        }
    };
    if log.removed {
        tracing::debug!("Skipping removed log");
        return None;
    }

    match GameEvent::decode(&log) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Failed to decode game event: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{BallClaimed, GameEnded};
    use crate::events::tests::raw_log;
    use alloy::primitives::U256;
    use alloy::sol_types::SolEvent;
    use ballgame_types::ObjectKind;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn notification(sub_id: &str, log: &RawLog) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": sub_id,
                "result": {
                    "address": log.address,
                    "topics": log.topics,
                    "data": log.data,
                    "removed": log.removed,
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_subscribe_response() {
        let ok = parse_subscribe_response(r#"{"jsonrpc":"2.0","id":1,"result":"0xabc"}"#);
        assert_eq!(ok.unwrap().unwrap(), "0xabc");

        let rejected =
            parse_subscribe_response(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#);
        assert!(matches!(rejected, Some(Err(StreamError::Rejected(_)))));

        assert!(parse_subscribe_response(r#"{"jsonrpc":"2.0","id":7,"result":"0x1"}"#).is_none());
    }

    #[test]
    fn test_notification_for_other_subscription_is_ignored() {
        let data = GameEnded {
            gameId: U256::from(1),
            endedBy: Address::repeat_byte(1),
        }
        .encode_log_data();
        let log = raw_log(Address::ZERO, data);

        assert!(parse_notification(&notification("0xother", &log), "0xmine").is_none());
        assert!(parse_notification(&notification("0xmine", &log), "0xmine").is_some());
    }

    #[test]
    fn test_removed_log_is_ignored() {
        let data = GameEnded {
            gameId: U256::from(1),
            endedBy: Address::repeat_byte(1),
        }
        .encode_log_data();
        let mut log = raw_log(Address::ZERO, data);
        log.removed = true;

        assert!(parse_notification(&notification("0x1", &log), "0x1").is_none());
    }

    #[tokio::test]
    async fn test_stream_delivers_events_then_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let contract = Address::repeat_byte(0xee);
        let player = Address::repeat_byte(0x42);

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let request = match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => serde_json::from_str::<Value>(&text).unwrap(),
                other => panic!("unexpected frame {:?}", other),
            };
            assert_eq!(request["method"], "eth_subscribe");
            assert_eq!(request["params"][0], "logs");

            ws.send(Message::Text(
                json!({"jsonrpc": "2.0", "id": 1, "result": "0xfeed"}).to_string(),
            ))
            .await
            .unwrap();

            let claimed = BallClaimed {
                gameId: U256::from(2),
                index: 3,
                player,
                ballType: 1,
                newScore: U256::from(3),
            }
            .encode_log_data();
            ws.send(Message::Text(notification("0xfeed", &raw_log(contract, claimed))))
                .await
                .unwrap();

            ws.close(None).await.unwrap();
        });

        let (tx, mut rx) = mpsc::channel(16);
        let stream = EventStream::connect(&format!("ws://{}", addr), contract, tx)
            .await
            .unwrap();
        assert_eq!(stream.subscription_id(), "0xfeed");

        assert_eq!(rx.recv().await.unwrap(), StreamMessage::Connected);
        assert_eq!(
            rx.recv().await.unwrap(),
            StreamMessage::Event(GameEvent::ObjectClaimed {
                round_id: 2,
                index: 3,
                actor: player,
                kind: ObjectKind::Special,
                new_score: 3,
            })
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            StreamMessage::Disconnected { .. }
        ));
        assert!(!stream.is_live());

        // closing an already-dead stream is a no-op
        stream.close();
        stream.close();

        server.await.unwrap();
    }
}
