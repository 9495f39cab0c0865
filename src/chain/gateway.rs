//! Websocket log subscriptions, one per logical event topic.
//!
//! Each subscription yields decoded events lazily through
//! [`EventSource::next_event`]. A watchdog bounds the silence between
//! deliveries; when it fires, the subscription errors out and the supervisor
//! restarts the consumer. Gap-filling after a restart is the backfill
//! controller's job, not the gateway's.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::domain::{Envelope, EventMeta};

use super::codec::{
    decode_log, parse_hex_u64, EXECUTED_TOPIC, OPENED_TOPIC, REMOVED_TOPIC, STOPS_UPDATED_TOPIC,
};
use super::{ChainError, EventSource};

/// The four logical event topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Opened,
    Executed,
    StopsUpdated,
    Removed,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::Opened,
        Topic::Executed,
        Topic::StopsUpdated,
        Topic::Removed,
    ];

    /// topic0 hash this subscription filters on.
    pub fn topic0(&self) -> &'static str {
        match self {
            Topic::Opened => OPENED_TOPIC,
            Topic::Executed => EXECUTED_TOPIC,
            Topic::StopsUpdated => STOPS_UPDATED_TOPIC,
            Topic::Removed => REMOVED_TOPIC,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Opened => "opened",
            Topic::Executed => "executed",
            Topic::StopsUpdated => "stops_updated",
            Topic::Removed => "removed",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Factory for per-topic subscriptions.
#[derive(Debug, Clone)]
pub struct EventGateway {
    ws_url: String,
    contract: String,
    watchdog: Duration,
}

impl EventGateway {
    pub fn new(ws_url: String, contract: String, watchdog: Duration) -> Self {
        Self {
            ws_url,
            contract,
            watchdog,
        }
    }

    /// Open one `eth_subscribe("logs")` subscription for a topic.
    pub async fn subscribe(&self, topic: Topic) -> Result<EventSubscription, ChainError> {
        let (mut socket, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["logs", {
                "address": self.contract,
                "topics": [[topic.topic0()]],
            }],
        });
        socket
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        // The node acknowledges with the subscription id before any logs.
        let ack = tokio::time::timeout(self.watchdog, socket.next())
            .await
            .map_err(|_| ChainError::Watchdog(self.watchdog))?
            .ok_or(ChainError::SubscriptionClosed)?
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let sub_id = match ack {
            Message::Text(text) => {
                let v: Value = serde_json::from_str(&text)
                    .map_err(|e| ChainError::Decode(e.to_string()))?;
                if let Some(err) = v.get("error") {
                    return Err(ChainError::Rpc {
                        code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                        message: err
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown")
                            .to_string(),
                    });
                }
                v.get("result")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| ChainError::Decode("missing subscription id".to_string()))?
            }
            other => {
                return Err(ChainError::Decode(format!(
                    "unexpected subscribe ack: {:?}",
                    other
                )))
            }
        };

        debug!(%topic, sub_id, "subscribed");
        Ok(EventSubscription {
            socket,
            topic,
            watchdog: self.watchdog,
        })
    }
}

/// One live per-topic subscription.
pub struct EventSubscription {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    topic: Topic,
    watchdog: Duration,
}

#[async_trait]
impl EventSource for EventSubscription {
    async fn next_event(&mut self) -> Result<Envelope, ChainError> {
        loop {
            let message = tokio::time::timeout(self.watchdog, self.socket.next())
                .await
                .map_err(|_| ChainError::Watchdog(self.watchdog))?
                .ok_or(ChainError::SubscriptionClosed)?
                .map_err(|e| ChainError::Transport(e.to_string()))?;

            match message {
                Message::Text(text) => match parse_notification(&text) {
                    Ok(Some(envelope)) => return Ok(envelope),
                    Ok(None) => continue,
                    Err(e) if e.is_transient() => return Err(e),
                    Err(e) => {
                        // Permanent: bad payload. Drop the log and keep the
                        // stream; the reconciler repairs whatever was lost.
                        warn!(topic = %self.topic, error = %e, raw = %text, "undecodable log");
                        continue;
                    }
                },
                Message::Ping(payload) => {
                    self.socket
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| ChainError::Transport(e.to_string()))?;
                }
                Message::Close(_) => return Err(ChainError::SubscriptionClosed),
                _ => continue,
            }
        }
    }
}

/// Parse one `eth_subscription` notification into a decoded envelope.
///
/// Returns `None` for non-notification frames (acks, unrelated topics).
fn parse_notification(text: &str) -> Result<Option<Envelope>, ChainError> {
    let v: Value = serde_json::from_str(text).map_err(|e| ChainError::Decode(e.to_string()))?;

    if v.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return Ok(None);
    }
    let log = v
        .pointer("/params/result")
        .ok_or_else(|| ChainError::Decode("notification without result".to_string()))?;

    let topics: Vec<String> = log
        .get("topics")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let data = log.get("data").and_then(Value::as_str).unwrap_or("0x");

    let event = match decode_log(&topics, data)? {
        Some(ev) => ev,
        None => return Ok(None),
    };

    let meta = EventMeta {
        block_number: parse_hex_u64(
            log.get("blockNumber")
                .and_then(Value::as_str)
                .ok_or_else(|| ChainError::Decode("log without blockNumber".to_string()))?,
        )?,
        tx_hash: log
            .get("transactionHash")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Decode("log without transactionHash".to_string()))?
            .to_string(),
        log_index: parse_hex_u64(
            log.get("logIndex")
                .and_then(Value::as_str)
                .ok_or_else(|| ChainError::Decode("log without logIndex".to_string()))?,
        )?,
    };

    Ok(Some(Envelope { event, meta }))
}
