//! Raw WebSocket relay access: `["REQ", ...]` until `["EOSE", ...]`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use nostr_sdk::prelude::Event;
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use super::filter::EventFilter;
use super::probe::RelayConnector;
use super::transport::{Subscription, SubscriptionSender, Transport, TransportError};

/// A relay frame addressed to our subscription.
#[derive(Debug)]
pub enum RelayFrame {
    Event(Box<Event>),
    Eose,
    Closed(String),
    Notice(String),
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// Unparseable, or for another subscription
    Ignored,
}

/// Parse one text frame from a relay, keeping only what belongs to `sub_id`.
pub fn parse_relay_frame(text: &str, sub_id: &str) -> RelayFrame {
    let Ok(Value::Array(arr)) = serde_json::from_str::<Value>(text) else {
        return RelayFrame::Ignored;
    };
    let label = arr.first().and_then(|v| v.as_str());
    let for_us = arr.get(1).and_then(|v| v.as_str()) == Some(sub_id);

    match label {
        Some("EVENT") if for_us && arr.len() >= 3 => {
            match serde_json::from_value::<Event>(arr[2].clone()) {
                Ok(event) => RelayFrame::Event(Box::new(event)),
                Err(_) => RelayFrame::Ignored,
            }
        }
        Some("EOSE") if for_us => RelayFrame::Eose,
        Some("CLOSED") if for_us => RelayFrame::Closed(
            arr.get(2)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        ),
        Some("NOTICE") => RelayFrame::Notice(
            arr.get(1)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        ),
        Some("OK") if arr.len() >= 3 => RelayFrame::Ok {
            event_id: arr[1].as_str().unwrap_or_default().to_string(),
            accepted: arr[2].as_bool().unwrap_or(false),
            message: arr
                .get(3)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        },
        _ => RelayFrame::Ignored,
    }
}

#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn name(&self) -> &'static str {
        "raw-websocket"
    }

    async fn subscribe(
        &self,
        relays: &[String],
        filter: &EventFilter,
    ) -> Result<Subscription, TransportError> {
        if relays.is_empty() {
            return Err(TransportError::NoRelays);
        }

        let (tx, sub) = Subscription::channel();
        let sub_id = format!("nostrcal-{}", uuid::Uuid::new_v4().simple());
        let req = json!(["REQ", sub_id, filter.to_json()]).to_string();
        let relays = relays.to_vec();
        let connect_timeout = self.connect_timeout;

        tokio::spawn(async move {
            let runs = relays.into_iter().map(|relay| {
                subscribe_relay(relay, req.clone(), sub_id.clone(), tx.clone(), connect_timeout)
            });
            futures::future::join_all(runs).await;
            tx.complete();
        });

        Ok(sub)
    }
}

/// Stream one relay's stored events into `tx`. Every failure just ends this
/// relay's contribution.
async fn subscribe_relay(
    relay: String,
    req: String,
    sub_id: String,
    tx: SubscriptionSender,
    connect_timeout: Duration,
) {
    let mut ws = match timeout(connect_timeout, connect_async(relay.as_str())).await {
        Ok(Ok((ws, _))) => ws,
        Ok(Err(e)) => {
            debug!(relay = %relay, "connect failed: {}", e);
            return;
        }
        Err(_) => {
            debug!(relay = %relay, "connect timed out after {:?}", connect_timeout);
            return;
        }
    };

    if let Err(e) = ws.send(Message::Text(req)).await {
        debug!(relay = %relay, "REQ failed: {}", e);
        return;
    }

    let mut received = 0usize;
    loop {
        let msg = tokio::select! {
            _ = tx.closed() => break,
            msg = ws.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => match parse_relay_frame(&text, &sub_id) {
                RelayFrame::Event(event) => {
                    received += 1;
                    if !tx.event(&relay, *event) {
                        break;
                    }
                }
                RelayFrame::Eose => break,
                RelayFrame::Closed(reason) => {
                    debug!(relay = %relay, "subscription closed by relay: {}", reason);
                    return;
                }
                RelayFrame::Notice(notice) => debug!(relay = %relay, "NOTICE: {}", notice),
                RelayFrame::Ok { .. } | RelayFrame::Ignored => {}
            },
            Some(Ok(Message::Close(_))) | None => {
                debug!(relay = %relay, "socket closed after {} events", received);
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(relay = %relay, "socket error: {}", e);
                return;
            }
        }
    }

    debug!(relay = %relay, "finished with {} events", received);
    let _ = ws
        .send(Message::Text(json!(["CLOSE", sub_id]).to_string()))
        .await;
    let _ = ws.close(None).await;
}

/// Opens a real socket and closes it again; used by the relay probe.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl RelayConnector for WsConnector {
    async fn open(&self, relay: &str) -> Result<(), TransportError> {
        let (mut ws, _) =
            connect_async(relay)
                .await
                .map_err(|e| TransportError::Connect {
                    relay: relay.to_string(),
                    reason: e.to_string(),
                })?;
        let _ = ws.close(None).await;
        Ok(())
    }
}
