//! `["EVENT", ev]` publication over raw sockets, collecting each relay's
//! `["OK", id, accepted, message]`.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use nostr_sdk::prelude::Event;
use serde_json::json;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::ws::{parse_relay_frame, RelayFrame};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("refusing to publish an event that fails verification: {0}")]
    InvalidEvent(String),

    #[error("no relays to publish to")]
    NoRelays,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Accepted,
    Rejected(String),
    /// Socket failed or no OK arrived in time
    Unreachable(String),
}

#[derive(Debug, Clone)]
pub struct PublishReport {
    pub event_id: String,
    pub outcomes: Vec<(String, RelayOutcome)>,
}

impl PublishReport {
    pub fn accepted(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == RelayOutcome::Accepted)
            .map(|(r, _)| r.as_str())
            .collect()
    }

    pub fn is_accepted_anywhere(&self) -> bool {
        self.outcomes.iter().any(|(_, o)| *o == RelayOutcome::Accepted)
    }
}

#[derive(Debug, Clone)]
pub struct Publisher {
    connect_timeout: Duration,
    ok_timeout: Duration,
}

impl Publisher {
    pub fn new(connect_timeout: Duration, ok_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ok_timeout,
        }
    }

    pub async fn publish(
        &self,
        event: &Event,
        relays: &[String],
    ) -> Result<PublishReport, PublishError> {
        event
            .verify()
            .map_err(|e| PublishError::InvalidEvent(e.to_string()))?;
        if relays.is_empty() {
            return Err(PublishError::NoRelays);
        }

        let frame = json!(["EVENT", event]).to_string();
        let event_id = event.id.to_hex();
        let sends = relays
            .iter()
            .map(|relay| self.publish_to(relay, &frame, &event_id));
        let outcomes = futures::future::join_all(sends).await;

        let report = PublishReport {
            event_id,
            outcomes: relays.iter().cloned().zip(outcomes).collect(),
        };
        info!(
            "published {} to {}/{} relays",
            report.event_id,
            report.accepted().len(),
            relays.len()
        );
        Ok(report)
    }

    async fn publish_to(&self, relay: &str, frame: &str, event_id: &str) -> RelayOutcome {
        let mut ws = match timeout(self.connect_timeout, connect_async(relay)).await {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => return RelayOutcome::Unreachable(e.to_string()),
            Err(_) => return RelayOutcome::Unreachable("connect timed out".to_string()),
        };
        if let Err(e) = ws.send(Message::Text(frame.to_string())).await {
            return RelayOutcome::Unreachable(e.to_string());
        }

        let deadline = Instant::now() + self.ok_timeout;
        let outcome = loop {
            let msg = match timeout_at(deadline, ws.next()).await {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => break RelayOutcome::Unreachable(e.to_string()),
                Ok(None) => break RelayOutcome::Unreachable("socket closed".to_string()),
                Err(_) => break RelayOutcome::Unreachable("no OK before timeout".to_string()),
            };
            let Message::Text(text) = msg else { continue };
            match parse_relay_frame(&text, "") {
                RelayFrame::Ok {
                    event_id: id,
                    accepted,
                    message,
                } if id == event_id => {
                    break if accepted {
                        RelayOutcome::Accepted
                    } else {
                        RelayOutcome::Rejected(message)
                    };
                }
                RelayFrame::Notice(notice) => debug!(relay = %relay, "NOTICE: {}", notice),
                _ => {}
            }
        };

        if let RelayOutcome::Rejected(reason) = &outcome {
            warn!(relay = %relay, "event rejected: {}", reason);
        }
        let _ = ws.close(None).await;
        outcome
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(10))
    }
}
