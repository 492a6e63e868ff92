//! One subscription interface over every way we talk to relays.
//!
//! Adapters: [`super::ws::WsTransport`] (raw sockets) and
//! [`super::pool::PoolTransport`] (`nostr-sdk` relay pool).

use async_trait::async_trait;
use nostr_sdk::prelude::Event;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use super::filter::EventFilter;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {relay}: {reason}")]
    Connect { relay: String, reason: String },

    #[error("relay pool error: {0}")]
    Pool(String),

    #[error("no relays to query")]
    NoRelays,
}

#[derive(Debug)]
pub enum SubscriptionItem {
    Event { relay: String, event: Box<Event> },
    /// Every relay finished (EOSE or closed). Dropping the sender means the
    /// same thing.
    Complete,
}

#[derive(Debug, Clone)]
pub struct SubscriptionSender {
    tx: mpsc::UnboundedSender<SubscriptionItem>,
}

impl SubscriptionSender {
    /// Returns false once the subscriber is gone.
    pub fn event(&self, relay: &str, event: Event) -> bool {
        self.tx
            .send(SubscriptionItem::Event {
                relay: relay.to_string(),
                event: Box::new(event),
            })
            .is_ok()
    }

    pub fn complete(&self) {
        let _ = self.tx.send(SubscriptionItem::Complete);
    }

    /// Resolves once the subscriber has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Stream of events followed by a completion signal.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<SubscriptionItem>,
}

/// What a subscription yielded before it completed or the deadline hit.
#[derive(Debug, Default)]
pub struct Collected {
    pub events: Vec<Event>,
    pub completed: bool,
}

impl Subscription {
    pub fn channel() -> (SubscriptionSender, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SubscriptionSender { tx }, Subscription { rx })
    }

    /// Drain until completion or `deadline`, keeping partial results.
    pub async fn collect_until(mut self, deadline: Instant) -> Collected {
        let mut collected = Collected::default();
        loop {
            match timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(SubscriptionItem::Event { event, .. })) => collected.events.push(*event),
                Ok(Some(SubscriptionItem::Complete)) | Ok(None) => {
                    collected.completed = true;
                    break;
                }
                Err(_) => break,
            }
        }
        collected
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a subscription on `relays`. Per-relay failures are reported by
    /// the relay simply finishing early; only a failure that leaves nothing to
    /// subscribe to is returned as an error.
    async fn subscribe(
        &self,
        relays: &[String],
        filter: &EventFilter,
    ) -> Result<Subscription, TransportError>;
}
