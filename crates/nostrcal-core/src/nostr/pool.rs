use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use nostr_sdk::prelude::*;
use tracing::debug;

use super::filter::EventFilter;
use super::transport::{Subscription, Transport, TransportError};

/// Label used for events whose source relay the pool does not report.
const POOL_RELAY: &str = "pool";

/// Queries through a `nostr-sdk` relay pool. Relays are added to the pool on
/// first use and kept connected for later queries.
///
/// Events are forwarded as the pool receives them, so a caller's deadline
/// still sees whatever arrived before it. The pool holds the REQ until each
/// relay connects; `fetch_timeout` bounds connect and fetch together.
#[derive(Debug, Clone)]
pub struct PoolTransport {
    client: Client,
    fetch_timeout: Duration,
}

impl PoolTransport {
    pub fn new(client: Client, fetch_timeout: Duration) -> Self {
        Self {
            client,
            fetch_timeout,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl Default for PoolTransport {
    fn default() -> Self {
        Self::new(Client::default(), Duration::from_secs(6))
    }
}

#[async_trait]
impl Transport for PoolTransport {
    fn name(&self) -> &'static str {
        "relay-pool"
    }

    async fn subscribe(
        &self,
        relays: &[String],
        filter: &EventFilter,
    ) -> Result<Subscription, TransportError> {
        if relays.is_empty() {
            return Err(TransportError::NoRelays);
        }

        let mut added = 0usize;
        for relay in relays {
            match self.client.add_relay(relay.as_str()).await {
                Ok(_) => added += 1,
                Err(e) => debug!(relay = %relay, "pool rejected relay: {}", e),
            }
        }
        if added == 0 {
            return Err(TransportError::Pool("no usable relay urls".to_string()));
        }

        let (tx, sub) = Subscription::channel();
        let client = self.client.clone();
        let relays = relays.to_vec();
        let sdk_filter = filter.to_sdk_filter();
        let fetch_timeout = self.fetch_timeout;

        tokio::spawn(async move {
            client.connect().await;

            match client
                .stream_events_from(relays, sdk_filter, fetch_timeout)
                .await
            {
                Ok(mut stream) => {
                    let mut received = 0usize;
                    while let Some(event) = stream.next().await {
                        received += 1;
                        if !tx.event(POOL_RELAY, event) {
                            return;
                        }
                    }
                    debug!("pool stream ended after {} events", received);
                }
                Err(e) => debug!("pool stream failed: {}", e),
            }
            tx.complete();
        });

        Ok(sub)
    }
}
