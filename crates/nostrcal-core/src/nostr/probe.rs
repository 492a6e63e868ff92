//! Fastest-relay selection by racing speculative socket opens.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

use super::transport::TransportError;
use crate::policy::ProbePolicy;

/// Opens a connection to a relay and reports once it is usable. Dropping the
/// future abandons the attempt and closes whatever was opened.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn open(&self, relay: &str) -> Result<(), TransportError>;
}

/// First of `candidates` to open within `cap`, or `None` if none did.
/// Attempts still in flight when a winner is found are dropped.
pub async fn race_open(
    connector: &dyn RelayConnector,
    candidates: &[String],
    cap: Duration,
) -> Option<String> {
    let mut attempts: FuturesUnordered<_> = candidates
        .iter()
        .map(|relay| async move { connector.open(relay).await.map(|()| relay.clone()) })
        .collect();

    let race = async {
        while let Some(result) = attempts.next().await {
            match result {
                Ok(relay) => return Some(relay),
                Err(e) => debug!("probe candidate failed: {}", e),
            }
        }
        None
    };

    timeout(cap, race).await.ok().flatten()
}

struct CachedPick {
    relay: String,
    candidates: Vec<String>,
    at: Instant,
}

pub struct RelayProbe {
    connector: Arc<dyn RelayConnector>,
    policy: ProbePolicy,
    cache: Mutex<Option<CachedPick>>,
}

impl RelayProbe {
    pub fn new(connector: Arc<dyn RelayConnector>, policy: ProbePolicy) -> Self {
        Self {
            connector,
            policy,
            cache: Mutex::new(None),
        }
    }

    /// The relay among the first few `candidates` that opens first.
    ///
    /// Never waits longer than the policy cap: if nothing opens in time the
    /// first candidate is returned. Winners are cached for the policy TTL.
    /// `None` only when `candidates` is empty.
    pub async fn pick_fastest_relay(&self, candidates: &[String]) -> Option<String> {
        let candidates: Vec<String> = candidates
            .iter()
            .take(self.policy.max_candidates)
            .cloned()
            .collect();
        let first = candidates.first()?.clone();

        if let Some(relay) = self.cached(&candidates) {
            debug!("fastest relay (cached): {}", relay);
            return Some(relay);
        }

        let started = Instant::now();
        match race_open(self.connector.as_ref(), &candidates, self.policy.cap()).await {
            Some(relay) => {
                info!("fastest relay {} opened in {:?}", relay, started.elapsed());
                *self.cache.lock() = Some(CachedPick {
                    relay: relay.clone(),
                    candidates,
                    at: Instant::now(),
                });
                Some(relay)
            }
            None => {
                info!(
                    "no relay opened within {:?}, falling back to {}",
                    self.policy.cap(),
                    first
                );
                Some(first)
            }
        }
    }

    fn cached(&self, candidates: &[String]) -> Option<String> {
        let cache = self.cache.lock();
        let pick = cache.as_ref()?;
        let fresh = pick.at.elapsed() < self.policy.cache_ttl();
        (fresh && pick.candidates == candidates).then(|| pick.relay.clone())
    }
}
