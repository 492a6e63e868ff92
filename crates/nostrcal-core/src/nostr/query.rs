//! Two-tier event query: one fast relay first, then every relay through every
//! adapter.

use std::collections::HashMap;
use std::sync::Arc;

use nostr_sdk::prelude::*;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::filter::EventFilter;
use super::identity;
use super::probe::RelayProbe;
use super::transport::{Collected, Transport};
use crate::models::tag_utils::extract_tag_str;
use crate::policy::QueryPolicy;

pub struct EventQueryEngine {
    probe: Arc<RelayProbe>,
    pool: Arc<dyn Transport>,
    raw: Arc<dyn Transport>,
    relays: Vec<String>,
    policy: QueryPolicy,
}

impl EventQueryEngine {
    pub fn new(
        probe: Arc<RelayProbe>,
        pool: Arc<dyn Transport>,
        raw: Arc<dyn Transport>,
        relays: Vec<String>,
        policy: QueryPolicy,
    ) -> Self {
        Self {
            probe,
            pool,
            raw,
            relays,
            policy,
        }
    }

    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    /// Verified events matching `filter`, one per logical identity, oldest
    /// first. Never fails: unreachable relays just contribute nothing.
    ///
    /// `authors_hint` (npub or hex) applies only when the filter names no
    /// authors.
    pub async fn fetch_events(&self, filter: &EventFilter, authors_hint: &[String]) -> Vec<Event> {
        let filter = apply_authors_hint(filter, authors_hint);
        if self.relays.is_empty() {
            debug!("no relays configured, nothing to query");
            return Vec::new();
        }

        let fast = self.fast_path(&filter).await;
        if !fast.is_empty() {
            return dedupe_events(fast);
        }

        dedupe_events(self.fallback(&filter).await)
    }

    async fn fast_path(&self, filter: &EventFilter) -> Vec<Event> {
        let Some(relay) = self.probe.pick_fastest_relay(&self.relays).await else {
            return Vec::new();
        };
        let filter = filter.with_limit(self.policy.fast_path_limit_for(filter.limit));
        let deadline = Instant::now() + self.policy.fast_path_timeout();

        let events = run_transport(self.raw.as_ref(), &[relay.clone()], &filter, deadline).await;
        debug!(relay = %relay, "fast path returned {} events", events.len());
        events
    }

    async fn fallback(&self, filter: &EventFilter) -> Vec<Event> {
        let deadline = Instant::now() + self.policy.fallback_timeout();
        let (pooled, raw) = tokio::join!(
            run_transport(self.pool.as_ref(), &self.relays, filter, deadline),
            run_transport(self.raw.as_ref(), &self.relays, filter, deadline),
        );
        info!(
            "fallback query: {} returned {}, {} returned {}",
            self.pool.name(),
            pooled.len(),
            self.raw.name(),
            raw.len()
        );
        if raw.len() > pooled.len() {
            raw
        } else {
            pooled
        }
    }
}

/// Run one adapter until it completes or `deadline`, keeping only events
/// whose id and signature check out.
async fn run_transport(
    transport: &dyn Transport,
    relays: &[String],
    filter: &EventFilter,
    deadline: Instant,
) -> Vec<Event> {
    let subscription =
        match tokio::time::timeout_at(deadline, transport.subscribe(relays, filter)).await {
            Ok(Ok(sub)) => sub,
            Ok(Err(e)) => {
                debug!("{} subscribe failed: {}", transport.name(), e);
                return Vec::new();
            }
            Err(_) => {
                debug!("{} subscribe timed out", transport.name());
                return Vec::new();
            }
        };

    let Collected { events, completed } = subscription.collect_until(deadline).await;
    if !completed {
        debug!(
            "{} hit the deadline with {} events",
            transport.name(),
            events.len()
        );
    }

    let total = events.len();
    let verified: Vec<Event> = events.into_iter().filter(|e| e.verify().is_ok()).collect();
    if verified.len() < total {
        warn!(
            "{} dropped {} events failing verification",
            transport.name(),
            total - verified.len()
        );
    }
    verified
}

fn apply_authors_hint(filter: &EventFilter, authors_hint: &[String]) -> EventFilter {
    if filter.authors.is_some() || authors_hint.is_empty() {
        return filter.clone();
    }

    let authors: Vec<String> = authors_hint
        .iter()
        .filter_map(|hint| {
            let hex = identity::to_hex(hint);
            if hex.is_none() {
                warn!("skipping unparseable author hint: {}", hint);
            }
            hex
        })
        .collect();

    if authors.is_empty() {
        return filter.clone();
    }
    filter.clone().authors(authors)
}

/// `d` tag value, or the event id when there is none.
pub fn identity_key(event: &Event) -> String {
    extract_tag_str(event, "d")
        .map(str::to_string)
        .unwrap_or_else(|| event.id.to_hex())
}

/// Collapse revisions of the same logical event and sort oldest first.
/// Newer `created_at` wins; on equal timestamps the lowest id wins.
pub fn dedupe_events(events: Vec<Event>) -> Vec<Event> {
    let mut latest: HashMap<String, Event> = HashMap::new();
    for event in events {
        let key = identity_key(&event);
        let replace = match latest.get(&key) {
            None => true,
            Some(current) => {
                event.created_at > current.created_at
                    || (event.created_at == current.created_at && event.id < current.id)
            }
        };
        if replace {
            latest.insert(key, event);
        }
    }

    let mut events: Vec<Event> = latest.into_values().collect();
    events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nostr::probe::tests::{Behavior, FakeConnector};
    use crate::nostr::transport::{Subscription, TransportError};
    use crate::policy::ProbePolicy;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap as Map;
    use std::time::Duration;

    fn calendar_event(keys: &Keys, d: &str, created_at: u64, title: &str) -> Event {
        EventBuilder::new(Kind::Custom(31923), "")
            .tag(Tag::identifier(d))
            .tag(Tag::parse(vec!["title", title]).unwrap())
            .custom_created_at(Timestamp::from(created_at))
            .sign_with_keys(keys)
            .unwrap()
    }

    /// Per-relay scripted events. Relays without a script never answer.
    #[derive(Default)]
    struct FakeTransport {
        name: &'static str,
        relays: Map<String, Vec<Event>>,
        calls: Mutex<Vec<(Vec<String>, EventFilter)>>,
    }

    impl FakeTransport {
        fn new(name: &'static str, relays: Vec<(&str, Vec<Event>)>) -> Self {
            Self {
                name,
                relays: relays
                    .into_iter()
                    .map(|(r, evs)| (r.to_string(), evs))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn subscribe(
            &self,
            relays: &[String],
            filter: &EventFilter,
        ) -> Result<Subscription, TransportError> {
            self.calls.lock().push((relays.to_vec(), filter.clone()));
            let (tx, sub) = Subscription::channel();
            let mut all_answered = true;
            for relay in relays {
                match self.relays.get(relay) {
                    Some(events) => {
                        for event in events {
                            tx.event(relay, event.clone());
                        }
                    }
                    None => all_answered = false,
                }
            }
            if all_answered {
                tx.complete();
            } else {
                // unanswered relays keep the subscription open
                tokio::spawn(async move {
                    tx.closed().await;
                });
            }
            Ok(sub)
        }
    }

    fn engine(
        connector: FakeConnector,
        pool: FakeTransport,
        raw: FakeTransport,
        relays: &[&str],
    ) -> (EventQueryEngine, Arc<FakeTransport>, Arc<FakeTransport>) {
        let pool = Arc::new(pool);
        let raw = Arc::new(raw);
        let probe = Arc::new(RelayProbe::new(Arc::new(connector), ProbePolicy::default()));
        let engine = EventQueryEngine::new(
            probe,
            pool.clone(),
            raw.clone(),
            relays.iter().map(|r| r.to_string()).collect(),
            QueryPolicy::default(),
        );
        (engine, pool, raw)
    }

    #[test]
    fn test_dedupe_keeps_newest_revision() {
        let keys = Keys::generate();
        let old = calendar_event(&keys, "standup", 100, "old");
        let new = calendar_event(&keys, "standup", 200, "new");
        let other = calendar_event(&keys, "retro", 150, "retro");

        let events = dedupe_events(vec![new.clone(), old, other.clone()]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, other.id);
        assert_eq!(events[1].id, new.id);
    }

    #[test]
    fn test_dedupe_tie_prefers_lowest_id() {
        let keys = Keys::generate();
        let a = calendar_event(&keys, "standup", 100, "a");
        let b = calendar_event(&keys, "standup", 100, "b");
        let lowest = if a.id < b.id { a.id } else { b.id };

        assert_eq!(dedupe_events(vec![a.clone(), b.clone()])[0].id, lowest);
        assert_eq!(dedupe_events(vec![b, a])[0].id, lowest);
    }

    #[test]
    fn test_events_without_d_tag_dedupe_by_id() {
        let keys = Keys::generate();
        let note = EventBuilder::text_note("hi").sign_with_keys(&keys).unwrap();
        let events = dedupe_events(vec![note.clone(), note.clone()]);
        assert_eq!(events.len(), 1);
        assert_eq!(identity_key(&note), note.id.to_hex());
    }

    #[test]
    fn test_authors_hint_is_normalized() {
        let keys = Keys::generate();
        let npub = identity::npub(&keys.public_key()).unwrap();
        let filter = apply_authors_hint(
            &EventFilter::kinds([31923]),
            &[npub, "garbage".to_string()],
        );
        assert_eq!(filter.authors, Some(vec![keys.public_key().to_hex()]));
    }

    #[test]
    fn test_authors_hint_ignored_when_filter_has_authors() {
        let filter = EventFilter::kinds([1]).authors(["aa".repeat(32)]);
        let hinted = apply_authors_hint(&filter, &["bb".repeat(32)]);
        assert_eq!(hinted.authors, Some(vec!["aa".repeat(32)]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_path_result_is_returned() {
        let keys = Keys::generate();
        let ev = calendar_event(&keys, "standup", 100, "standup");
        let (engine, pool, raw) = engine(
            FakeConnector::new(&[("wss://fast", Behavior::OpenAfter(10))]),
            FakeTransport::new("pool", vec![]),
            FakeTransport::new("raw", vec![("wss://fast", vec![ev.clone()])]),
            &["wss://fast", "wss://other"],
        );

        let events = engine
            .fetch_events(&EventFilter::kinds([31923]).limit(1_000), &[])
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, ev.id);
        assert!(pool.calls.lock().is_empty());

        let calls = raw.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, vec!["wss://fast".to_string()]);
        assert_eq!(calls[0].1.limit, Some(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_reachable_relays_returns_empty() {
        let (engine, _, _) = engine(
            FakeConnector::new(&[]),
            FakeTransport::new("pool", vec![]),
            FakeTransport::new("raw", vec![]),
            &["wss://a", "wss://b"],
        );

        let started = Instant::now();
        let events = engine.fetch_events(&EventFilter::kinds([31923]), &[]).await;
        assert!(events.is_empty());
        // probe cap + fast path + fallback, each bounded
        assert!(started.elapsed() <= Duration::from_millis(2_000 + 2_500 + 6_000 + 50));
    }

    #[tokio::test]
    async fn test_no_relays_returns_empty() {
        let (engine, pool, raw) = engine(
            FakeConnector::new(&[]),
            FakeTransport::new("pool", vec![]),
            FakeTransport::new("raw", vec![]),
            &[],
        );
        assert!(engine.fetch_events(&EventFilter::kinds([1]), &[]).await.is_empty());
        assert!(pool.calls.lock().is_empty());
        assert!(raw.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_returns_the_one_reachable_relay() {
        let keys = Keys::generate();
        let ev = calendar_event(&keys, "standup", 100, "standup");
        // the probe picks wss://a, which has nothing; wss://c is the only
        // relay with data and only the raw adapter reaches it
        let (engine, _, _) = engine(
            FakeConnector::new(&[("wss://a", Behavior::OpenAfter(5))]),
            FakeTransport::new("pool", vec![]),
            FakeTransport::new("raw", vec![("wss://a", vec![]), ("wss://c", vec![ev.clone()])]),
            &["wss://a", "wss://b", "wss://c"],
        );

        let events = engine.fetch_events(&EventFilter::kinds([31923]), &[]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, ev.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_prefers_pool_on_tie_and_dedupes() {
        let keys = Keys::generate();
        let old = calendar_event(&keys, "standup", 100, "old");
        let new = calendar_event(&keys, "standup", 200, "new");
        let (engine, _, _) = engine(
            FakeConnector::new(&[("wss://a", Behavior::OpenAfter(5))]),
            FakeTransport::new("pool", vec![("wss://a", vec![old.clone(), new.clone()])]),
            FakeTransport::new("raw", vec![("wss://a", vec![])]),
            &["wss://a"],
        );

        let events = engine.fetch_events(&EventFilter::kinds([31923]), &[]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, new.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tampered_events_are_dropped() {
        let keys = Keys::generate();
        let good = calendar_event(&keys, "a", 100, "good");
        let mut bad = calendar_event(&keys, "b", 100, "bad");
        bad.content = "tampered".to_string();

        let (engine, _, _) = engine(
            FakeConnector::new(&[("wss://a", Behavior::OpenAfter(5))]),
            FakeTransport::new("pool", vec![]),
            FakeTransport::new("raw", vec![("wss://a", vec![good.clone(), bad])]),
            &["wss://a"],
        );

        let events = engine.fetch_events(&EventFilter::kinds([31923]), &[]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, good.id);
    }
}
