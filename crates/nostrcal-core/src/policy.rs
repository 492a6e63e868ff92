//! Timeout and retry policies for each network-bound call site.
//!
//! Durations are stored in milliseconds so they deserialize straight from
//! `config.json`; accessors hand out [`Duration`]s.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{kinds, FAST_PATH_LIMIT, MAX_PROBE_CANDIDATES};

/// Fastest-relay race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbePolicy {
    pub max_candidates: usize,
    pub cap_ms: u64,
    pub cache_ttl_ms: u64,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_candidates: MAX_PROBE_CANDIDATES,
            cap_ms: 2_000,
            cache_ttl_ms: 5 * 60 * 1000,
        }
    }
}

impl ProbePolicy {
    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// Two-tier event query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryPolicy {
    pub fast_path_timeout_ms: u64,
    pub fast_path_limit: usize,
    pub fallback_timeout_ms: u64,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            fast_path_timeout_ms: 2_500,
            fast_path_limit: FAST_PATH_LIMIT,
            fallback_timeout_ms: 6_000,
        }
    }
}

impl QueryPolicy {
    pub fn fast_path_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_path_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    /// `limit` for the single-relay request: the caller's limit, capped.
    pub fn fast_path_limit_for(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.fast_path_limit)
            .min(self.fast_path_limit)
    }
}

/// NIP-46 connect and public-key polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectPolicy {
    pub preflight_cap_ms: u64,
    pub attempt_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub window_ms: u64,
    /// Recreate the transport every Nth failed attempt once authorization was
    /// triggered. 0 disables stall recovery.
    pub stall_every: u32,
    pub relay_connect_timeout_ms: u64,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            preflight_cap_ms: 1_500,
            attempt_timeout_ms: 1_200,
            poll_interval_ms: 500,
            window_ms: 45_000,
            stall_every: 6,
            relay_connect_timeout_ms: 5_000,
        }
    }
}

impl ConnectPolicy {
    pub fn preflight_cap(&self) -> Duration {
        Duration::from_millis(self.preflight_cap_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn relay_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_connect_timeout_ms)
    }

    pub fn should_recreate(&self, attempt: u32, auth_triggered: bool) -> bool {
        auth_triggered && self.stall_every > 0 && attempt > 0 && attempt % self.stall_every == 0
    }
}

/// Sign-request timeouts: per-kind tier, floor, and the escalation tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignPolicy {
    pub standard_timeout_ms: u64,
    pub interactive_timeout_ms: u64,
    pub floor_ms: u64,
    pub escalation_timeout_ms: u64,
    pub interactive_kinds: Vec<u16>,
}

impl Default for SignPolicy {
    fn default() -> Self {
        Self {
            standard_timeout_ms: 15_000,
            interactive_timeout_ms: 45_000,
            floor_ms: 8_000,
            escalation_timeout_ms: 45_000,
            interactive_kinds: vec![kinds::NOSTR_CONNECT, kinds::HTTP_AUTH],
        }
    }
}

impl SignPolicy {
    /// Timeout for one attempt at signing `kind`. An explicit request wins
    /// over the per-kind tier but is never allowed below the floor.
    pub fn attempt_timeout(&self, kind: u16, requested: Option<Duration>) -> Duration {
        let tier = if self.interactive_kinds.contains(&kind) {
            self.interactive_timeout_ms
        } else {
            self.standard_timeout_ms
        };
        let chosen = requested.unwrap_or(Duration::from_millis(tier));
        chosen.max(Duration::from_millis(self.floor_ms))
    }

    /// Timeout for the post-reconnect retry: at least the escalation tier and
    /// at least double the original attempt.
    pub fn escalation_timeout(&self, original: Duration) -> Duration {
        Duration::from_millis(self.escalation_timeout_ms).max(original * 2)
    }
}
