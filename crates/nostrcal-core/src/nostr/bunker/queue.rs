//! One-at-a-time signing with tiered timeouts and a reconnect escalation.

use std::time::Duration;

use nostr_sdk::prelude::{Event, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::transport::SignerTransport;
use super::BunkerError;
use crate::policy::SignPolicy;

/// An unsigned event as sent to a signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub kind: u16,
    pub created_at: u64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
}

impl EventTemplate {
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            kind,
            created_at: Timestamp::now().as_u64(),
            tags: Vec::new(),
            content: content.into(),
            pubkey: None,
        }
    }

    pub fn tag<I, S>(mut self, tag: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(tag.into_iter().map(Into::into).collect());
        self
    }

    /// Build a template from loosely shaped JSON.
    ///
    /// `kind` is required. Tags that are not arrays are dropped and tag
    /// values are stringified; `created_at` defaults to now; `content` is
    /// coerced to a string. `id` and `sig` are ignored.
    pub fn from_value(value: &Value) -> Result<Self, BunkerError> {
        let obj = value
            .as_object()
            .ok_or_else(|| BunkerError::InvalidTemplate("expected a JSON object".to_string()))?;

        let kind = obj
            .get("kind")
            .and_then(Value::as_u64)
            .and_then(|k| u16::try_from(k).ok())
            .ok_or_else(|| BunkerError::InvalidTemplate("missing or invalid kind".to_string()))?;

        let tags = match obj.get("tags") {
            Some(Value::Array(tags)) => tags
                .iter()
                .filter_map(Value::as_array)
                .map(|tag| tag.iter().map(stringify).collect())
                .collect(),
            _ => Vec::new(),
        };

        let created_at = obj
            .get("created_at")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| Timestamp::now().as_u64());

        let content = match obj.get("content") {
            None | Some(Value::Null) => String::new(),
            Some(v) => stringify(v),
        };

        let pubkey = obj
            .get("pubkey")
            .and_then(Value::as_str)
            .filter(|pk| !pk.is_empty())
            .map(str::to_string);

        Ok(Self {
            kind,
            created_at,
            tags,
            content,
            pubkey,
        })
    }

    pub fn with_pubkey(&self, pubkey: &str) -> Self {
        Self {
            pubkey: Some(pubkey.to_string()),
            ..self.clone()
        }
    }

    pub fn without_pubkey(&self) -> Self {
        Self {
            pubkey: None,
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> Result<String, BunkerError> {
        serde_json::to_string(self).map_err(|e| BunkerError::InvalidTemplate(e.to_string()))
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// FIFO gate in front of the signer. Holding the (fair) lock for the whole
/// attempt sequence keeps exactly one request in flight.
pub struct SignQueue {
    turn: Mutex<()>,
    policy: SignPolicy,
}

impl SignQueue {
    pub fn new(policy: SignPolicy) -> Self {
        Self {
            turn: Mutex::new(()),
            policy,
        }
    }

    pub fn policy(&self) -> &SignPolicy {
        &self.policy
    }

    /// Sign `template` through `transport`, waiting behind earlier requests.
    ///
    /// Tries with `user_pubkey` set and then without; if both fail the
    /// transport is probed, reconnected, and both variants are retried once
    /// with the escalation timeout.
    pub async fn sign(
        &self,
        transport: &dyn SignerTransport,
        user_pubkey: Option<&str>,
        template: &EventTemplate,
        requested_timeout: Option<Duration>,
        last_auth_url: impl Fn() -> Option<String>,
    ) -> Result<Event, BunkerError> {
        let _turn = self.turn.lock().await;

        let variants = variants(template, user_pubkey);
        let first_timeout = self.policy.attempt_timeout(template.kind, requested_timeout);
        let mut attempts = 0u32;

        if let Some(event) = try_variants(transport, &variants, first_timeout, &mut attempts).await {
            return Ok(event);
        }

        warn!(
            kind = template.kind,
            "signing failed after {} attempts, escalating", attempts
        );
        let probe_timeout = Duration::from_millis(self.policy.floor_ms);
        match timeout(probe_timeout, transport.get_public_key()).await {
            Ok(Ok(_)) => debug!("signer still answers get_public_key"),
            Ok(Err(e)) => debug!("liveness probe failed: {}", e),
            Err(_) => debug!("liveness probe timed out"),
        }
        if let Err(e) = transport.reconnect().await {
            warn!("signer reconnect failed: {}", e);
        }

        let long_timeout = self.policy.escalation_timeout(first_timeout);
        if let Some(event) = try_variants(transport, &variants, long_timeout, &mut attempts).await {
            info!(kind = template.kind, "signed after escalation");
            return Ok(event);
        }

        Err(BunkerError::SignTimeout {
            last_auth_url: last_auth_url(),
            attempts,
        })
    }
}

fn variants(template: &EventTemplate, user_pubkey: Option<&str>) -> Vec<EventTemplate> {
    match user_pubkey.or(template.pubkey.as_deref()) {
        Some(pubkey) => vec![template.with_pubkey(pubkey), template.without_pubkey()],
        None => vec![template.without_pubkey()],
    }
}

async fn try_variants(
    transport: &dyn SignerTransport,
    variants: &[EventTemplate],
    per_attempt: Duration,
    attempts: &mut u32,
) -> Option<Event> {
    for variant in variants {
        *attempts += 1;
        match timeout(per_attempt, transport.sign_event(variant)).await {
            Ok(Ok(event)) => return Some(event),
            Ok(Err(e)) => debug!(
                with_pubkey = variant.pubkey.is_some(),
                "sign attempt {} failed: {}", attempts, e
            ),
            Err(_) => debug!(
                with_pubkey = variant.pubkey.is_some(),
                "sign attempt {} timed out after {:?}", attempts, per_attempt
            ),
        }
    }
    None
}
