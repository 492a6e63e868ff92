use std::collections::BTreeMap;

use nostr_sdk::prelude::*;
use serde_json::{Map, Value};
use tracing::warn;

use super::identity;

/// What to ask relays for. Immutable per query; builder methods return a new
/// value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub kinds: Vec<u16>,
    /// Hex public keys
    pub authors: Option<Vec<String>>,
    pub since: Option<u64>,
    pub limit: Option<usize>,
    /// Tag letter (without `#`) -> accepted values
    pub tag_filters: BTreeMap<String, Vec<String>>,
}

impl EventFilter {
    pub fn kinds<I: IntoIterator<Item = u16>>(kinds: I) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn tag<I, S>(mut self, letter: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_filters.insert(
            letter.trim_start_matches('#').to_string(),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_limit(&self, limit: usize) -> Self {
        let mut filter = self.clone();
        filter.limit = Some(limit);
        filter
    }

    /// NIP-01 filter object for a raw `["REQ", sub, filter]` frame.
    pub fn to_json(&self) -> Value {
        let mut filter = Map::new();
        if !self.kinds.is_empty() {
            filter.insert(
                "kinds".into(),
                Value::Array(self.kinds.iter().map(|k| Value::from(*k)).collect()),
            );
        }
        if let Some(authors) = &self.authors {
            filter.insert(
                "authors".into(),
                Value::Array(authors.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(since) = self.since {
            filter.insert("since".into(), Value::from(since));
        }
        if let Some(limit) = self.limit {
            filter.insert("limit".into(), Value::from(limit));
        }
        for (letter, values) in &self.tag_filters {
            filter.insert(
                format!("#{}", letter),
                Value::Array(values.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(filter)
    }

    /// Filter for the `nostr-sdk` relay pool. Authors that are not valid keys
    /// and tag names that are not a single letter are dropped.
    pub fn to_sdk_filter(&self) -> Filter {
        let mut filter = Filter::new().kinds(self.kinds.iter().map(|k| Kind::from(*k)));

        if let Some(authors) = &self.authors {
            let keys: Vec<PublicKey> = authors
                .iter()
                .filter_map(|a| identity::parse_public_key(a).ok())
                .collect();
            filter = filter.authors(keys);
        }
        if let Some(since) = self.since {
            filter = filter.since(Timestamp::from(since));
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        for (letter, values) in &self.tag_filters {
            let tag = letter
                .chars()
                .next()
                .filter(|_| letter.chars().count() == 1)
                .and_then(|c| SingleLetterTag::from_char(c).ok());
            match tag {
                Some(tag) => {
                    for value in values {
                        filter = filter.custom_tag(tag, value.clone());
                    }
                }
                None => warn!("dropping non single-letter tag filter #{}", letter),
            }
        }
        filter
    }
}
