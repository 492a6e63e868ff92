use std::borrow::Cow;

use nostr::nips::nip46::NostrConnectURI;
use nostr_sdk::prelude::PublicKey;
use percent_encoding::percent_decode_str;
use url::form_urlencoded;

use super::BunkerError;
use crate::nostr::identity;

const SCHEMES: [&str; 2] = ["bunker", "nostrconnect"];

/// Where to reach a remote signer, parsed from a `bunker://` (or legacy
/// `nostrconnect://`) URI of the form `bunker://<pubkey>?relay=..&secret=..`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPointer {
    /// Hex public key of the remote signer
    pub remote_signer_pubkey: String,
    pub relays: Vec<String>,
    pub secret: Option<String>,
}

impl ConnectionPointer {
    /// Parse `uri`, retrying once with the input normalized (whitespace,
    /// percent-encoding, broken scheme separators, bare public keys).
    ///
    /// Well-formed `bunker://` URIs go through `nostr`'s NIP-46 parser; the
    /// lenient parser covers npub hosts, legacy `nostrconnect://` pointers and
    /// relay lists with non-websocket entries.
    pub fn parse(uri: &str) -> Result<Self, BunkerError> {
        match parse_once(uri) {
            Ok(pointer) => Ok(pointer),
            Err(first) => match normalize(uri) {
                Some(repaired) if repaired != uri => {
                    tracing::debug!("retrying connection uri as {}", repaired);
                    parse_once(&repaired).map_err(|_| first)
                }
                _ => Err(first),
            },
        }
    }

    pub fn remote_public_key(&self) -> Result<PublicKey, BunkerError> {
        PublicKey::from_hex(&self.remote_signer_pubkey)
            .map_err(|e| BunkerError::InvalidPointer(e.to_string()))
    }

    /// Canonical `bunker://` form.
    pub fn to_uri(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for relay in &self.relays {
            query.append_pair("relay", relay);
        }
        if let Some(secret) = &self.secret {
            query.append_pair("secret", secret);
        }
        let query = query.finish();
        if query.is_empty() {
            format!("bunker://{}", self.remote_signer_pubkey)
        } else {
            format!("bunker://{}?{}", self.remote_signer_pubkey, query)
        }
    }
}

fn invalid(reason: impl Into<String>) -> BunkerError {
    BunkerError::InvalidPointer(reason.into())
}

fn parse_once(uri: &str) -> Result<ConnectionPointer, BunkerError> {
    match from_bunker_uri(uri) {
        Some(pointer) => Ok(pointer),
        None => parse_lenient(uri),
    }
}

/// `None` unless `uri` is a valid `bunker://` URI.
fn from_bunker_uri(uri: &str) -> Option<ConnectionPointer> {
    let NostrConnectURI::Bunker {
        remote_signer_public_key,
        relays,
        secret,
    } = NostrConnectURI::parse(uri).ok()?
    else {
        return None;
    };

    let mut unique: Vec<String> = Vec::with_capacity(relays.len());
    for relay in relays {
        let relay = relay.to_string();
        if !unique.contains(&relay) {
            unique.push(relay);
        }
    }
    Some(ConnectionPointer {
        remote_signer_pubkey: remote_signer_public_key.to_hex(),
        relays: unique,
        secret: secret.filter(|s| !s.is_empty()),
    })
}

fn parse_lenient(uri: &str) -> Result<ConnectionPointer, BunkerError> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| invalid(format!("missing scheme in {:?}", uri)))?;
    if !SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()) {
        return Err(invalid(format!("unsupported scheme {:?}", scheme)));
    }

    let (key, query) = rest.split_once('?').unwrap_or((rest, ""));
    let key = key.trim_end_matches('/');
    let remote_signer_pubkey = identity::to_hex(key)
        .ok_or_else(|| invalid(format!("{:?} is not a public key", key)))?;

    let mut relays = Vec::new();
    let mut secret = None;
    for (name, value) in form_urlencoded::parse(query.as_bytes()) {
        match name.as_ref() {
            "relay" => {
                let relay = value.trim();
                if relay.starts_with("wss://") || relay.starts_with("ws://") {
                    if !relays.iter().any(|r| r == relay) {
                        relays.push(relay.to_string());
                    }
                } else {
                    tracing::warn!("ignoring relay that is not a websocket url: {}", relay);
                }
            }
            "secret" if !value.is_empty() => secret = Some(value.into_owned()),
            _ => {}
        }
    }

    Ok(ConnectionPointer {
        remote_signer_pubkey,
        relays,
        secret,
    })
}

/// Best-effort repair of user-pasted connection strings.
fn normalize(uri: &str) -> Option<String> {
    let mut s: Cow<str> = Cow::Borrowed(uri.trim());

    if s.contains('%') && !s.contains('?') || s.contains("%3A") || s.contains("%3a") {
        let decoded = percent_decode_str(&s).decode_utf8().ok()?.into_owned();
        s = Cow::Owned(decoded);
    }

    for scheme in SCHEMES {
        let lowered = s.to_ascii_lowercase();
        for broken in [format!("{}:/", scheme), format!("{}:", scheme)] {
            if lowered.starts_with(&broken) && !lowered.starts_with(&format!("{}://", scheme)) {
                let rest = s[broken.len()..].trim_start_matches('/');
                return Some(format!("{}://{}", scheme, rest));
            }
        }
        if lowered.starts_with(&format!("{}://", scheme)) {
            return Some(s.into_owned());
        }
    }

    // bare public key, optionally followed by a query
    let (key, _) = s.split_once('?').unwrap_or((s.as_ref(), ""));
    identity::to_hex(key).map(|_| format!("bunker://{}", s))
}
