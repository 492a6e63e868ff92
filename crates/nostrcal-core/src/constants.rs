//! Application-wide constants
//!
//! Centralized location for relay defaults, persisted key names and the
//! event kinds the calendar core cares about.

/// Relays queried when the configuration does not name any.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://relay.primal.net",
];

/// Relay used for NIP-46 traffic when a connection URI advertises none that open.
pub const DEFAULT_BUNKER_RELAY: &str = "wss://relay.nsec.app";

/// Largest `limit` sent on the single-relay fast path.
pub const FAST_PATH_LIMIT: usize = 250;

/// Relays probed at most per fastest-relay race.
pub const MAX_PROBE_CANDIDATES: usize = 4;

/// Persisted state keys
pub mod keys {
    /// Hex client session secret used for NIP-46 traffic
    pub const CLIENT_SECRET: &str = "nostrcal.nip46.client_secret";
    /// Last remote signer public key we reached `Ready` with
    pub const REMOTE_PUBKEY: &str = "nostrcal.nip46.remote_pubkey";
    /// Last connection URI, replayed on auto-reconnect
    pub const LAST_URI: &str = "nostrcal.nip46.last_uri";
    /// Last authorization URL the remote signer asked us to open
    pub const LAST_AUTH_URL: &str = "nostrcal.nip46.last_auth_url";
    /// "true" once a connection succeeded; enables auto-reconnect
    pub const WAS_CONNECTED: &str = "nostrcal.nip46.was_connected";
    /// nsec or ncryptsec for the local key login
    pub const LOCAL_CREDENTIALS: &str = "nostrcal.local.credentials";
}

// Nostr event kinds used by the calendar core
pub mod kinds {
    /// Text note
    pub const TEXT_NOTE: u16 = 1;
    /// NIP-46 remote signing request/response
    pub const NOSTR_CONNECT: u16 = 24133;
    /// NIP-98 HTTP auth
    pub const HTTP_AUTH: u16 = 27235;
    /// NIP-52 date-based calendar event
    pub const DATE_CALENDAR_EVENT: u16 = 31922;
    /// NIP-52 time-based calendar event
    pub const TIME_CALENDAR_EVENT: u16 = 31923;
}
