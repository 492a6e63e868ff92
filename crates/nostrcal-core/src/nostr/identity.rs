//! bech32 (NIP-19 `npub`/`nsec`) <-> hex key conversion.
//!
//! Everything here is pure: no I/O.

use bech32::primitives::decode::CheckedHrpstring;
use bech32::{Bech32, Hrp};
use nostr_sdk::prelude::{PublicKey, SecretKey};

const KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid bech32 string: {0}")]
    Bech32(String),

    #[error("unsupported bech32 prefix: {0}")]
    UnknownPrefix(String),

    #[error("{prefix} payload must be {expected} bytes, got {got}")]
    InvalidLength {
        prefix: String,
        expected: usize,
        got: usize,
    },

    #[error("invalid hex key: {0}")]
    InvalidHex(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Which NIP-19 entity a 32-byte payload encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPrefix {
    Npub,
    Nsec,
}

impl KeyPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPrefix::Npub => "npub",
            KeyPrefix::Nsec => "nsec",
        }
    }

    fn from_hrp(hrp: &str) -> Option<Self> {
        match hrp {
            "npub" => Some(KeyPrefix::Npub),
            "nsec" => Some(KeyPrefix::Nsec),
            _ => None,
        }
    }
}

/// A decoded NIP-19 key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub prefix: KeyPrefix,
    pub bytes: [u8; KEY_LEN],
}

impl Decoded {
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

pub fn encode(prefix: KeyPrefix, bytes: &[u8; KEY_LEN]) -> Result<String, DecodeError> {
    let hrp = Hrp::parse(prefix.as_str()).map_err(|e| DecodeError::Bech32(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, bytes).map_err(|e| DecodeError::Bech32(e.to_string()))
}

/// Decode an `npub1...` / `nsec1...` string.
///
/// Only the original bech32 checksum is accepted; bech32m strings fail like
/// any other checksum mismatch. Also fails on invalid charset, unknown prefix
/// and any payload that is not exactly 32 bytes. Never returns partial data.
pub fn decode(input: &str) -> Result<Decoded, DecodeError> {
    let checked = CheckedHrpstring::new::<Bech32>(input.trim())
        .map_err(|e| DecodeError::Bech32(e.to_string()))?;
    let hrp = checked.hrp().to_string().to_lowercase();
    let prefix = KeyPrefix::from_hrp(&hrp).ok_or(DecodeError::UnknownPrefix(hrp.clone()))?;

    let data: Vec<u8> = checked.byte_iter().collect();
    let bytes: [u8; KEY_LEN] =
        data.as_slice()
            .try_into()
            .map_err(|_| DecodeError::InvalidLength {
                prefix: hrp,
                expected: KEY_LEN,
                got: data.len(),
            })?;

    Ok(Decoded { prefix, bytes })
}

/// True for exactly 64 hex characters (the shape of a public key).
pub fn is_hex_pubkey(s: &str) -> bool {
    s.len() == 2 * KEY_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Normalize an `npub` or hex public key to lowercase hex.
///
/// Hex input passes through, so `to_hex(to_hex(x))` is `to_hex(x)`.
/// Returns `None` for anything else, including `nsec` strings.
pub fn to_hex(npub_or_hex: &str) -> Option<String> {
    let input = npub_or_hex.trim();
    if is_hex_pubkey(input) {
        return Some(input.to_lowercase());
    }
    match decode(input) {
        Ok(decoded) if decoded.prefix == KeyPrefix::Npub => Some(decoded.to_hex()),
        _ => None,
    }
}

pub fn parse_public_key(npub_or_hex: &str) -> Result<PublicKey, DecodeError> {
    let hex = match to_hex(npub_or_hex) {
        Some(hex) => hex,
        None => {
            // surface the precise bech32 failure when it was meant as one
            let decoded = decode(npub_or_hex)?;
            return Err(DecodeError::UnknownPrefix(decoded.prefix.as_str().to_string()));
        }
    };
    PublicKey::from_hex(&hex).map_err(|e| DecodeError::InvalidKey(e.to_string()))
}

/// Parse an `nsec` or 64-char hex secret key.
pub fn parse_secret_key(nsec_or_hex: &str) -> Result<SecretKey, DecodeError> {
    let input = nsec_or_hex.trim();
    let bytes = if is_hex_pubkey(input) {
        let raw = hex::decode(input).map_err(|e| DecodeError::InvalidHex(e.to_string()))?;
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&raw);
        bytes
    } else {
        let decoded = decode(input)?;
        if decoded.prefix != KeyPrefix::Nsec {
            return Err(DecodeError::UnknownPrefix(decoded.prefix.as_str().to_string()));
        }
        decoded.bytes
    };
    SecretKey::from_slice(&bytes).map_err(|e| DecodeError::InvalidKey(e.to_string()))
}

pub fn npub(public_key: &PublicKey) -> Result<String, DecodeError> {
    encode(KeyPrefix::Npub, &public_key.to_bytes())
}
