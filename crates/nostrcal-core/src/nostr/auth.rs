use anyhow::Result;
use nostr_sdk::nips::nip49::EncryptedSecretKey;
use nostr_sdk::prelude::*;

use super::identity;
use crate::constants::keys::LOCAL_CREDENTIALS;
use crate::storage::KeyValueStore;

const NCRYPTSEC_PREFIX: &str = "ncryptsec";

/// Log in with an `nsec` or hex secret key and remember it in `store`:
/// NIP-49 encrypted when a password is given, as an `nsec` otherwise.
pub fn login_with_nsec(
    nsec: &str,
    password: Option<&str>,
    store: &dyn KeyValueStore,
) -> Result<Keys> {
    let secret_key = identity::parse_secret_key(nsec)?;
    let keys = Keys::new(secret_key);

    let stored = match password.filter(|p| !p.is_empty()) {
        Some(pwd) => keys.secret_key().encrypt(pwd)?.to_bech32()?,
        None => keys.secret_key().to_bech32()?,
    };
    store.set(LOCAL_CREDENTIALS, &stored)?;

    Ok(keys)
}

pub fn load_stored_keys(password: &str, store: &dyn KeyValueStore) -> Result<Keys> {
    let stored = store
        .get(LOCAL_CREDENTIALS)?
        .ok_or_else(|| anyhow::anyhow!("No stored credentials"))?;

    let secret_key = if stored.starts_with(NCRYPTSEC_PREFIX) {
        let encrypted = EncryptedSecretKey::from_bech32(&stored)?;
        encrypted.decrypt(password)?
    } else {
        identity::parse_secret_key(&stored)?
    };

    Ok(Keys::new(secret_key))
}

pub fn has_stored_credentials(store: &dyn KeyValueStore) -> bool {
    matches!(store.get(LOCAL_CREDENTIALS), Ok(Some(_)))
}

/// Check if stored credentials are encrypted (require a password to unlock)
pub fn credentials_need_password(store: &dyn KeyValueStore) -> bool {
    matches!(store.get(LOCAL_CREDENTIALS), Ok(Some(v)) if v.starts_with(NCRYPTSEC_PREFIX))
}

/// Load stored keys that don't require a password (unencrypted nsec)
pub fn load_unencrypted_keys(store: &dyn KeyValueStore) -> Result<Keys> {
    let nsec = store
        .get(LOCAL_CREDENTIALS)?
        .ok_or_else(|| anyhow::anyhow!("No stored credentials"))?;

    if nsec.starts_with(NCRYPTSEC_PREFIX) {
        anyhow::bail!("Credentials are encrypted, password required");
    }
    Ok(Keys::new(identity::parse_secret_key(&nsec)?))
}

pub fn clear_credentials(store: &dyn KeyValueStore) -> Result<()> {
    store.remove(LOCAL_CREDENTIALS)?;
    Ok(())
}

pub fn get_current_pubkey(keys: &Keys) -> String {
    keys.public_key().to_hex()
}
