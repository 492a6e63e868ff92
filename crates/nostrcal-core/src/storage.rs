//! Persisted key-value state.
//!
//! Connection markers live in a [`JsonFileStore`] under the data directory;
//! secrets can go to the OS keyring instead (see
//! [`crate::secure_storage::KeyringStore`]). Tests use [`MemoryStore`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::constants::keys;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Namespaced string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten on every mutation. A mutation that cannot
/// be written leaves the in-memory view unchanged.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self::at(data_dir.as_ref().join("session.json"))
    }

    pub fn at(path: PathBuf) -> Self {
        let entries = Self::load_from_file(&path).unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn load_from_file(path: &Path) -> Option<BTreeMap<String, String>> {
        let contents = fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    fn save_to_file(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.save_to_file(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.save_to_file(&next)?;
        *entries = next;
        Ok(())
    }
}

/// Typed view over the persisted NIP-46 session state.
///
/// `markers` holds the reconnect bookkeeping, `secrets` holds the client
/// session key. They may be the same store.
#[derive(Clone)]
pub struct SessionStore {
    markers: Arc<dyn KeyValueStore>,
    secrets: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(markers: Arc<dyn KeyValueStore>, secrets: Arc<dyn KeyValueStore>) -> Self {
        Self { markers, secrets }
    }

    pub fn in_memory() -> Self {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store)
    }

    pub fn markers(&self) -> &Arc<dyn KeyValueStore> {
        &self.markers
    }

    pub fn secrets(&self) -> &Arc<dyn KeyValueStore> {
        &self.secrets
    }

    pub fn client_secret(&self) -> Result<Option<String>, StorageError> {
        self.secrets.get(keys::CLIENT_SECRET)
    }

    pub fn set_client_secret(&self, hex: &str) -> Result<(), StorageError> {
        self.secrets.set(keys::CLIENT_SECRET, hex)
    }

    pub fn last_uri(&self) -> Result<Option<String>, StorageError> {
        self.markers.get(keys::LAST_URI)
    }

    pub fn remote_pubkey(&self) -> Result<Option<String>, StorageError> {
        self.markers.get(keys::REMOTE_PUBKEY)
    }

    pub fn last_auth_url(&self) -> Result<Option<String>, StorageError> {
        self.markers.get(keys::LAST_AUTH_URL)
    }

    pub fn set_last_auth_url(&self, url: &str) -> Result<(), StorageError> {
        self.markers.set(keys::LAST_AUTH_URL, url)
    }

    pub fn was_connected(&self) -> bool {
        matches!(self.markers.get(keys::WAS_CONNECTED), Ok(Some(v)) if v == "true")
    }

    /// Record a successful connection for auto-reconnect.
    pub fn mark_connected(&self, uri: &str, remote_pubkey: &str) -> Result<(), StorageError> {
        self.markers.set(keys::LAST_URI, uri)?;
        self.markers.set(keys::REMOTE_PUBKEY, remote_pubkey)?;
        self.markers.set(keys::WAS_CONNECTED, "true")
    }

    /// Forget every connection marker. The client secret is kept so a later
    /// connection reuses the same session identity.
    pub fn clear_connection(&self) -> Result<(), StorageError> {
        self.markers.remove(keys::WAS_CONNECTED)?;
        self.markers.remove(keys::LAST_URI)?;
        self.markers.remove(keys::REMOTE_PUBKEY)?;
        self.markers.remove(keys::LAST_AUTH_URL)
    }
}
