//! The signing capability handed to auth plugins and the UI layer. A caller
//! holding a [`Signer`] never sees key material or the signer transport.

use async_trait::async_trait;
use nostr_sdk::prelude::*;
use parking_lot::RwLock;

use crate::nostr::bunker::{BunkerError, EventTemplate, RemoteSignerSession};

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("not logged in")]
    NotLoggedIn,

    #[error("failed to sign event: {0}")]
    Local(String),

    #[error(transparent)]
    Remote(#[from] BunkerError),
}

#[async_trait]
pub trait Signer: Send + Sync {
    fn is_logged_in(&self) -> bool;

    /// Hex public key of the signing identity
    async fn get_public_key(&self) -> Result<String, SignerError>;

    async fn sign_event(&self, template: &EventTemplate) -> Result<Event, SignerError>;

    async fn close(&self);
}

/// Signs with a secret key held in memory.
#[derive(Default)]
pub struct LocalSigner {
    keys: RwLock<Option<Keys>>,
}

impl LocalSigner {
    pub fn new(keys: Keys) -> Self {
        Self {
            keys: RwLock::new(Some(keys)),
        }
    }

    pub fn set_keys(&self, keys: Keys) {
        *self.keys.write() = Some(keys);
    }

    fn keys(&self) -> Result<Keys, SignerError> {
        self.keys.read().clone().ok_or(SignerError::NotLoggedIn)
    }
}

/// Build and sign `template` with `keys`.
pub fn sign_template(keys: &Keys, template: &EventTemplate) -> Result<Event, SignerError> {
    if let Some(pubkey) = &template.pubkey {
        if *pubkey != keys.public_key().to_hex() {
            return Err(SignerError::Local(format!(
                "template pubkey {} does not match the signing key",
                pubkey
            )));
        }
    }

    let tags = template
        .tags
        .iter()
        .map(|t| Tag::parse(t.iter().map(String::as_str)))
        .collect::<Result<Vec<Tag>, _>>()
        .map_err(|e| SignerError::Local(e.to_string()))?;

    EventBuilder::new(Kind::from(template.kind), &template.content)
        .tags(tags)
        .custom_created_at(Timestamp::from(template.created_at))
        .sign_with_keys(keys)
        .map_err(|e| SignerError::Local(e.to_string()))
}

#[async_trait]
impl Signer for LocalSigner {
    fn is_logged_in(&self) -> bool {
        self.keys.read().is_some()
    }

    async fn get_public_key(&self) -> Result<String, SignerError> {
        Ok(self.keys()?.public_key().to_hex())
    }

    async fn sign_event(&self, template: &EventTemplate) -> Result<Event, SignerError> {
        sign_template(&self.keys()?, template)
    }

    async fn close(&self) {
        *self.keys.write() = None;
    }
}

#[async_trait]
impl Signer for RemoteSignerSession {
    fn is_logged_in(&self) -> bool {
        self.is_ready()
    }

    async fn get_public_key(&self) -> Result<String, SignerError> {
        Ok(RemoteSignerSession::get_public_key(self).await?)
    }

    async fn sign_event(&self, template: &EventTemplate) -> Result<Event, SignerError> {
        Ok(RemoteSignerSession::sign_event(self, template, None).await?)
    }

    async fn close(&self) {
        RemoteSignerSession::close(self).await;
    }
}
