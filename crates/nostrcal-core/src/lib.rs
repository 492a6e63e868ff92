//! Relay communication and NIP-46 remote signing for a Nostr calendar.

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod events;
pub mod models;
pub mod nostr;
pub mod policy;
pub mod secure_storage;
pub mod signer;
pub mod storage;
pub mod tracing_setup;

pub use config::CoreConfig;
pub use context::ClientContext;
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
pub use signer::{LocalSigner, Signer, SignerError};
