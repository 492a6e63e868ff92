//! NIP-46 remote signing: connection pointers, the wire layer, the session
//! state machine and the sign-request queue.

mod auth_url;
mod pointer;
mod queue;
pub mod rpc;
mod session;
mod transport;

use std::time::Duration;

pub use auth_url::{AuthUrlDisposition, AuthUrlOpener, SurfaceOnly};
pub use pointer::ConnectionPointer;
pub use queue::{EventTemplate, SignQueue};
pub use session::{RemoteSignerSession, SessionState};
pub use transport::{
    RelaySignerTransport, RelaySignerTransportFactory, SignerTransport, SignerTransportFactory,
    TransportParams,
};

use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum BunkerError {
    #[error("a connect attempt is already in progress")]
    ConnectInProgress,

    #[error("invalid connection uri: {0}")]
    InvalidPointer(String),

    #[error("{}", describe_auth_timeout(.auth_triggered, .elapsed))]
    AuthorizationTimeout {
        auth_triggered: bool,
        elapsed: Duration,
    },

    #[error("remote signer did not sign after {attempts} attempts{}", describe_auth_url(.last_auth_url))]
    SignTimeout {
        last_auth_url: Option<String>,
        attempts: u32,
    },

    #[error("remote signer is not connected")]
    NotConnected,

    #[error("remote signer error: {0}")]
    Rpc(String),

    #[error("signer transport error: {0}")]
    Transport(String),

    #[error("invalid event template: {0}")]
    InvalidTemplate(String),

    #[error("remote signer session closed")]
    Closed,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn describe_auth_timeout(auth_triggered: &bool, elapsed: &Duration) -> String {
    if *auth_triggered {
        format!(
            "authorization triggered but not completed after {}s; approve the request in your signer and try again",
            elapsed.as_secs()
        )
    } else {
        format!(
            "no auth_url received from the remote signer after {}s; check the connection string and relay",
            elapsed.as_secs()
        )
    }
}

fn describe_auth_url(last_auth_url: &Option<String>) -> String {
    match last_auth_url {
        Some(url) => format!(" (last authorization url: {})", url),
        None => String::new(),
    }
}
