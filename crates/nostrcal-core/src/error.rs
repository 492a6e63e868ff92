use crate::nostr::bunker::BunkerError;
use crate::nostr::identity::DecodeError;
use crate::nostr::publish::PublishError;
use crate::nostr::transport::TransportError;
use crate::signer::SignerError;
use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, Error>;

/// Any error the core surfaces to a front end.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Bunker(#[from] BunkerError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn auth_timeout() -> Result<()> {
        Err(BunkerError::AuthorizationTimeout {
            auth_triggered: false,
            elapsed: Duration::from_secs(45),
        })?;
        Ok(())
    }

    #[test]
    fn test_conversions_keep_messages() {
        let err = auth_timeout().unwrap_err();
        assert!(matches!(err, Error::Bunker(_)));
        assert!(err.to_string().contains("no auth_url received"));

        let err: Error = TransportError::NoRelays.into();
        assert_eq!(err.to_string(), "no relays to query");
    }
}
