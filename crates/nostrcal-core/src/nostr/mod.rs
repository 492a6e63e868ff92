pub mod auth;
pub mod bunker;
pub mod filter;
pub mod identity;
pub mod pool;
pub mod probe;
pub mod publish;
pub mod query;
#[cfg(test)]
pub(crate) mod test_relay;
pub mod transport;
pub mod ws;

pub use auth::{
    clear_credentials, credentials_need_password, get_current_pubkey, has_stored_credentials,
    load_stored_keys, load_unencrypted_keys, login_with_nsec,
};
pub use filter::EventFilter;
pub use identity::DecodeError;
pub use pool::PoolTransport;
pub use probe::{race_open, RelayConnector, RelayProbe};
pub use publish::{PublishError, PublishReport, Publisher, RelayOutcome};
pub use query::{dedupe_events, identity_key, EventQueryEngine};
pub use transport::{Subscription, SubscriptionItem, Transport, TransportError};
pub use ws::{WsConnector, WsTransport};
