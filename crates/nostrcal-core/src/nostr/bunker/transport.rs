use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nostr::nips::nip46::{NostrConnectMethod, NostrConnectRequest};
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pointer::ConnectionPointer;
use super::queue::EventTemplate;
use super::rpc::{self, RpcRequest, RpcResponse};
use super::BunkerError;

/// Everything needed to open a session with a remote signer.
#[derive(Debug, Clone)]
pub struct TransportParams {
    pub pointer: ConnectionPointer,
    /// Relay chosen by the preflight race
    pub relay: String,
    pub client_keys: Keys,
    /// Authorization URLs reported by the signer go here
    pub auth_tx: mpsc::UnboundedSender<String>,
}

/// One live NIP-46 session. Calls wait as long as the signer takes; callers
/// bound them with their own timeouts.
#[async_trait]
pub trait SignerTransport: Send + Sync {
    /// Send the NIP-46 `connect` request; returns the signer's result string.
    async fn connect(&self) -> Result<String, BunkerError>;

    async fn get_public_key(&self) -> Result<String, BunkerError>;

    async fn sign_event(&self, template: &EventTemplate) -> Result<Event, BunkerError>;

    /// Re-establish the relay connection in place.
    async fn reconnect(&self) -> Result<(), BunkerError>;

    async fn close(&self);
}

#[async_trait]
pub trait SignerTransportFactory: Send + Sync {
    async fn create(&self, params: TransportParams)
        -> Result<Arc<dyn SignerTransport>, BunkerError>;
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<String, String>>>>>;

/// Removes a request's pending entry however the request ends.
struct PendingGuard {
    pending: Pending,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// NIP-46 over a `nostr-sdk` client connected to a single relay.
pub struct RelaySignerTransport {
    client: Client,
    keys: Keys,
    remote: PublicKey,
    pointer: ConnectionPointer,
    relay: String,
    connect_timeout: Duration,
    pending: Pending,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RelaySignerTransport {
    pub async fn start(params: TransportParams, connect_timeout: Duration) -> Result<Self, BunkerError> {
        let remote = params.pointer.remote_public_key()?;
        let client = Client::new(params.client_keys.clone());
        client
            .add_relay(params.relay.as_str())
            .await
            .map_err(|e| BunkerError::Transport(format!("{}: {}", params.relay, e)))?;

        let transport = Self {
            client,
            keys: params.client_keys,
            remote,
            pointer: params.pointer,
            relay: params.relay,
            connect_timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
            pump: Mutex::new(None),
        };

        // subscribe to notifications before any request can be answered
        let notifications = transport.client.notifications();
        *transport.pump.lock() = Some(tokio::spawn(pump_responses(
            notifications,
            transport.keys.clone(),
            transport.remote,
            transport.pending.clone(),
            params.auth_tx,
        )));

        transport.open_relay().await?;
        info!(relay = %transport.relay, "signer transport ready");
        Ok(transport)
    }

    async fn open_relay(&self) -> Result<(), BunkerError> {
        self.client.connect().await;
        self.client.wait_for_connection(self.connect_timeout).await;

        let since = Timestamp::from(Timestamp::now().as_u64().saturating_sub(10));
        let filter = Filter::new()
            .kind(Kind::NostrConnect)
            .author(self.remote)
            .pubkey(self.keys.public_key())
            .since(since);
        self.client
            .subscribe(filter, None)
            .await
            .map_err(|e| BunkerError::Transport(format!("subscribe failed: {}", e)))?;
        Ok(())
    }

    async fn request(&self, request: RpcRequest) -> Result<String, BunkerError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request.id.clone(), tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id: request.id.clone(),
        };

        let event = rpc::request_event(&self.keys, &self.remote, &request)?;
        self.client
            .send_event(&event)
            .await
            .map_err(|e| BunkerError::Transport(format!("send failed: {}", e)))?;
        debug!(method = %request.method, id = %request.id, "nip46 request sent");

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(BunkerError::Rpc(error)),
            Err(_) => Err(BunkerError::Closed),
        }
    }
}

/// Route decrypted responses to their waiting requests until the client
/// shuts down. Only events signed by `remote` that answer a request still in
/// flight are acted on, authorization URLs included.
async fn pump_responses(
    mut notifications: broadcast::Receiver<RelayPoolNotification>,
    keys: Keys,
    remote: PublicKey,
    pending: Pending,
    auth_tx: mpsc::UnboundedSender<String>,
) {
    loop {
        let event = match notifications.recv().await {
            Ok(RelayPoolNotification::Event { event, .. }) => event,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("signer transport lagged {} notifications", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if event.kind != Kind::NostrConnect {
            continue;
        }
        if event.pubkey != remote {
            debug!(author = %event.pubkey, "ignoring nip46 event from another key");
            continue;
        }

        let response = match rpc::response_from_event(&keys, &event) {
            Ok(response) => response,
            Err(e) => {
                debug!("ignoring nip46 event {}: {}", event.id, e);
                continue;
            }
        };
        if !pending.lock().contains_key(response.id()) {
            debug!(id = %response.id(), "ignoring response to no pending request");
            continue;
        }

        match response {
            RpcResponse::AuthUrl { id, url } => {
                info!(id = %id, "signer requested authorization");
                let _ = auth_tx.send(url);
            }
            RpcResponse::Result { id, result } => {
                if let Some(tx) = pending.lock().remove(&id) {
                    let _ = tx.send(Ok(result));
                }
            }
            RpcResponse::Error { id, error } => {
                if let Some(tx) = pending.lock().remove(&id) {
                    let _ = tx.send(Err(error));
                }
            }
        }
    }
    debug!("signer response pump stopped");
}

/// Reject a signed event that does not carry exactly what was asked for.
fn check_matches_template(event: &Event, template: &EventTemplate) -> Result<(), BunkerError> {
    let mismatch = |field: &str| {
        Err(BunkerError::Rpc(format!(
            "signer returned an event whose {} differs from the request",
            field
        )))
    };

    if event.kind.as_u16() != template.kind {
        return mismatch("kind");
    }
    if event.content != template.content {
        return mismatch("content");
    }
    if event.created_at.as_u64() != template.created_at {
        return mismatch("created_at");
    }
    let same_tags = event.tags.len() == template.tags.len()
        && event
            .tags
            .iter()
            .zip(&template.tags)
            .all(|(tag, expected)| tag.as_slice() == expected.as_slice());
    if !same_tags {
        return mismatch("tags");
    }
    if let Some(pubkey) = &template.pubkey {
        if !event.pubkey.to_hex().eq_ignore_ascii_case(pubkey) {
            return mismatch("pubkey");
        }
    }
    Ok(())
}

#[async_trait]
impl SignerTransport for RelaySignerTransport {
    async fn connect(&self) -> Result<String, BunkerError> {
        let request = RpcRequest::from_request(&NostrConnectRequest::Connect {
            remote_signer_public_key: self.remote,
            secret: self.pointer.secret.clone(),
        });
        // signers answer "ack" or echo the secret
        self.request(request).await
    }

    async fn get_public_key(&self) -> Result<String, BunkerError> {
        let result = self
            .request(RpcRequest::from_request(&NostrConnectRequest::GetPublicKey))
            .await?;
        let pubkey = rpc::typed_result(NostrConnectMethod::GetPublicKey, result)?
            .to_get_public_key()
            .map_err(|e| BunkerError::Rpc(e.to_string()))?;
        Ok(pubkey.to_hex())
    }

    async fn sign_event(&self, template: &EventTemplate) -> Result<Event, BunkerError> {
        // templates may omit the pubkey, which `UnsignedEvent` cannot
        let request = RpcRequest::new(NostrConnectMethod::SignEvent, vec![template.to_json()?]);
        let result = self.request(request).await?;
        let event = rpc::typed_result(NostrConnectMethod::SignEvent, result)?
            .to_sign_event()
            .map_err(|e| BunkerError::Rpc(format!("signer returned an invalid event: {}", e)))?;
        event
            .verify()
            .map_err(|e| BunkerError::Rpc(format!("signer returned a bad signature: {}", e)))?;
        check_matches_template(&event, template)?;
        Ok(event)
    }

    async fn reconnect(&self) -> Result<(), BunkerError> {
        info!(relay = %self.relay, "reconnecting signer transport");
        self.client.disconnect().await;
        self.open_relay().await
    }

    async fn close(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.pending.lock().clear();
        self.client.disconnect().await;
    }
}

/// Builds [`RelaySignerTransport`]s.
#[derive(Debug, Clone)]
pub struct RelaySignerTransportFactory {
    connect_timeout: Duration,
}

impl RelaySignerTransportFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl SignerTransportFactory for RelaySignerTransportFactory {
    async fn create(
        &self,
        params: TransportParams,
    ) -> Result<Arc<dyn SignerTransport>, BunkerError> {
        let transport = RelaySignerTransport::start(params, self.connect_timeout).await?;
        Ok(Arc::new(transport))
    }
}
