//! NIP-46 JSON-RPC envelopes carried in encrypted kind 24133 events.
//!
//! Message shapes, method names and typed results come from `nostr`'s
//! `nip46` module; this layer adds the encryption and our request ids.

use nostr::nips::nip46::{
    NostrConnectMessage, NostrConnectMethod, NostrConnectRequest, ResponseResult,
};
use nostr_sdk::prelude::*;

use super::BunkerError;

/// `result` value a signer uses to ask for out-of-band approval; the URL
/// travels in `error`.
const AUTH_URL_RESULT: &str = "auth_url";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    pub id: String,
    pub method: NostrConnectMethod,
    pub params: Vec<String>,
}

impl RpcRequest {
    pub fn new(method: NostrConnectMethod, params: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            method,
            params,
        }
    }

    pub fn from_request(request: &NostrConnectRequest) -> Self {
        Self::new(request.method(), request.params())
    }

    pub fn to_message(&self) -> NostrConnectMessage {
        NostrConnectMessage::Request {
            id: self.id.clone(),
            method: self.method,
            params: self.params.clone(),
        }
    }
}

/// A decrypted message from the remote signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcResponse {
    Result { id: String, result: String },
    Error { id: String, error: String },
    AuthUrl { id: String, url: String },
}

impl RpcResponse {
    pub fn id(&self) -> &str {
        match self {
            RpcResponse::Result { id, .. }
            | RpcResponse::Error { id, .. }
            | RpcResponse::AuthUrl { id, .. } => id,
        }
    }

    pub fn parse(json: &str) -> Result<Self, BunkerError> {
        let message = NostrConnectMessage::from_json(json)
            .map_err(|e| BunkerError::Rpc(format!("bad response: {}", e)))?;
        let NostrConnectMessage::Response { id, result, error } = message else {
            return Err(BunkerError::Rpc(
                "expected a response, got a request".to_string(),
            ));
        };
        let error = error.filter(|e| !e.is_empty());

        Ok(match (result, error) {
            (Some(r), Some(url)) if r == AUTH_URL_RESULT => RpcResponse::AuthUrl { id, url },
            (_, Some(error)) => RpcResponse::Error { id, error },
            (Some(result), None) => RpcResponse::Result { id, result },
            (None, None) => RpcResponse::Error {
                id,
                error: "empty response".to_string(),
            },
        })
    }
}

/// Read `result` as the typed answer to `method`.
pub fn typed_result(method: NostrConnectMethod, result: String) -> Result<ResponseResult, BunkerError> {
    ResponseResult::parse(method, result)
        .map_err(|e| BunkerError::Rpc(format!("unexpected {} result: {}", method, e)))
}

/// Kind 24133 event from `client` to `remote` carrying `request`, NIP-44
/// encrypted.
pub fn request_event(
    client: &Keys,
    remote: &PublicKey,
    request: &RpcRequest,
) -> Result<Event, BunkerError> {
    let plaintext = request.to_message().as_json();
    let content = nip44::encrypt(client.secret_key(), remote, plaintext, nip44::Version::default())
        .map_err(|e| BunkerError::Rpc(format!("encrypt failed: {}", e)))?;

    EventBuilder::new(Kind::NostrConnect, content)
        .tag(Tag::public_key(*remote))
        .sign_with_keys(client)
        .map_err(|e| BunkerError::Rpc(format!("signing request failed: {}", e)))
}

/// Decrypt an event addressed to `client`, NIP-44 first, NIP-04 for older
/// signers.
pub fn decrypt_content(client: &Keys, event: &Event) -> Result<String, BunkerError> {
    match nip44::decrypt(client.secret_key(), &event.pubkey, &event.content) {
        Ok(plaintext) => Ok(plaintext),
        Err(nip44_err) => nip04::decrypt(client.secret_key(), &event.pubkey, &event.content)
            .map_err(|nip04_err| {
                BunkerError::Rpc(format!(
                    "undecryptable response (nip44: {}, nip04: {})",
                    nip44_err, nip04_err
                ))
            }),
    }
}

pub fn response_from_event(client: &Keys, event: &Event) -> Result<RpcResponse, BunkerError> {
    RpcResponse::parse(&decrypt_content(client, event)?)
}
