//! Remote signer session: connect, out-of-band authorization, public-key
//! polling with stall recovery, then signing through the queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::auth_url::{AuthUrlDisposition, AuthUrlOpener};
use super::pointer::ConnectionPointer;
use super::queue::{EventTemplate, SignQueue};
use super::transport::{SignerTransport, SignerTransportFactory, TransportParams};
use super::BunkerError;
use crate::constants::{DEFAULT_BUNKER_RELAY, MAX_PROBE_CANDIDATES};
use crate::events::{CoreEvent, EventBus};
use crate::nostr::identity;
use crate::nostr::probe::{race_open, RelayConnector};
use crate::policy::{ConnectPolicy, SignPolicy};
use crate::storage::SessionStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    /// The signer sent an approval URL and is waiting on the user
    AwaitingAuthorization,
    PollingPubkey,
    Ready,
    Failed { reason: String },
    Closed,
}

/// Holds the connect flag for the lifetime of one attempt, including when
/// the attempt is cancelled.
struct ConnectGuard<'a>(&'a AtomicBool);

impl<'a> ConnectGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct AuthTracker {
    triggered: AtomicBool,
    last_url: Mutex<Option<String>>,
}

impl AuthTracker {
    fn trigger(&self, url: &str) {
        self.triggered.store(true, Ordering::Release);
        *self.last_url.lock() = Some(url.to_string());
    }

    fn triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    fn last_url(&self) -> Option<String> {
        self.last_url.lock().clone()
    }
}

struct ActiveSigner {
    transport: Arc<dyn SignerTransport>,
    pubkey: String,
    auth: Arc<AuthTracker>,
    listener: JoinHandle<()>,
}

pub struct RemoteSignerSession {
    factory: Arc<dyn SignerTransportFactory>,
    connector: Arc<dyn RelayConnector>,
    store: SessionStore,
    bus: EventBus,
    opener: Arc<dyn AuthUrlOpener>,
    policy: ConnectPolicy,
    queue: SignQueue,
    connecting: AtomicBool,
    state: Arc<watch::Sender<SessionState>>,
    active: Mutex<Option<ActiveSigner>>,
}

impl RemoteSignerSession {
    pub fn new(
        factory: Arc<dyn SignerTransportFactory>,
        connector: Arc<dyn RelayConnector>,
        store: SessionStore,
        bus: EventBus,
        opener: Arc<dyn AuthUrlOpener>,
        policy: ConnectPolicy,
        sign_policy: SignPolicy,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            factory,
            connector,
            store,
            bus,
            opener,
            policy,
            queue: SignQueue::new(sign_policy),
            connecting: AtomicBool::new(false),
            state: Arc::new(state),
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Remote user public key once the session is ready.
    pub fn pubkey(&self) -> Option<String> {
        self.active.lock().as_ref().map(|a| a.pubkey.clone())
    }

    pub fn is_ready(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Connect to the signer described by `uri` and wait until it hands out
    /// the user's public key.
    ///
    /// Returns the existing identity when already connected; fails with
    /// `ConnectInProgress` while another attempt is running.
    pub async fn connect(&self, uri: &str) -> Result<String, BunkerError> {
        if let Some(pubkey) = self.pubkey() {
            debug!("already connected as {}", pubkey);
            return Ok(pubkey);
        }
        let _guard = ConnectGuard::acquire(&self.connecting).ok_or(BunkerError::ConnectInProgress)?;
        if let Some(pubkey) = self.pubkey() {
            return Ok(pubkey);
        }

        self.set_state(SessionState::Connecting);
        match self.establish(uri).await {
            Ok((active, uri)) => {
                let pubkey = active.pubkey.clone();
                if let Err(e) = self.store.mark_connected(&uri, &pubkey) {
                    warn!("failed to persist signer connection: {}", e);
                }
                *self.active.lock() = Some(active);
                info!("remote signer ready as {}", pubkey);
                self.set_state(SessionState::Ready);
                self.bus.emit(CoreEvent::SignerReady {
                    pubkey: pubkey.clone(),
                });
                Ok(pubkey)
            }
            Err(e) => {
                warn!("remote signer connect failed: {}", e);
                self.set_state(SessionState::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Reconnect with the persisted URI if the last session ended connected
    /// and nothing is active now. `Ok(None)` when there is nothing to resume.
    pub async fn auto_reconnect(&self) -> Result<Option<String>, BunkerError> {
        if self.is_ready() || !self.store.was_connected() {
            return Ok(None);
        }
        let Some(uri) = self.store.last_uri()? else {
            return Ok(None);
        };
        info!("resuming remote signer session");
        self.connect(&uri).await.map(Some)
    }

    pub async fn get_public_key(&self) -> Result<String, BunkerError> {
        let transport = self
            .active
            .lock()
            .as_ref()
            .map(|a| a.transport.clone())
            .ok_or(BunkerError::NotConnected)?;
        let limit = Duration::from_millis(self.queue.policy().floor_ms);
        timeout(limit, transport.get_public_key())
            .await
            .map_err(|_| BunkerError::Transport("get_public_key timed out".to_string()))?
    }

    /// Sign through the queue; see [`SignQueue::sign`].
    pub async fn sign_event(
        &self,
        template: &EventTemplate,
        timeout: Option<Duration>,
    ) -> Result<Event, BunkerError> {
        let (transport, pubkey, auth) = {
            let active = self.active.lock();
            let active = active.as_ref().ok_or(BunkerError::NotConnected)?;
            (active.transport.clone(), active.pubkey.clone(), active.auth.clone())
        };
        self.queue
            .sign(transport.as_ref(), Some(&pubkey), template, timeout, || {
                auth.last_url()
            })
            .await
    }

    pub async fn sign_value(
        &self,
        value: &Value,
        timeout: Option<Duration>,
    ) -> Result<Event, BunkerError> {
        self.sign_event(&EventTemplate::from_value(value)?, timeout)
            .await
    }

    /// Tear down the transport. Persisted markers survive so the session can
    /// be resumed with [`Self::auto_reconnect`].
    pub async fn close(&self) {
        let active = self.active.lock().take();
        if let Some(active) = active {
            active.listener.abort();
            active.transport.close().await;
        }
        self.set_state(SessionState::Closed);
    }

    /// Close and forget the connection. The client session key is kept.
    pub async fn logout(&self) -> Result<(), BunkerError> {
        self.close().await;
        self.store.clear_connection()?;
        info!("remote signer logged out");
        Ok(())
    }

    async fn establish(&self, uri: &str) -> Result<(ActiveSigner, String), BunkerError> {
        let pointer = ConnectionPointer::parse(uri)?;
        let relay = self.preflight(&pointer).await;
        let client_keys = self.client_keys()?;
        info!(
            relay = %relay,
            "connecting to remote signer {}", pointer.remote_signer_pubkey
        );

        let (auth_tx, auth_rx) = mpsc::unbounded_channel();
        let auth = Arc::new(AuthTracker::default());
        let listener = self.spawn_auth_listener(auth_rx, auth.clone());
        let params = TransportParams {
            pointer: pointer.clone(),
            relay,
            client_keys,
            auth_tx,
        };

        match self.poll_until_ready(params, &auth).await {
            Ok((transport, pubkey)) => Ok((
                ActiveSigner {
                    transport,
                    pubkey,
                    auth,
                    listener,
                },
                pointer.to_uri(),
            )),
            Err(e) => {
                listener.abort();
                Err(e)
            }
        }
    }

    /// Uncached race among the pointer's relays; falls back to its first
    /// relay, or the default bunker relay when it names none.
    async fn preflight(&self, pointer: &ConnectionPointer) -> String {
        let candidates: Vec<String> = pointer
            .relays
            .iter()
            .take(MAX_PROBE_CANDIDATES)
            .cloned()
            .collect();
        let Some(first) = candidates.first().cloned() else {
            return DEFAULT_BUNKER_RELAY.to_string();
        };

        match race_open(self.connector.as_ref(), &candidates, self.policy.preflight_cap()).await {
            Some(relay) => relay,
            None => {
                info!("preflight: no relay opened in time, using {}", first);
                first
            }
        }
    }

    fn client_keys(&self) -> Result<Keys, BunkerError> {
        if let Some(secret) = self.store.client_secret()? {
            match SecretKey::from_hex(&secret) {
                Ok(secret) => return Ok(Keys::new(secret)),
                Err(e) => warn!("stored client key is unusable, generating a new one: {}", e),
            }
        }
        let keys = Keys::generate();
        self.store
            .set_client_secret(&keys.secret_key().to_secret_hex())?;
        Ok(keys)
    }

    /// Poll `get_public_key` until a key arrives or the window closes. The
    /// NIP-46 `connect` request runs alongside; once authorization has been
    /// triggered, a stalled transport is rebuilt every `stall_every` attempts.
    /// A rebuild that fails keeps the current transport until the next stall.
    async fn poll_until_ready(
        &self,
        params: TransportParams,
        auth: &AuthTracker,
    ) -> Result<(Arc<dyn SignerTransport>, String), BunkerError> {
        let started = Instant::now();
        let deadline = started + self.policy.window();

        let mut transport = self.factory.create(params.clone()).await?;
        let mut connect_task = spawn_connect(transport.clone());
        self.transition(
            |s| *s == SessionState::Connecting,
            SessionState::PollingPubkey,
        );

        let mut attempt = 0u32;
        while Instant::now() < deadline {
            attempt += 1;
            let per_attempt = self
                .policy
                .attempt_timeout()
                .min(deadline.saturating_duration_since(Instant::now()));

            match timeout(per_attempt, transport.get_public_key()).await {
                Ok(Ok(pubkey)) if identity::is_hex_pubkey(&pubkey) => {
                    connect_task.abort();
                    return Ok((transport, pubkey.to_lowercase()));
                }
                Ok(Ok(other)) => debug!(attempt, "get_public_key answered {:?}", other),
                Ok(Err(e)) => debug!(attempt, "get_public_key failed: {}", e),
                Err(_) => debug!(attempt, "get_public_key timed out"),
            }

            if self.policy.should_recreate(attempt, auth.triggered()) {
                info!(attempt, "authorization stalled, recreating signer transport");
                match timeout_at(deadline, self.factory.create(params.clone())).await {
                    Ok(Ok(fresh)) => {
                        connect_task.abort();
                        transport.close().await;
                        transport = fresh;
                        connect_task = spawn_connect(transport.clone());
                    }
                    Ok(Err(e)) => warn!(attempt, "recreating signer transport failed: {}", e),
                    Err(_) => debug!(attempt, "window closed while recreating signer transport"),
                }
            }

            let next = (Instant::now() + self.policy.poll_interval()).min(deadline);
            sleep_until(next).await;
        }

        connect_task.abort();
        transport.close().await;
        Err(BunkerError::AuthorizationTimeout {
            auth_triggered: auth.triggered(),
            elapsed: started.elapsed(),
        })
    }

    fn spawn_auth_listener(
        &self,
        mut auth_rx: mpsc::UnboundedReceiver<String>,
        auth: Arc<AuthTracker>,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        let bus = self.bus.clone();
        let opener = self.opener.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            while let Some(url) = auth_rx.recv().await {
                auth.trigger(&url);
                if let Err(e) = store.set_last_auth_url(&url) {
                    warn!("failed to persist auth url: {}", e);
                }

                let presenting = {
                    let opener = opener.clone();
                    let url = url.clone();
                    tokio::task::spawn_blocking(move || opener.present(&url))
                };
                let disposition = presenting.await.unwrap_or(AuthUrlDisposition::Surfaced);
                info!(?disposition, "remote signer requested authorization: {}", url);

                bus.emit(CoreEvent::AuthUrl { url, disposition });
                transition(
                    &state,
                    &bus,
                    |s| matches!(s, SessionState::Connecting | SessionState::PollingPubkey),
                    SessionState::AwaitingAuthorization,
                );
                // handled: back to waiting for the key
                transition(
                    &state,
                    &bus,
                    |s| *s == SessionState::AwaitingAuthorization,
                    SessionState::PollingPubkey,
                );
            }
        })
    }

    fn set_state(&self, next: SessionState) {
        self.transition(|_| true, next);
    }

    fn transition(&self, allowed: impl Fn(&SessionState) -> bool, next: SessionState) {
        transition(&self.state, &self.bus, allowed, next);
    }
}

fn transition(
    state: &watch::Sender<SessionState>,
    bus: &EventBus,
    allowed: impl Fn(&SessionState) -> bool,
    next: SessionState,
) {
    let changed = state.send_if_modified(|current| {
        if allowed(current) && *current != next {
            *current = next.clone();
            true
        } else {
            false
        }
    });
    if changed {
        debug!(?next, "signer session state");
        bus.emit(CoreEvent::SignerState(next));
    }
}

fn spawn_connect(transport: Arc<dyn SignerTransport>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match transport.connect().await {
            Ok(result) => debug!("connect acknowledged: {}", result),
            Err(e) => debug!("connect request failed: {}", e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::keys;
    use crate::nostr::probe::tests::{Behavior, FakeConnector};
    use crate::nostr::bunker::SurfaceOnly;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    const URL: &str = "https://nsec.app/approve/123";

    struct FakeBunker {
        user: Keys,
        ready: bool,
        auth_url: Option<String>,
        auth_tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl SignerTransport for FakeBunker {
        async fn connect(&self) -> Result<String, BunkerError> {
            if let Some(url) = &self.auth_url {
                let _ = self.auth_tx.send(url.clone());
            }
            Ok("ack".to_string())
        }

        async fn get_public_key(&self) -> Result<String, BunkerError> {
            if !self.ready {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(self.user.public_key().to_hex())
        }

        async fn sign_event(&self, template: &EventTemplate) -> Result<Event, BunkerError> {
            EventBuilder::new(Kind::from(template.kind), template.content.clone())
                .sign_with_keys(&self.user)
                .map_err(|e| BunkerError::Rpc(e.to_string()))
        }

        async fn reconnect(&self) -> Result<(), BunkerError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    /// Instances numbered from 1 answer `get_public_key` once their number
    /// reaches `ready_from`.
    struct FakeFactory {
        user: Keys,
        ready_from: Option<usize>,
        auth_url: Option<String>,
        /// Call numbers that fail to build a transport
        fail_on: Mutex<Vec<usize>>,
        created: AtomicUsize,
        relays: Mutex<Vec<String>>,
        client_keys: Mutex<Vec<PublicKey>>,
    }

    impl FakeFactory {
        fn new(ready_from: Option<usize>, auth_url: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                user: Keys::generate(),
                ready_from,
                auth_url: auth_url.map(str::to_string),
                fail_on: Mutex::new(Vec::new()),
                created: AtomicUsize::new(0),
                relays: Mutex::new(Vec::new()),
                client_keys: Mutex::new(Vec::new()),
            })
        }

        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SignerTransportFactory for FakeFactory {
        async fn create(
            &self,
            params: TransportParams,
        ) -> Result<Arc<dyn SignerTransport>, BunkerError> {
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.lock().contains(&n) {
                return Err(BunkerError::Transport("relay unreachable".to_string()));
            }
            self.relays.lock().push(params.relay.clone());
            self.client_keys.lock().push(params.client_keys.public_key());
            Ok(Arc::new(FakeBunker {
                user: self.user.clone(),
                ready: self.ready_from.is_some_and(|r| n >= r),
                auth_url: self.auth_url.clone(),
                auth_tx: params.auth_tx,
            }))
        }
    }

    fn session_with(
        factory: Arc<FakeFactory>,
        connector: FakeConnector,
        store: SessionStore,
        policy: ConnectPolicy,
    ) -> (Arc<RemoteSignerSession>, EventBus) {
        let bus = EventBus::new();
        let session = RemoteSignerSession::new(
            factory,
            Arc::new(connector),
            store,
            bus.clone(),
            Arc::new(SurfaceOnly),
            policy,
            SignPolicy::default(),
        );
        (Arc::new(session), bus)
    }

    fn session(factory: Arc<FakeFactory>) -> (Arc<RemoteSignerSession>, EventBus) {
        session_with(
            factory,
            FakeConnector::new(&[("wss://relay.one", Behavior::OpenAfter(5))]),
            SessionStore::in_memory(),
            ConnectPolicy::default(),
        )
    }

    fn uri(relays: &[&str]) -> String {
        let remote = Keys::generate().public_key().to_hex();
        let query: Vec<String> = relays.iter().map(|r| format!("relay={}", r)).collect();
        format!("bunker://{}?{}", remote, query.join("&"))
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<CoreEvent>) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reaches_ready_and_persists() {
        let factory = FakeFactory::new(Some(1), None);
        let store = SessionStore::in_memory();
        let (session, bus) = session_with(
            factory.clone(),
            FakeConnector::new(&[("wss://relay.one", Behavior::OpenAfter(5))]),
            store.clone(),
            ConnectPolicy::default(),
        );
        let mut rx = bus.subscribe();

        let pubkey = session.connect(&uri(&["wss://relay.one"])).await.unwrap();
        assert_eq!(pubkey, factory.user.public_key().to_hex());
        assert_eq!(session.state(), SessionState::Ready);
        assert!(store.was_connected());
        assert_eq!(store.remote_pubkey().unwrap(), Some(pubkey.clone()));
        assert!(store.last_uri().unwrap().unwrap().starts_with("bunker://"));

        let events = drain(&mut rx);
        assert!(events.contains(&CoreEvent::SignerState(SessionState::Connecting)));
        assert!(events.contains(&CoreEvent::SignerState(SessionState::PollingPubkey)));
        assert_eq!(events.last(), Some(&CoreEvent::SignerReady { pubkey }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connect_is_rejected() {
        let factory = FakeFactory::new(Some(1), None);
        let (session, _bus) = session(factory.clone());
        let target = uri(&["wss://relay.one"]);

        let first = {
            let session = session.clone();
            let target = target.clone();
            tokio::spawn(async move { session.connect(&target).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = session.connect(&target).await;
        assert!(matches!(second, Err(BunkerError::ConnectInProgress)));
        assert!(first.await.unwrap().is_ok());
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_when_ready_returns_existing_identity() {
        let factory = FakeFactory::new(Some(1), None);
        let (session, _bus) = session(factory.clone());

        let first = session.connect(&uri(&["wss://relay.one"])).await.unwrap();
        let again = session.connect(&uri(&["wss://relay.two"])).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_elapses_without_auth_url() {
        let factory = FakeFactory::new(None, None);
        let (session, _bus) = session(factory.clone());

        let started = Instant::now();
        let err = session
            .connect(&uri(&["wss://relay.one"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BunkerError::AuthorizationTimeout {
                auth_triggered: false,
                ..
            }
        ));
        assert!(err.to_string().contains("no auth_url received"));
        assert!(started.elapsed() <= Duration::from_secs(46));
        // nothing to recover from without an authorization
        assert_eq!(factory.created(), 1);
        assert!(matches!(session.state(), SessionState::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_url_is_surfaced_and_stalls_recreate_transport() {
        let factory = FakeFactory::new(None, Some(URL));
        let store = SessionStore::in_memory();
        let (session, bus) = session_with(
            factory.clone(),
            FakeConnector::new(&[("wss://relay.one", Behavior::OpenAfter(5))]),
            store.clone(),
            ConnectPolicy::default(),
        );
        let mut rx = bus.subscribe();

        let err = session
            .connect(&uri(&["wss://relay.one"]))
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("authorization triggered but not completed"));
        assert_eq!(store.last_auth_url().unwrap().as_deref(), Some(URL));

        // attempts take 1.2s + 0.5s; 27 fit in 45s, recreating at 6, 12, 18, 24
        assert_eq!(factory.created(), 5);

        let events = drain(&mut rx);
        assert!(events.contains(&CoreEvent::AuthUrl {
            url: URL.to_string(),
            disposition: AuthUrlDisposition::Surfaced,
        }));
        let awaiting = events
            .iter()
            .position(|e| *e == CoreEvent::SignerState(SessionState::AwaitingAuthorization))
            .unwrap();
        assert_eq!(
            events[awaiting + 1],
            CoreEvent::SignerState(SessionState::PollingPubkey)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_recreate_keeps_polling() {
        let factory = FakeFactory::new(Some(3), Some(URL));
        factory.fail_on.lock().push(2);
        let (session, _bus) = session(factory.clone());

        let pubkey = session.connect(&uri(&["wss://relay.one"])).await.unwrap();
        assert_eq!(pubkey, factory.user.public_key().to_hex());
        assert_eq!(factory.created(), 3);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recreate_failures_end_at_the_window() {
        let factory = FakeFactory::new(None, Some(URL));
        factory.fail_on.lock().extend([2, 3, 4, 5]);
        let (session, _bus) = session(factory.clone());

        let started = Instant::now();
        let err = session
            .connect(&uri(&["wss://relay.one"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BunkerError::AuthorizationTimeout {
                auth_triggered: true,
                ..
            }
        ));
        assert!(started.elapsed() >= Duration::from_secs(44));
        assert_eq!(factory.created(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_recovery_reaches_ready_on_new_transport() {
        let factory = FakeFactory::new(Some(2), Some(URL));
        let (session, _bus) = session(factory.clone());

        let pubkey = session.connect(&uri(&["wss://relay.one"])).await.unwrap();
        assert_eq!(pubkey, factory.user.public_key().to_hex());
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_recovery_can_be_disabled() {
        let factory = FakeFactory::new(Some(2), Some(URL));
        let policy = ConnectPolicy {
            stall_every: 0,
            ..ConnectPolicy::default()
        };
        let (session, _bus) = session_with(
            factory.clone(),
            FakeConnector::new(&[]),
            SessionStore::in_memory(),
            policy,
        );

        assert!(session.connect(&uri(&["wss://relay.one"])).await.is_err());
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preflight_falls_back_when_no_relay_opens() {
        let factory = FakeFactory::new(Some(1), None);
        let (session, _bus) = session_with(
            factory.clone(),
            FakeConnector::new(&[]),
            SessionStore::in_memory(),
            ConnectPolicy::default(),
        );
        session
            .connect(&uri(&["wss://first", "wss://second"]))
            .await
            .unwrap();
        session.close().await;
        session.connect(&uri(&[])).await.unwrap();

        assert_eq!(
            *factory.relays.lock(),
            vec!["wss://first".to_string(), DEFAULT_BUNKER_RELAY.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_preflight_picks_fastest_relay() {
        let factory = FakeFactory::new(Some(1), None);
        let (session, _bus) = session_with(
            factory.clone(),
            FakeConnector::new(&[
                ("wss://slow", Behavior::OpenAfter(800)),
                ("wss://fast", Behavior::OpenAfter(50)),
            ]),
            SessionStore::in_memory(),
            ConnectPolicy::default(),
        );
        session
            .connect(&uri(&["wss://slow", "wss://fast"]))
            .await
            .unwrap();
        assert_eq!(*factory.relays.lock(), vec!["wss://fast".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_key_is_persisted_and_reused() {
        let factory = FakeFactory::new(Some(1), None);
        let store = SessionStore::in_memory();
        for _ in 0..2 {
            let (session, _bus) = session_with(
                factory.clone(),
                FakeConnector::new(&[]),
                store.clone(),
                ConnectPolicy::default(),
            );
            session.connect(&uri(&["wss://relay.one"])).await.unwrap();
        }

        let keys = factory.client_keys.lock();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], keys[1]);
        assert!(store.client_secret().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_markers_but_keeps_client_key() {
        let factory = FakeFactory::new(Some(1), None);
        let store = SessionStore::in_memory();
        let (session, _bus) = session_with(
            factory,
            FakeConnector::new(&[]),
            store.clone(),
            ConnectPolicy::default(),
        );
        session.connect(&uri(&["wss://relay.one"])).await.unwrap();

        session.logout().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_ready());
        assert!(!store.was_connected());
        assert_eq!(store.last_uri().unwrap(), None);
        assert_eq!(store.remote_pubkey().unwrap(), None);
        assert!(store.client_secret().unwrap().is_some());
        assert!(matches!(
            session.sign_event(&EventTemplate::new(1, "x"), None).await,
            Err(BunkerError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_reconnect_uses_persisted_uri() {
        let factory = FakeFactory::new(Some(1), None);
        let store = SessionStore::in_memory();
        let target = uri(&["wss://relay.one"]);
        store
            .markers()
            .set(keys::LAST_URI, &target)
            .unwrap();
        store.markers().set(keys::WAS_CONNECTED, "true").unwrap();

        let (session, _bus) = session_with(
            factory.clone(),
            FakeConnector::new(&[]),
            store,
            ConnectPolicy::default(),
        );
        let pubkey = session.auto_reconnect().await.unwrap();
        assert_eq!(pubkey, Some(factory.user.public_key().to_hex()));
        // already active: nothing more to do
        assert_eq!(session.auto_reconnect().await.unwrap(), None);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_auto_reconnect_without_marker_does_nothing() {
        let factory = FakeFactory::new(Some(1), None);
        let (session, _bus) = session(factory.clone());
        assert_eq!(session.auto_reconnect().await.unwrap(), None);
        assert_eq!(factory.created(), 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_and_pubkey_when_ready() {
        let factory = FakeFactory::new(Some(1), None);
        let (session, _bus) = session(factory.clone());
        session.connect(&uri(&["wss://relay.one"])).await.unwrap();

        let event = session
            .sign_value(&serde_json::json!({"kind": 1, "content": "hello"}), None)
            .await
            .unwrap();
        assert!(event.verify().is_ok());
        assert_eq!(event.pubkey, factory.user.public_key());
        assert_eq!(
            session.get_public_key().await.unwrap(),
            factory.user.public_key().to_hex()
        );
    }

    #[tokio::test]
    async fn test_invalid_uri_fails_without_transport() {
        let factory = FakeFactory::new(Some(1), None);
        let (session, _bus) = session(factory.clone());
        let err = session.connect("https://example.com").await.unwrap_err();
        assert!(matches!(err, BunkerError::InvalidPointer(_)));
        assert_eq!(factory.created(), 0);
        assert!(matches!(session.state(), SessionState::Failed { .. }));
    }
}
