//! The object that owns every core component. Front ends build one and pass
//! it around by handle.

use std::sync::Arc;
use std::time::Duration;

use nostr_sdk::prelude::{Client, Event};
use tokio::sync::broadcast;
use tracing::info;

use crate::config::CoreConfig;
use crate::constants::kinds;
use crate::error::Result;
use crate::events::{CoreEvent, EventBus};
use crate::models::CalendarEntry;
use crate::nostr::bunker::{
    AuthUrlOpener, EventTemplate, RelaySignerTransportFactory, RemoteSignerSession,
    SignerTransportFactory,
};
use crate::nostr::filter::EventFilter;
use crate::nostr::pool::PoolTransport;
use crate::nostr::probe::{RelayConnector, RelayProbe};
use crate::nostr::publish::{PublishReport, Publisher};
use crate::nostr::query::EventQueryEngine;
use crate::nostr::transport::Transport;
use crate::nostr::ws::{WsConnector, WsTransport};
use crate::secure_storage::KeyringStore;
use crate::signer::{LocalSigner, Signer, SignerError};
use crate::storage::{JsonFileStore, KeyValueStore, SessionStore};

const PUBLISH_OK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ClientContext {
    config: CoreConfig,
    store: SessionStore,
    bus: EventBus,
    probe: Arc<RelayProbe>,
    query: EventQueryEngine,
    session: Arc<RemoteSignerSession>,
    local: Arc<LocalSigner>,
    publisher: Publisher,
}

impl ClientContext {
    /// Markers in `<data_dir>/session.json`; secrets there too, or in the OS
    /// keyring when `use_keyring` is set.
    pub fn open(config: CoreConfig, opener: Arc<dyn AuthUrlOpener>, use_keyring: bool) -> Self {
        let markers: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&config.data_dir));
        let secrets: Arc<dyn KeyValueStore> = if use_keyring {
            Arc::new(KeyringStore::new())
        } else {
            markers.clone()
        };
        Self::with_store(config, SessionStore::new(markers, secrets), opener)
    }

    pub fn with_store(
        config: CoreConfig,
        store: SessionStore,
        opener: Arc<dyn AuthUrlOpener>,
    ) -> Self {
        let connect_timeout = config.connect.relay_connect_timeout();
        let connector: Arc<dyn RelayConnector> = Arc::new(WsConnector);
        let pool: Arc<dyn Transport> = Arc::new(PoolTransport::new(
            Client::default(),
            config.query.fallback_timeout(),
        ));
        let raw: Arc<dyn Transport> = Arc::new(WsTransport::new(connect_timeout));
        let factory: Arc<dyn SignerTransportFactory> =
            Arc::new(RelaySignerTransportFactory::new(connect_timeout));

        Self::with_parts(config, store, opener, connector, pool, raw, factory)
    }

    /// Assemble from explicit adapters.
    pub fn with_parts(
        config: CoreConfig,
        store: SessionStore,
        opener: Arc<dyn AuthUrlOpener>,
        connector: Arc<dyn RelayConnector>,
        pool: Arc<dyn Transport>,
        raw: Arc<dyn Transport>,
        factory: Arc<dyn SignerTransportFactory>,
    ) -> Self {
        let bus = EventBus::new();
        let probe = Arc::new(RelayProbe::new(connector.clone(), config.probe.clone()));
        let query = EventQueryEngine::new(
            probe.clone(),
            pool,
            raw,
            config.relays.clone(),
            config.query.clone(),
        );
        let session = Arc::new(RemoteSignerSession::new(
            factory,
            connector,
            store.clone(),
            bus.clone(),
            opener,
            config.connect.clone(),
            config.sign.clone(),
        ));
        let publisher = Publisher::new(config.connect.relay_connect_timeout(), PUBLISH_OK_TIMEOUT);

        Self {
            config,
            store,
            bus,
            probe,
            query,
            session,
            local: Arc::new(LocalSigner::default()),
            publisher,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.bus.subscribe()
    }

    pub fn probe(&self) -> &Arc<RelayProbe> {
        &self.probe
    }

    pub fn query(&self) -> &EventQueryEngine {
        &self.query
    }

    pub fn session(&self) -> &Arc<RemoteSignerSession> {
        &self.session
    }

    pub fn local_signer(&self) -> &Arc<LocalSigner> {
        &self.local
    }

    /// The remote signer when it is ready, else the local key if one is loaded.
    pub fn active_signer(&self) -> Option<Arc<dyn Signer>> {
        if self.session.is_ready() {
            Some(self.session.clone())
        } else if self.local.is_logged_in() {
            Some(self.local.clone())
        } else {
            None
        }
    }

    /// Calendar entries (kinds 31922/31923), oldest first. Events that do not
    /// decode are skipped.
    pub async fn fetch_calendar(
        &self,
        filter: Option<EventFilter>,
        authors_hint: &[String],
    ) -> Vec<CalendarEntry> {
        let filter = filter.unwrap_or_else(|| {
            EventFilter::kinds([kinds::DATE_CALENDAR_EVENT, kinds::TIME_CALENDAR_EVENT])
        });
        self.query
            .fetch_events(&filter, authors_hint)
            .await
            .iter()
            .filter_map(CalendarEntry::from_event)
            .collect()
    }

    pub async fn sign(&self, template: &EventTemplate) -> Result<Event> {
        let signer = self.active_signer().ok_or(SignerError::NotLoggedIn)?;
        Ok(signer.sign_event(template).await?)
    }

    /// Sign with the active signer and publish to the configured relays.
    pub async fn publish(&self, template: &EventTemplate) -> Result<PublishReport> {
        let event = self.sign(template).await?;
        let report = self.publisher.publish(&event, &self.config.relays).await?;
        info!(
            event_id = %report.event_id,
            "published to {}/{} relays",
            report.accepted().len(),
            report.outcomes.len()
        );
        Ok(report)
    }

    pub async fn shutdown(&self) {
        self.session.close().await;
    }
}
