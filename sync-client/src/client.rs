//! HubClient - the main interface for homesync.
//!
//! This module provides [`HubClient`], the one object the presentation layer
//! holds for a session. It owns the store, echo ledger, reconciler,
//! connection manager and dispatcher, and wires them together.
//!
//! # Architecture
//!
//! ```text
//! UI ──► HubClient::dispatch_write ──► CommandDispatcher ──► WriteApi
//!             │                              │
//!             ▼                              ▼
//!      OptimisticStore ◄── Reconciler ◄── ConnectionManager ◄── Transport
//!                              │
//!                              ▼
//!                         QueryCache (batched)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use homesync_client::{HubClient, HubConfig, WsTransport};
//!
//! let client = HubClient::new(&config, WsTransport::new(), api, cache, credentials)?;
//! client.connect()?;
//!
//! let outcome = client.dispatch_write(&"dev1".into(), "power", json!(true)).await;
//! ```

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use homesync_core::{
    AttributeState, ConnectionState, EchoLedger, HubEvent, ObserverId, OptimisticStore,
    QueryCache, Reconciler, Scheduler, StoreChange,
};
use homesync_types::{AccessoryId, AttributeKey, Credential, Value};

use crate::config::{ConfigError, HubConfig};
use crate::connection::ConnectionManager;
use crate::dispatcher::{CommandDispatcher, GroupWriteOutcome, WriteApi, WriteGroup, WriteOutcome};
use crate::scheduler::TokioScheduler;
use crate::transport::Transport;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No bearer token available.
    #[error("no credential available")]
    MissingCredential,
}

/// Supplies the current bearer token. Read-only from homesync's side.
pub trait CredentialProvider: Send + Sync {
    /// The token to connect with, if signed in.
    fn credential(&self) -> Option<Credential>;
}

impl CredentialProvider for Credential {
    fn credential(&self) -> Option<Credential> {
        Some(self.clone())
    }
}

/// The client-side sync core for one session.
pub struct HubClient<T: Transport + 'static, W: WriteApi> {
    store: Arc<OptimisticStore>,
    ledger: Arc<EchoLedger>,
    reconciler: Arc<Reconciler>,
    connection: ConnectionManager<T>,
    dispatcher: CommandDispatcher<W>,
    credentials: Arc<dyn CredentialProvider>,
}

impl<T: Transport + 'static, W: WriteApi> HubClient<T, W> {
    /// Build a client from configuration.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        config: &HubConfig,
        transport: T,
        api: W,
        cache: Arc<dyn QueryCache>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::current());
        let store = Arc::new(OptimisticStore::new(scheduler.clone()));
        let ledger = Arc::new(EchoLedger::new(scheduler.clone(), config.echo()));
        let reconciler = Reconciler::new(
            scheduler,
            store.clone(),
            ledger.clone(),
            cache,
            config.debounce(),
        );

        let connection = ConnectionManager::new(transport, config.connection_config()?);
        let router = reconciler.clone();
        connection.subscribe(move |message| {
            router.on_push(message);
        });

        let dispatcher =
            CommandDispatcher::new(api, store.clone(), ledger.clone(), config.write_timeout());

        Ok(Self {
            store,
            ledger,
            reconciler,
            connection,
            dispatcher,
            credentials,
        })
    }

    /// Open the push channel with the provider's current token.
    pub fn connect(&self) -> Result<(), ClientError> {
        let credential = self
            .credentials
            .credential()
            .filter(|credential| !credential.is_empty())
            .ok_or(ClientError::MissingCredential)?;
        self.connection.connect(credential);
        Ok(())
    }

    /// Close the push channel and flush queued cache updates.
    pub fn disconnect(&self) {
        self.connection.disconnect();
        let flushed = self.reconciler.shutdown();
        debug!(flushed, "reconciler flushed on disconnect");
    }

    /// End the session: disconnect and drop all local state.
    pub fn logout(&self) {
        self.disconnect();
        self.store.clear();
        self.ledger.clear_all();
        info!("session state cleared");
    }

    /// Load the initial snapshot query result.
    pub fn seed(&self, values: impl IntoIterator<Item = (AttributeKey, Value)>) -> usize {
        self.store.seed(values)
    }

    /// Current believed value of `key`.
    pub fn read(&self, key: &AttributeKey) -> Option<Value> {
        self.store.read(key)
    }

    /// Full state of `key`.
    pub fn attribute_state(&self, key: &AttributeKey) -> Option<AttributeState> {
        self.store.state(key)
    }

    /// Check if `key` has an unresolved write.
    pub fn is_pending(&self, key: &AttributeKey) -> bool {
        self.store.is_pending(key)
    }

    /// Check if any attribute of `entity_id` has an unresolved write.
    pub fn is_pending_for_entity(&self, entity_id: &AccessoryId) -> bool {
        self.store.is_pending_for_entity(entity_id)
    }

    /// Last reported reachability of `entity_id`.
    pub fn is_reachable(&self, entity_id: &AccessoryId) -> Option<bool> {
        self.store.is_reachable(entity_id)
    }

    /// Register a re-render trigger.
    pub fn subscribe(
        &self,
        observer: impl Fn(&StoreChange) + Send + Sync + 'static,
    ) -> ObserverId {
        self.store.subscribe(observer)
    }

    /// Remove a re-render trigger.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Write one attribute optimistically.
    pub async fn dispatch_write(
        &self,
        entity_id: &AccessoryId,
        attribute: &str,
        value: Value,
    ) -> WriteOutcome {
        self.dispatcher
            .dispatch_write(entity_id, attribute, value)
            .await
    }

    /// Write one attribute across a group optimistically.
    pub async fn dispatch_group_write(
        &self,
        group: &WriteGroup,
        attribute: &str,
        value: Value,
    ) -> GroupWriteOutcome {
        self.dispatcher
            .dispatch_group_write(group, attribute, value)
            .await
    }

    /// Check if the push channel is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Push channel state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Follow push channel state.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Follow push channel lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<HubEvent> {
        self.connection.events()
    }

    /// Flush queued cache updates now.
    pub fn flush(&self) -> usize {
        self.reconciler.flush()
    }

    /// The store (for testing and advanced use).
    pub fn store(&self) -> &Arc<OptimisticStore> {
        &self.store
    }

    /// The connection manager (for testing).
    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }
}

impl<T: Transport + 'static, W: WriteApi> Drop for HubClient<T, W> {
    fn drop(&mut self) {
        // The push handler may still hold the reconciler; flush now rather
        // than when the aborted reader task releases it.
        let flushed = self.reconciler.shutdown();
        debug!(flushed, "reconciler flushed on drop");
    }
}
