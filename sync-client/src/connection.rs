//! Connection manager for the push channel.
//!
//! [`ConnectionManager`] drives the pure [`ConnectionState`] machine from
//! sync-core and interprets its actions with tokio tasks:
//!
//! ```text
//! connect() ──► ConnectionState::on_event ──► Action::Connect ──► session task
//!                        ▲                                          │ recv loop
//!                        └──────── Closed / ConnectFailed ◄─────────┘
//! ```
//!
//! Every socket gets a generation number. Events reported by a task that
//! belongs to an older generation are ignored, so a late close from a
//! superseded socket can never tear down its replacement.
//!
//! The manager never returns an error: transport failures are retried with
//! backoff and surface only through [`HubEvent`]s and the state channel.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use homesync_core::{
    Action, BackoffPolicy, ConnectionState, Event, HubEvent, ObserverId, Observers,
};
use homesync_types::{ClientMessage, Credential, PushMessage, CLOSE_ABNORMAL};

use crate::transport::{Frame, Transport, TransportError};

/// Interval between client keepalive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

const EVENT_CAPACITY: usize = 64;

/// Settings for the push channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Push endpoint, without credentials
    pub endpoint: Url,
    /// Keepalive ping interval
    pub ping_interval: Duration,
    /// Reconnect backoff
    pub backoff: BackoffPolicy,
}

impl ConnectionConfig {
    /// Default settings for `endpoint`.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            ping_interval: DEFAULT_PING_INTERVAL,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Owns the single push channel to the server.
pub struct ConnectionManager<T: Transport + 'static> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    transport: Arc<T>,
    config: ConnectionConfig,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<HubEvent>,
    handlers: Observers<PushMessage>,
    liveness: Mutex<Option<Instant>>,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    generation: u64,
    credential: Option<Credential>,
    session: Option<JoinHandle<()>>,
    closing: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl Inner {
    fn abort_all(&mut self) {
        for task in [
            self.session.take(),
            self.keepalive.take(),
            self.reconnect.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

impl<T: Transport + 'static> ConnectionManager<T> {
    /// Create a manager. Nothing happens until [`connect`](Self::connect).
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                transport: Arc::new(transport),
                config,
                inner: Mutex::new(Inner::default()),
                state_tx,
                events,
                handlers: Observers::new(),
                liveness: Mutex::new(None),
            }),
        }
    }

    /// Open the push channel with `credential`.
    ///
    /// No-op while connected or while an attempt (or its backoff) is in
    /// progress. From a failed or disconnected state this starts a fresh
    /// backoff sequence. An empty credential is refused outright. Must be
    /// called within a tokio runtime.
    pub fn connect(&self, credential: Credential) {
        if credential.is_empty() {
            warn!("connect refused; empty credential");
            return;
        }
        let mut inner = self.shared.inner.lock();
        if inner.state.is_connected() || inner.state.is_connecting() {
            debug!(state = ?inner.state, "connect ignored; channel already active");
            return;
        }
        inner.credential = Some(credential);
        self.shared.process(&mut inner, Event::ConnectRequested);
    }

    /// Close the channel with a normal-closure code and stop all retries.
    pub fn disconnect(&self) {
        let mut inner = self.shared.inner.lock();
        self.shared.process(&mut inner, Event::DisconnectRequested);
    }

    /// Send `message` if the channel is open. Returns false if it was dropped.
    pub async fn send(&self, message: &ClientMessage) -> bool {
        self.shared.send_message(message).await
    }

    /// Register a handler for every decoded push message.
    ///
    /// Handlers run on the connection's reader task and must not block. A
    /// handler that panics does not affect the others.
    pub fn subscribe(
        &self,
        handler: impl Fn(&PushMessage) + Send + Sync + 'static,
    ) -> ObserverId {
        self.shared.handlers.subscribe(handler)
    }

    /// Remove a handler.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.shared.handlers.unsubscribe(id)
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state.clone()
    }

    /// Check if the channel is open.
    pub fn is_connected(&self) -> bool {
        self.shared.inner.lock().state.is_connected()
    }

    /// Follow state changes (for connectivity UI).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Follow lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<HubEvent> {
        self.shared.events.subscribe()
    }

    /// When a ping or pong was last seen. Informational only.
    pub fn last_liveness(&self) -> Option<Instant> {
        *self.shared.liveness.lock()
    }

    /// Access the transport (for testing).
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }
}

impl<T: Transport + 'static> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        self.shared.inner.lock().abort_all();
    }
}

impl<T: Transport + 'static> Shared<T> {
    /// Feed an event from a background task. Stale generations are dropped.
    fn dispatch(self: &Arc<Self>, generation: u64, event: Event) {
        let mut inner = self.inner.lock();
        if generation != inner.generation {
            debug!(
                generation,
                current = inner.generation,
                ?event,
                "ignoring event from stale socket"
            );
            return;
        }
        self.process(&mut inner, event);
    }

    fn process(self: &Arc<Self>, inner: &mut Inner, event: Event) {
        let (next, actions) = inner.state.clone().on_event(event, &self.config.backoff);
        if next != inner.state {
            debug!(from = ?inner.state, to = ?next, "connection state changed");
        }
        inner.state = next.clone();
        self.state_tx.send_replace(next);

        for action in actions {
            self.execute(inner, action);
        }
    }

    fn execute(self: &Arc<Self>, inner: &mut Inner, action: Action) {
        match action {
            Action::Connect => {
                inner.generation += 1;
                if let Some(old) = inner.session.take() {
                    old.abort();
                }
                let generation = inner.generation;
                let Some(url) = self.session_url(inner.credential.as_ref()) else {
                    warn!("no credential available for push channel");
                    self.process(
                        inner,
                        Event::ConnectFailed {
                            error: "missing credential".into(),
                        },
                    );
                    return;
                };
                let closing = inner.closing.take();
                let shared = Arc::clone(self);
                inner.session = Some(tokio::spawn(async move {
                    shared.run_session(generation, url, closing).await;
                }));
            }
            Action::Close { code } => {
                inner.generation += 1;
                if let Some(session) = inner.session.take() {
                    session.abort();
                }
                let transport = Arc::clone(&self.transport);
                inner.closing = Some(tokio::spawn(async move {
                    if let Err(e) = transport.close(code).await {
                        debug!(error = %e, code, "close failed");
                    }
                }));
            }
            Action::StartKeepalive => {
                if let Some(old) = inner.keepalive.take() {
                    old.abort();
                }
                let shared = Arc::clone(self);
                inner.keepalive = Some(tokio::spawn(async move {
                    shared.run_keepalive().await;
                }));
            }
            Action::StopKeepalive => {
                if let Some(keepalive) = inner.keepalive.take() {
                    keepalive.abort();
                }
            }
            Action::StartReconnectTimer { delay } => {
                if let Some(old) = inner.reconnect.take() {
                    old.abort();
                }
                let generation = inner.generation;
                let shared = Arc::clone(self);
                inner.reconnect = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.dispatch(generation, Event::ReconnectTimer);
                }));
            }
            Action::CancelReconnect => {
                if let Some(reconnect) = inner.reconnect.take() {
                    reconnect.abort();
                }
            }
            Action::EmitEvent(event) => {
                log_event(&event);
                // No receivers is fine.
                let _ = self.events.send(event);
            }
        }
    }

    fn session_url(&self, credential: Option<&Credential>) -> Option<Url> {
        let credential = credential.filter(|c| !c.is_empty())?;
        let mut url = self.config.endpoint.clone();
        url.query_pairs_mut().append_pair("token", credential.expose());
        Some(url)
    }

    async fn run_session(
        self: Arc<Self>,
        generation: u64,
        url: Url,
        closing: Option<JoinHandle<()>>,
    ) {
        // The previous socket must be fully closed before the transport is reused.
        if let Some(closing) = closing {
            let _ = closing.await;
        }

        info!(endpoint = %self.config.endpoint, "opening push channel");
        if let Err(e) = self.transport.connect(url.as_str()).await {
            self.dispatch(
                generation,
                Event::ConnectFailed {
                    error: e.to_string(),
                },
            );
            return;
        }
        self.touch();
        self.dispatch(generation, Event::ConnectSucceeded);

        loop {
            match self.transport.recv().await {
                Ok(Frame::Text(text)) => self.on_text(&text).await,
                Ok(Frame::Close(code)) => {
                    let code = code.unwrap_or(CLOSE_ABNORMAL);
                    info!(code, "push channel closed by server");
                    self.dispatch(generation, Event::Closed { code });
                    return;
                }
                Err(TransportError::ConnectionClosed) => {
                    self.dispatch(
                        generation,
                        Event::Closed {
                            code: CLOSE_ABNORMAL,
                        },
                    );
                    return;
                }
                Err(e) => {
                    self.dispatch(
                        generation,
                        Event::TransportError {
                            error: e.to_string(),
                        },
                    );
                    return;
                }
            }
        }
    }

    async fn on_text(&self, text: &str) {
        let message = match PushMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping malformed push frame");
                return;
            }
        };
        trace!(kind = message.kind(), "push frame");

        match &message {
            PushMessage::Ping => {
                self.touch();
                if !self.send_message(&ClientMessage::Pong).await {
                    debug!("pong dropped; channel not open");
                }
            }
            PushMessage::Pong => self.touch(),
            PushMessage::Connected {
                server_instance_id,
                pubsub_enabled,
                ..
            } => {
                info!(
                    server_instance = server_instance_id.as_deref().unwrap_or("-"),
                    pubsub_enabled, "push channel accepted by server"
                );
            }
            PushMessage::CharacteristicUpdate { .. } | PushMessage::ReachabilityUpdate { .. } => {}
        }

        let panicked = self.handlers.notify(&message);
        if panicked > 0 {
            warn!(kind = message.kind(), panicked, "push handler panicked");
        }
    }

    async fn run_keepalive(self: Arc<Self>) {
        let period = self.config.ping_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.send_message(&ClientMessage::Ping).await {
                debug!("keepalive ping dropped; channel not open");
            }
        }
    }

    async fn send_message(&self, message: &ClientMessage) -> bool {
        if !self.inner.lock().state.is_connected() || !self.transport.is_connected() {
            return false;
        }
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode client message");
                return false;
            }
        };
        match self.transport.send(&text).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "send dropped");
                false
            }
        }
    }

    fn touch(&self) {
        *self.liveness.lock() = Some(Instant::now());
    }
}

fn log_event(event: &HubEvent) {
    match event {
        HubEvent::Connected => info!("push channel connected"),
        HubEvent::Disconnected { reason } => info!(%reason, "push channel disconnected"),
        HubEvent::ConnectionLost {
            attempt,
            retry_in,
            error,
        } => warn!(
            attempt,
            retry_in_ms = retry_in.as_millis() as u64,
            %error,
            "push channel lost; reconnecting"
        ),
        HubEvent::CredentialRejected => warn!("credential rejected by server"),
        HubEvent::GaveUp { attempts, error } => {
            error!(attempts, %error, "giving up on push channel")
        }
    }
}
