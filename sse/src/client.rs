use crate::listener::{
    ListenerId, ListenerRegistry, ListenerScope, StatusListeners, Subscription,
};
use crate::state::{ConnectionState, ConnectionStatus};
use crate::transport::{ConnectRequest, EventSourceTransport, Frame, FrameStream, Transport};
use chrono::Utc;
use events::EventEnvelope;
use futures_util::StreamExt;
use log::*;
use service::config::Config;
use service::session::TokenStore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

/// Message recorded when the server ends the stream without an error.
pub const CLOSED_BY_SERVER: &str = "Connection closed by server";

/// Settings for one event stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub endpoint: String,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_interval: Duration,
    /// Consecutive failed reconnects tolerated before staying in the error state.
    pub max_reconnect_attempts: u32,
    /// Extra request headers sent on every attempt.
    pub headers: Vec<(String, String)>,
    /// When set, the current bearer token is sent as the `token` query parameter.
    pub tokens: Option<TokenStore>,
}

impl StreamConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            headers: Vec::new(),
            tokens: None,
        }
    }

    /// Preset for the users event stream: 3 second interval, 10 attempts unless
    /// configured otherwise.
    pub fn users(config: &Config) -> Self {
        Self::new(config.events_url.clone())
            .with_reconnect_interval(config.reconnect_interval())
            .with_max_reconnect_attempts(config.max_reconnect_attempts)
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_token_store(mut self, tokens: TokenStore) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

/// Client side of a server-push event stream.
///
/// Owns at most one live connection, re-opens it after failures at a fixed
/// interval up to `max_reconnect_attempts` times in a row, and fans decoded
/// events out to listeners. Cloning yields another handle to the same
/// connection; dropping the last handle cancels the reader and any pending
/// reconnect.
///
/// `connect` spawns onto the current tokio runtime and must be called from
/// within one.
#[derive(Clone)]
pub struct EventStreamClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: StreamConfig,
    endpoint: Url,
    transport: Arc<dyn Transport>,
    listeners: ListenerRegistry,
    status_listeners: StatusListeners,
    runtime: Mutex<Runtime>,
}

/// Mutable connection bookkeeping, guarded by one mutex.
#[derive(Default)]
struct Runtime {
    state: ConnectionState,
    reader: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    /// Bumped on every open and disconnect; callbacks from an older reader or
    /// timer carry a stale value and are ignored.
    generation: u64,
}

impl EventStreamClient {
    pub fn new(
        config: StreamConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, url::ParseError> {
        let endpoint = Url::parse(&config.endpoint)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                endpoint,
                transport,
                listeners: ListenerRegistry::new(),
                status_listeners: StatusListeners::new(),
                runtime: Mutex::new(Runtime::default()),
            }),
        })
    }

    /// Users event stream over `eventsource-client`, authenticated with `tokens`.
    pub fn from_config(config: &Config, tokens: TokenStore) -> Result<Self, url::ParseError> {
        Self::new(
            StreamConfig::users(config).with_token_store(tokens),
            Arc::new(EventSourceTransport::new()),
        )
    }

    /// Opens the connection. A no-op while a connection is already connecting or
    /// connected. Called while in the error state, it also resets the attempt
    /// counter, re-enabling automatic reconnects.
    pub fn connect(&self) {
        {
            let mut runtime = self.inner.lock_runtime();
            if matches!(
                runtime.state.status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            ) {
                debug!("Event stream already {}", runtime.state.status);
                return;
            }

            if let Some(timer) = runtime.reconnect_timer.take() {
                timer.abort();
            }
            if runtime.state.status == ConnectionStatus::Error {
                runtime.state.reconnect_attempts = 0;
            }

            Inner::open(&self.inner, &mut runtime);
        }

        self.inner.status_listeners.flush();
    }

    /// Closes the connection and cancels any pending reconnect. Idempotent.
    ///
    /// Status listeners may still be receiving earlier snapshots on another
    /// thread when this returns; `Disconnected` is delivered after them.
    pub fn disconnect(&self) {
        let changed = {
            let mut runtime = self.inner.lock_runtime();
            runtime.generation += 1;

            if let Some(timer) = runtime.reconnect_timer.take() {
                timer.abort();
            }
            if let Some(reader) = runtime.reader.take() {
                reader.abort();
            }

            let changed = runtime.state.status != ConnectionStatus::Disconnected
                || runtime.state.error.is_some();
            runtime.state.status = ConnectionStatus::Disconnected;
            runtime.state.error = None;

            if changed {
                self.inner.status_listeners.enqueue(runtime.state.clone());
            }
            changed
        };

        if changed {
            info!("Event stream disconnected");
            self.inner.status_listeners.flush();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock_runtime().state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_runtime().state.is_connected()
    }

    /// True while a reconnect is scheduled but has not fired yet.
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner
            .lock_runtime()
            .reconnect_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    pub fn add_listener<F>(&self, scope: impl Into<ListenerScope>, listener: F) -> Subscription
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.inner.listeners.register(scope.into(), Arc::new(listener))
    }

    pub fn remove_listener(&self, subscription: &Subscription) -> bool {
        self.inner.listeners.unregister(subscription)
    }

    pub fn listener_count(&self, scope: impl Into<ListenerScope>) -> usize {
        self.inner.listeners.count(scope.into())
    }

    pub fn on_status_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.inner.status_listeners.register(Arc::new(listener))
    }

    pub fn remove_status_listener(&self, id: &ListenerId) -> bool {
        self.inner.status_listeners.unregister(id)
    }
}

impl Inner {
    fn lock_runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect_request(&self) -> ConnectRequest {
        let mut url = self.endpoint.clone();
        if let Some(token) = self.config.tokens.as_ref().and_then(TokenStore::get) {
            url.query_pairs_mut().append_pair("token", &token);
        }

        ConnectRequest {
            url: url.to_string(),
            headers: self.config.headers.clone(),
        }
    }

    /// Replaces any reader with a fresh connection attempt. The new state is
    /// queued for status listeners; the caller flushes once the lock is released.
    fn open(inner: &Arc<Inner>, runtime: &mut Runtime) {
        runtime.generation += 1;
        if let Some(reader) = runtime.reader.take() {
            reader.abort();
        }

        runtime.state.status = ConnectionStatus::Connecting;
        info!("Connecting to event stream {}", inner.config.endpoint);

        let frames = inner.transport.open(inner.connect_request());
        runtime.reader = Some(tokio::spawn(read_frames(
            Arc::downgrade(inner),
            runtime.generation,
            frames,
        )));

        inner.status_listeners.enqueue(runtime.state.clone());
    }

    fn on_open(&self, generation: u64) {
        {
            let mut runtime = self.lock_runtime();
            if runtime.generation != generation {
                return;
            }
            if let Some(timer) = runtime.reconnect_timer.take() {
                timer.abort();
            }

            runtime.state = ConnectionState {
                status: ConnectionStatus::Connected,
                last_connected: Some(Utc::now()),
                reconnect_attempts: 0,
                error: None,
            };
            self.status_listeners.enqueue(runtime.state.clone());
        }

        info!("Event stream connected");
        self.status_listeners.flush();
    }

    /// Decodes and dispatches one event. The generation is checked after
    /// decoding; an event already being dispatched when `disconnect` runs can
    /// still reach listeners.
    fn on_event(&self, generation: u64, id: Option<String>, event: &str, data: &str) {
        let envelope = match EventEnvelope::decode(id, event, data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Failed to parse SSE message: {e}");
                return;
            }
        };

        if self.lock_runtime().generation != generation {
            debug!("Dropping {} event from a closed connection", envelope.kind());
            return;
        }

        debug!("Received {} event", envelope.kind());
        self.listeners.dispatch(&envelope);
    }

    fn on_failure(inner: &Arc<Inner>, generation: u64, message: String) {
        {
            let mut runtime = inner.lock_runtime();
            if runtime.generation != generation {
                return;
            }
            // The finished reader is the caller; dropping its handle detaches it.
            runtime.reader = None;

            warn!("Event stream error: {message}");
            runtime.state.status = ConnectionStatus::Error;
            runtime.state.error = Some(message);
            inner.status_listeners.enqueue(runtime.state.clone());

            if runtime.state.reconnect_attempts < inner.config.max_reconnect_attempts {
                Inner::schedule_reconnect(inner, &mut runtime);
                inner.status_listeners.enqueue(runtime.state.clone());
            } else {
                error!(
                    "Event stream gave up after {} reconnect attempts",
                    runtime.state.reconnect_attempts
                );
            }
        }

        inner.status_listeners.flush();
    }

    fn schedule_reconnect(inner: &Arc<Inner>, runtime: &mut Runtime) {
        if let Some(timer) = runtime.reconnect_timer.take() {
            timer.abort();
        }
        runtime.state.status = ConnectionStatus::Reconnecting;

        let weak = Arc::downgrade(inner);
        let interval = inner.config.reconnect_interval;
        let generation = runtime.generation;
        debug!("Reconnecting in {interval:?}");

        runtime.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(inner) = weak.upgrade() {
                Inner::reconnect(&inner, generation);
            }
        }));
    }

    fn reconnect(inner: &Arc<Inner>, generation: u64) {
        {
            let mut runtime = inner.lock_runtime();
            if runtime.generation != generation
                || runtime.state.status != ConnectionStatus::Reconnecting
            {
                return;
            }
            // The firing timer is the caller.
            runtime.reconnect_timer = None;
            runtime.state.reconnect_attempts += 1;
            info!(
                "Reconnect attempt {}/{}",
                runtime.state.reconnect_attempts, inner.config.max_reconnect_attempts
            );

            Inner::open(inner, &mut runtime);
        }

        inner.status_listeners.flush();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = runtime.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(reader) = runtime.reader.take() {
            reader.abort();
        }
    }
}

/// Reader task for one connection attempt. Holds only a weak reference so that
/// dropping every client handle ends it.
async fn read_frames(weak: Weak<Inner>, generation: u64, mut frames: FrameStream) {
    let mut opened = false;

    let failure = loop {
        let Some(frame) = frames.next().await else {
            break CLOSED_BY_SERVER.to_string();
        };
        let Some(inner) = weak.upgrade() else {
            return;
        };

        match frame {
            Ok(frame) => {
                // Any frame proves the connection is up, even without an explicit open.
                if !opened {
                    opened = true;
                    inner.on_open(generation);
                }
                match frame {
                    Frame::Open => {}
                    Frame::Comment => trace!("Event stream keep-alive"),
                    Frame::Event { id, event, data } => {
                        inner.on_event(generation, id, &event, &data)
                    }
                }
            }
            Err(message) => break message,
        }
    };

    if let Some(inner) = weak.upgrade() {
        Inner::on_failure(&inner, generation, failure);
    }
}
