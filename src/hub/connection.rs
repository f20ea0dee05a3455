// src/hub/connection.rs
//! Connection manager: one logical hub connection, shared by handle.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::transport::{HubCommand, HubLink, HubTransport, TransportEvent};
use crate::app_log;
use crate::auth::AuthProvider;
use crate::error::{RealtimeError, RealtimeResult};
use crate::router::EventRoute;

pub const DEFAULT_JOIN_GROUP_METHOD: &str = "JoinGroup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Backoff for the initial handshake only
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Wait after the given failed attempt (1-based): base, 2x base, 4x base...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub url: String,
    pub retry: RetryPolicy,
    pub join_group_method: String,
}

impl HubConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry: RetryPolicy::default(),
            join_group_method: DEFAULT_JOIN_GROUP_METHOD.to_string(),
        }
    }
}

pub type SubscriptionId = u64;

/// A server event as delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct HubEvent {
    pub name: String,
    pub arguments: Vec<Value>,
    pub route: EventRoute,
}

/// Receiving end of `on` / `on_any`
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<HubEvent>,
}

enum Filter {
    Named(String),
    Any,
}

#[derive(Default)]
struct Handlers {
    next_id: SubscriptionId,
    entries: HashMap<SubscriptionId, (Filter, mpsc::UnboundedSender<HubEvent>)>,
}

type ConnectAttempt = Shared<BoxFuture<'static, RealtimeResult<()>>>;

struct Inner {
    config: HubConfig,
    transport: Arc<dyn HubTransport>,
    auth: Arc<dyn AuthProvider>,
    state: RwLock<ConnectionState>,
    connection_id: RwLock<Option<String>>,
    joined_groups: RwLock<BTreeSet<String>>,
    commands: Mutex<Option<mpsc::Sender<HubCommand>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Running connect attempt, tagged with its sequence number
    in_flight: Mutex<Option<(u64, ConnectAttempt)>>,
    attempt_seq: AtomicU64,
    handlers: std::sync::Mutex<Handlers>,
    /// Bumped on every install and teardown; pumps of older links go quiet
    generation: AtomicU64,
}

/// Handle to the process' hub connection.
///
/// Clones share the same connection; construct one and pass it around
/// instead of reaching for a global.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        config: HubConfig,
        transport: Arc<dyn HubTransport>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                auth,
                state: RwLock::new(ConnectionState::Disconnected),
                connection_id: RwLock::new(None),
                joined_groups: RwLock::new(BTreeSet::new()),
                commands: Mutex::new(None),
                pump: Mutex::new(None),
                in_flight: Mutex::new(None),
                attempt_seq: AtomicU64::new(0),
                handlers: std::sync::Mutex::new(Handlers::default()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    pub async fn connection_id(&self) -> Option<String> {
        self.inner.connection_id.read().await.clone()
    }

    pub async fn joined_groups(&self) -> Vec<String> {
        self.inner.joined_groups.read().await.iter().cloned().collect()
    }

    /// Connect, or wait for the attempt already running.
    ///
    /// Concurrent callers share one handshake and all see its outcome.
    pub async fn connect(&self) -> RealtimeResult<()> {
        match self.inner.begin_attempt().await {
            Some(attempt) => attempt.await,
            None => Ok(()),
        }
    }

    /// Tear down the connection and forget joined groups; no-op when idle
    pub async fn disconnect(&self) {
        if self.state().await == ConnectionState::Disconnected
            && self.inner.commands.lock().await.is_none()
        {
            self.inner.joined_groups.write().await.clear();
            return;
        }
        self.inner.teardown(true).await;
        *self.inner.in_flight.lock().await = None;
        app_log!(info, "Disconnected from hub");
    }

    /// Call a hub method and wait for its completion
    pub async fn invoke(&self, method: &str, arguments: Vec<Value>) -> RealtimeResult<Value> {
        self.inner.invoke(method, arguments).await
    }

    /// Join the per-user group.
    ///
    /// Returns `Ok(false)` without calling the hub when the connection is not
    /// ready. Joined groups are re-joined automatically after a reconnect.
    pub async fn join_group(&self, user_id: &str) -> RealtimeResult<bool> {
        let state = self.state().await;
        if state != ConnectionState::Connected {
            app_log!(warn, "Cannot join group {} while {:?}", user_id, state);
            return Ok(false);
        }

        self.inner
            .invoke(&self.inner.config.join_group_method, vec![json!(user_id)])
            .await?;
        self.inner
            .joined_groups
            .write()
            .await
            .insert(user_id.to_string());
        app_log!(info, "Joined group {}", user_id);
        Ok(true)
    }

    /// Subscribe to one server event name (case-insensitive)
    pub fn on(&self, event_name: &str) -> Subscription {
        self.inner.subscribe(Filter::Named(event_name.to_string()))
    }

    /// Subscribe to every server event; deliveries are tagged `EventRoute::Fallback`
    pub fn on_any(&self) -> Subscription {
        self.inner.subscribe(Filter::Any)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .remove(&id)
            .is_some()
    }
}

impl Inner {
    async fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write().await;
        if *current != state {
            app_log!(debug, "Hub connection {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Current attempt, a new one, or `None` when already connected.
    ///
    /// The attempt clears its own guard when it resolves, so a caller that
    /// stops awaiting it cannot leave a finished attempt behind.
    async fn begin_attempt(self: &Arc<Self>) -> Option<ConnectAttempt> {
        let mut in_flight = self.in_flight.lock().await;
        if let Some((_, existing)) = in_flight.as_ref() {
            app_log!(debug, "Joining connection attempt already in flight");
            return Some(existing.clone());
        }
        if *self.state.read().await == ConnectionState::Connected {
            return None;
        }

        let seq = self.attempt_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(self);
        let attempt = async move {
            let result = Arc::clone(&inner).establish().await;
            inner.finish_attempt(seq).await;
            result
        }
        .boxed()
        .shared();
        *in_flight = Some((seq, attempt.clone()));
        Some(attempt)
    }

    async fn finish_attempt(&self, seq: u64) {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.as_ref().is_some_and(|(current, _)| *current == seq) {
            *in_flight = None;
        }
    }

    async fn establish(self: Arc<Self>) -> RealtimeResult<()> {
        let state = *self.state.read().await;
        match state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                app_log!(warn, "Replacing connection stuck in {:?}", state);
                self.teardown(false).await;
            }
            ConnectionState::Disconnected => {}
        }

        let token = self.auth.stored_token().ok_or_else(|| {
            RealtimeError::Authentication("no stored bearer token".to_string())
        })?;

        self.set_state(ConnectionState::Connecting).await;
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            app_log!(info, attempt, url = %self.config.url, "Connecting to hub");
            match self.transport.open(&self.config.url, &token).await {
                Ok(link) => {
                    self.install(link).await;
                    self.spawn_rejoin().await;
                    return Ok(());
                }
                Err(RealtimeError::Authentication(reason)) => {
                    self.set_state(ConnectionState::Disconnected).await;
                    return Err(RealtimeError::Authentication(reason));
                }
                Err(e) => {
                    app_log!(warn, attempt, "Hub handshake failed: {}", e);
                    last_error = e.to_string();
                    tokio::time::sleep(self.config.retry.delay_after(attempt)).await;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
        app_log!(error, "Giving up on hub after {} attempt(s)", max_attempts);
        Err(RealtimeError::Connection {
            attempts: max_attempts,
            reason: last_error,
        })
    }

    async fn install(self: &Arc<Self>, link: HubLink) {
        let HubLink {
            connection_id,
            commands,
            events,
        } = link;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.commands.lock().await = Some(commands);
        *self.connection_id.write().await = connection_id.clone();
        self.set_state(ConnectionState::Connected).await;

        let pump = tokio::spawn(pump_events(Arc::downgrade(self), generation, events));
        if let Some(previous) = self.pump.lock().await.replace(pump) {
            previous.abort();
        }
        app_log!(info, connection_id = ?connection_id, "Connected to hub");
    }

    async fn teardown(&self, clear_groups: bool) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(commands) = self.commands.lock().await.take() {
            let _ = commands.try_send(HubCommand::Close);
        }
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        *self.connection_id.write().await = None;
        self.set_state(ConnectionState::Disconnected).await;
        if clear_groups {
            self.joined_groups.write().await.clear();
        }
    }

    /// Forget a link the transport has closed, unless a newer one replaced it
    async fn drop_link(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.commands.lock().await.take();
        *self.connection_id.write().await = None;
        self.set_state(ConnectionState::Disconnected).await;
    }

    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> RealtimeResult<Value> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(RealtimeError::NotConnected);
        }
        let sender = self
            .commands
            .lock()
            .await
            .clone()
            .ok_or(RealtimeError::NotConnected)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(HubCommand::Invoke {
                method: method.to_string(),
                arguments,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RealtimeError::NotConnected)?;

        reply_rx.await.map_err(|_| RealtimeError::NotConnected)?
    }

    /// Re-join the groups known right now, off the caller's task
    async fn spawn_rejoin(self: &Arc<Self>) {
        let groups: Vec<String> = self.joined_groups.read().await.iter().cloned().collect();
        if groups.is_empty() {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.rejoin_groups(groups).await });
    }

    async fn rejoin_groups(&self, groups: Vec<String>) {
        for group in groups {
            match self
                .invoke(&self.config.join_group_method, vec![json!(group)])
                .await
            {
                Ok(_) => app_log!(info, "Re-joined group {}", group),
                Err(e) => app_log!(warn, "Failed to re-join group {}: {}", group, e),
            }
        }
    }

    fn subscribe(&self, filter: Filter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        handlers.next_id += 1;
        let id = handlers.next_id;
        handlers.entries.insert(id, (filter, tx));
        Subscription { id, events: rx }
    }

    fn dispatch(&self, name: &str, arguments: Vec<Value>) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = false;
        handlers.entries.retain(|_, (filter, tx)| {
            let route = match filter {
                Filter::Named(wanted) if wanted.eq_ignore_ascii_case(name) => EventRoute::Named,
                Filter::Named(_) => return true,
                Filter::Any => EventRoute::Fallback,
            };
            delivered = true;
            tx.send(HubEvent {
                name: name.to_string(),
                arguments: arguments.clone(),
                route,
            })
            .is_ok()
        });
        if !delivered {
            app_log!(trace, "No subscriber for hub event {}", name);
        }
    }
}

async fn pump_events(
    weak: Weak<Inner>,
    generation: u64,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        match event {
            TransportEvent::Invocation { target, arguments } => inner.dispatch(&target, arguments),
            TransportEvent::Reconnecting(reason) => {
                app_log!(warn, "Hub connection interrupted: {:?}", reason);
                inner.set_state(ConnectionState::Reconnecting).await;
            }
            TransportEvent::Reconnected { connection_id } => {
                *inner.connection_id.write().await = connection_id;
                inner.set_state(ConnectionState::Connected).await;
                inner.spawn_rejoin().await;
            }
            TransportEvent::Closed(reason) => {
                app_log!(warn, "Hub connection closed: {:?}", reason);
                inner.drop_link(generation).await;
                return;
            }
        }
    }

    if let Some(inner) = weak.upgrade() {
        inner.drop_link(generation).await;
    }
}
