//! Live translation updates over one shared push connection.
//!
//! A [`LiveUpdateHub`] keeps a single connection to the route layer for any
//! number of subscribers. The connection task starts with the first
//! subscriber and is cancelled when the last [`Subscription`] is dropped.
//! Connection failures drive a reconnect loop; they never reach subscribers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sop_common::Locale;
use sop_config::RealtimeSettings;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{I18nError, I18nResult};

/// Buffer size of transport channels
pub const CHANNEL_CAPACITY: usize = 64;

/// What changed on the route layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// Existing translations were edited
    TranslationUpdated,
    /// New keys were added
    KeyCreated,
    /// Many keys changed at once (imports, machine translation)
    BulkUpdate,
}

/// Change notification pushed by the route layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationUpdateEvent {
    /// Kind of change
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    /// Locale the change applies to
    pub locale: Locale,
    /// Changed keys; empty means the whole locale
    #[serde(default)]
    pub keys: Vec<String>,
    /// When the change happened
    pub timestamp: DateTime<Utc>,
    /// Editor who made the change
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

impl TranslationUpdateEvent {
    /// Build an event stamped with the current time
    pub fn new<I, S>(kind: UpdateKind, locale: Locale, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            locale,
            keys: keys.into_iter().map(Into::into).collect(),
            timestamp: Utc::now(),
            user_id: None,
        }
    }

    /// Parse a raw payload from the push channel
    pub fn parse(raw: &str) -> I18nResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// State of the shared push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No connection; a reconnect may be pending
    #[default]
    Disconnected,
    /// Connection attempt in flight
    Connecting,
    /// Receiving events
    Connected,
}

impl ConnectionStatus {
    /// Whether events are currently flowing
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Opens the physical push connection.
///
/// Each successful `connect` yields a receiver of raw payloads; the
/// connection is considered lost when the receiver closes.
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    /// Open a new connection
    async fn connect(&self) -> I18nResult<mpsc::Receiver<String>>;
}

/// In-process transport; whatever is published reaches every open connection.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    senders: Mutex<Vec<mpsc::Sender<String>>>,
    connects: AtomicUsize,
    failures: AtomicUsize,
}

impl ChannelTransport {
    /// Create a transport with no open connections
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a raw payload; returns the number of connections reached
    pub fn publish(&self, raw: impl Into<String>) -> usize {
        let raw = raw.into();
        let mut senders = self.senders.lock();
        senders.retain(|tx| !tx.is_closed());
        senders
            .iter()
            .filter(|tx| tx.try_send(raw.clone()).is_ok())
            .count()
    }

    /// Serialize and deliver an event
    pub fn publish_event(&self, event: &TranslationUpdateEvent) -> I18nResult<usize> {
        Ok(self.publish(serde_json::to_string(event)?))
    }

    /// Close every open connection, as a dropped network link would
    pub fn disconnect_all(&self) {
        self.senders.lock().clear();
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_connects(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of connection attempts so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connections whose receiver is still alive
    pub fn open_connections(&self) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }
}

#[async_trait]
impl UpdateTransport for ChannelTransport {
    async fn connect(&self) -> I18nResult<mpsc::Receiver<String>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(I18nError::transport("connection refused"));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.senders.lock().push(tx);
        Ok(rx)
    }
}

/// Smallest delay between reconnect attempts, whatever the policy says
pub const RECONNECT_FLOOR: Duration = Duration::from_millis(100);

/// Delay between reconnect attempts.
///
/// Grows exponentially from `min_delay` up to `max_delay`, and never drops
/// below `min_delay` or [`RECONNECT_FLOOR`]. Resets after every successful
/// connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// First and smallest delay
    pub min_delay: Duration,
    /// Largest delay
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Sequence of delays for consecutive failed attempts
    pub fn delays(&self) -> impl Iterator<Item = Duration> + Send + 'static {
        let min_delay = self.min_delay.max(RECONNECT_FLOOR);
        let max_delay = self.max_delay.max(min_delay);
        let factor = u64::try_from(min_delay.as_millis() / 2).unwrap_or(u64::MAX).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(max_delay)
            .map(move |delay| delay.clamp(min_delay, max_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<&RealtimeSettings> for ReconnectPolicy {
    fn from(settings: &RealtimeSettings) -> Self {
        Self {
            min_delay: settings.min_reconnect_delay(),
            max_delay: settings.max_reconnect_delay(),
        }
    }
}

/// Callback invoked for each parsed event
pub type UpdateCallback = Arc<dyn Fn(&TranslationUpdateEvent) + Send + Sync>;

struct Connection {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<u64, UpdateCallback>,
    connection: Option<Connection>,
}

struct HubInner {
    transport: Arc<dyn UpdateTransport>,
    policy: ReconnectPolicy,
    state: Mutex<HubState>,
    next_id: AtomicU64,
    status: watch::Sender<ConnectionStatus>,
}

impl HubInner {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    /// Status write from a connection task; a cancelled task no longer owns
    /// the status, which `stop` and any newer task write instead.
    fn report(&self, cancel: &CancellationToken, status: ConnectionStatus) {
        let _state = self.state.lock();
        if !cancel.is_cancelled() {
            self.set_status(status);
        }
    }

    fn dispatch(&self, raw: &str) {
        let event = match TranslationUpdateEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                debug!("Discarding malformed update payload: {}", e);
                return;
            }
        };

        debug!(
            "Update {:?} for {} ({} keys)",
            event.kind,
            event.locale,
            event.keys.len()
        );
        // Callbacks run outside the lock; they may drop subscriptions.
        let callbacks: Vec<UpdateCallback> =
            self.state.lock().subscribers.values().cloned().collect();
        for callback in callbacks {
            callback(&event);
        }
    }

    fn stop(&self, state: &mut HubState) {
        if let Some(connection) = state.connection.take() {
            connection.cancel.cancel();
            connection.task.abort();
            info!("Closed live update connection");
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock();
        if state.subscribers.remove(&id).is_some() {
            debug!("Removed live update subscriber {}", id);
        }
        if state.subscribers.is_empty() {
            self.stop(&mut state);
        }
    }
}

async fn run_connection(inner: Arc<HubInner>, cancel: CancellationToken) {
    let mut delays = inner.policy.delays();

    'connection: loop {
        inner.report(&cancel, ConnectionStatus::Connecting);
        let connected = tokio::select! {
            () = cancel.cancelled() => break 'connection,
            result = inner.transport.connect() => result,
        };

        match connected {
            Ok(mut rx) => {
                inner.report(&cancel, ConnectionStatus::Connected);
                info!("Live update connection established");
                delays = inner.policy.delays();

                loop {
                    let raw = tokio::select! {
                        () = cancel.cancelled() => break 'connection,
                        raw = rx.recv() => raw,
                    };
                    match raw {
                        Some(raw) => inner.dispatch(&raw),
                        None => {
                            warn!("Live update connection closed by peer");
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("Live update connection failed: {}", e),
        }

        inner.report(&cancel, ConnectionStatus::Disconnected);
        let delay = delays.next().unwrap_or(RECONNECT_FLOOR);
        debug!("Reconnecting in {:?}", delay);
        tokio::select! {
            () = cancel.cancelled() => break 'connection,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// One shared push connection fanned out to N subscribers.
#[derive(Clone)]
pub struct LiveUpdateHub {
    inner: Arc<HubInner>,
}

impl LiveUpdateHub {
    /// Create an idle hub; nothing connects until the first subscription
    pub fn new(transport: Arc<dyn UpdateTransport>, policy: ReconnectPolicy) -> Self {
        let (status, _rx) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(HubInner {
                transport,
                policy,
                state: Mutex::new(HubState::default()),
                next_id: AtomicU64::new(1),
                status,
            }),
        }
    }

    /// Register `callback`; the returned handle unsubscribes on drop.
    ///
    /// Must be called within a tokio runtime for the connection to start.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TranslationUpdateEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.inner.state.lock();
        state.subscribers.insert(id, Arc::new(callback));
        debug!("Added live update subscriber {}", id);

        if state.connection.is_none() {
            match Handle::try_current() {
                Ok(handle) => {
                    let cancel = CancellationToken::new();
                    let task =
                        handle.spawn(run_connection(Arc::clone(&self.inner), cancel.clone()));
                    state.connection = Some(Connection { cancel, task });
                    info!("Started live update connection");
                }
                Err(_) => warn!("No tokio runtime; live updates stay disconnected"),
            }
        }

        Subscription {
            id,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Current connection state
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }

    /// Whether the connection task is running
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().connection.is_some()
    }

    /// Drop every subscriber and close the connection
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.subscribers.clear();
        self.inner.stop(&mut state);
    }
}

impl fmt::Debug for LiveUpdateHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveUpdateHub")
            .field("status", &self.status())
            .field("policy", &self.inner.policy)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Handle of one logical subscriber; dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    hub: Weak<HubInner>,
}

impl Subscription {
    /// Registry id of this subscriber
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}
