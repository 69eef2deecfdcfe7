//! Main Kodi client implementation
//!
//! [`KodiClient`] owns one transport and drives it through
//! `Disconnected -> Connecting -> Connected -> Closing -> Disconnected`.
//! While connected, a reader task classifies every inbound payload: responses
//! settle entries in the [`CorrelationTable`], notifications are queued to a
//! dispatch task that fans them out through the [`NotificationRouter`].

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, error, info, warn};

use kodi_json_rpc::{InboundMessage, JsonRpcNotification, decode, encode_request};

use crate::config::{ClientConfig, KodiEndpoint};
use crate::correlation::{CorrelationTable, DrainReason};
use crate::error::{KodiClientError, KodiClientResult, TransportError};
use crate::router::{NotificationRouter, Subscription};
use crate::transport::{
    BoxedTransport, InboundReceiver, Transport, TransportEvent, TransportFactory,
    TransportStatistics, TransportType,
};

/// Method Kodi answers with `"pong"`
pub const PING_METHOD: &str = "JSONRPC.Ping";

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closing => write!(f, "closing"),
        }
    }
}

/// Counters kept by the reader task
#[derive(Debug, Clone, Default)]
struct ClientCounters {
    calls_started: u64,
    responses_received: u64,
    unmatched_responses: u64,
    notifications_received: u64,
    malformed_messages: u64,
    disconnects: u64,
    reconnects: u64,
}

/// Client-level statistics
#[derive(Debug, Clone, Default)]
pub struct ClientStatistics {
    pub transport: TransportStatistics,
    pub calls_started: u64,
    pub responses_received: u64,
    pub unmatched_responses: u64,
    pub notifications_received: u64,
    pub malformed_messages: u64,
    pub disconnects: u64,
    pub reconnects: u64,
    pub outstanding_calls: usize,
}

/// Main Kodi client
///
/// Cloning is cheap; clones share the connection, the pending calls and the
/// listeners.
#[derive(Clone)]
pub struct KodiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Transport layer
    transport: Arc<dyn Transport>,
    /// Endpoint the transport was built from, if any
    endpoint: Option<KodiEndpoint>,
    /// Configuration
    config: ClientConfig,
    state: parking_lot::RwLock<ConnectionState>,
    table: CorrelationTable,
    router: Arc<NotificationRouter>,
    /// Serializes connect, close and disconnect handling
    lifecycle: tokio::sync::Mutex<()>,
    /// Bumped on every connect, disconnect and close; stale events carry an old value
    epoch: AtomicU64,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    reconnect: parking_lot::Mutex<Option<JoinHandle<()>>>,
    counters: Arc<parking_lot::Mutex<ClientCounters>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(reconnect) = self.reconnect.get_mut().take() {
            reconnect.abort();
        }
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
        let drained = self.table.drain_all(DrainReason::Closed);
        if drained > 0 {
            debug!(count = drained, "KodiClient dropped with calls in flight");
        }
    }
}

impl KodiClient {
    /// Create a new client with the given transport
    pub fn new(transport: BoxedTransport, config: ClientConfig) -> Self {
        Self::with_parts(Arc::from(transport), None, config)
    }

    /// Create a client for an endpoint, choosing WebSocket when a WebSocket
    /// port is configured and HTTP otherwise
    pub fn from_endpoint(endpoint: KodiEndpoint, config: ClientConfig) -> KodiClientResult<Self> {
        let transport = TransportFactory::from_endpoint(&endpoint, &config.connection)?;
        Ok(Self::with_parts(Arc::from(transport), Some(endpoint), config))
    }

    fn with_parts(
        transport: Arc<dyn Transport>,
        endpoint: Option<KodiEndpoint>,
        config: ClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                endpoint,
                config,
                state: parking_lot::RwLock::new(ConnectionState::Disconnected),
                table: CorrelationTable::new(),
                router: Arc::new(NotificationRouter::new()),
                lifecycle: tokio::sync::Mutex::new(()),
                epoch: AtomicU64::new(0),
                reader: parking_lot::Mutex::new(None),
                reconnect: parking_lot::Mutex::new(None),
                counters: Arc::new(parking_lot::Mutex::new(ClientCounters::default())),
            }),
        }
    }

    /// Open the transport. Does nothing when already connected.
    pub async fn connect(&self) -> KodiClientResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.connect_locked().await
    }

    /// Close the connection and fail every outstanding call with
    /// [`KodiClientError::ConnectionClosed`]. Safe to call repeatedly; a
    /// later [`connect`](Self::connect) starts over.
    pub async fn close(&self) {
        if let Some(reconnect) = self.inner.reconnect.lock().take() {
            reconnect.abort();
        }

        let _lifecycle = self.inner.lifecycle.lock().await;
        let previous = self.inner.state();
        self.inner.set_state(ConnectionState::Closing);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        // A disconnect handled while we waited for the lock may have scheduled one
        if let Some(reconnect) = self.inner.reconnect.lock().take() {
            reconnect.abort();
        }

        if let Some(reader) = self.inner.reader.lock().take() {
            reader.abort();
        }
        self.inner.transport.close().await;

        let drained = self.inner.table.drain_all(DrainReason::Closed);
        self.inner.set_state(ConnectionState::Disconnected);

        if previous != ConnectionState::Disconnected {
            info!(
                endpoint = %self.inner.transport.endpoint(),
                drained = drained,
                "Kodi connection closed"
            );
        }
    }

    /// Call a remote method with the default request timeout
    pub async fn call(&self, method: &str, params: Value) -> KodiClientResult<Value> {
        self.call_with_timeout(method, params, self.inner.config.timeouts.request)
            .await
    }

    /// Call a remote method; `call_timeout` covers both sending and waiting
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        call_timeout: Duration,
    ) -> KodiClientResult<Value> {
        let deadline = Instant::now() + call_timeout;

        if !self.is_connected() {
            if self.inner.transport.capabilities().persistent {
                return Err(KodiClientError::NotConnected);
            }
            // Single-shot transports open on demand
            self.connect().await?;
        }

        let pending = self.inner.table.register(method)?;
        let payload = encode_request(pending.id(), method, params)?;
        self.inner.counters.lock().calls_started += 1;

        debug!(id = pending.id(), method = method, "Sending call");

        match timeout_at(deadline, self.inner.transport.send(payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(id = pending.id(), method = method, error = %e, "Failed to send call");
                return Err(KodiClientError::send_failed(e));
            }
            // Deadline hit while sending; waiting below expires the call at once
            Err(_) => {}
        }

        pending.wait_until(deadline).await
    }

    /// Register a listener for a notification method (exact match)
    pub fn on<F>(&self, method: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let method = method.into();
        if !self.can_subscribe() {
            warn!(
                method = %method,
                transport = %self.inner.transport.transport_type(),
                "Listener registered on a transport without server notifications"
            );
        }
        self.inner.router.register(method, handler)
    }

    /// Remove a listener
    pub fn off(&self, subscription: &Subscription) -> bool {
        self.inner.router.unregister(subscription)
    }

    /// Check the server answers `JSONRPC.Ping` with `"pong"`
    pub async fn ping(&self) -> KodiClientResult<bool> {
        debug!("Sending ping");

        match self.call(PING_METHOD, Value::Null).await {
            Ok(result) => Ok(result.as_str() == Some("pong")),
            Err(KodiClientError::Transport(e)) => Err(KodiClientError::Connection(e)),
            Err(e) => Err(e),
        }
    }

    /// HTTP URL of an `image://` thumbnail
    pub fn thumbnail_url(&self, thumbnail: &str) -> Option<String> {
        self.inner.endpoint.as_ref()?.thumbnail_url(thumbnail)
    }

    /// Whether the server can push notifications to this client
    pub fn can_subscribe(&self) -> bool {
        self.inner.transport.capabilities().server_events
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Endpoint the client was created for, if it was created from one
    pub fn endpoint(&self) -> Option<&KodiEndpoint> {
        self.inner.endpoint.as_ref()
    }

    /// Get client connection status
    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state(),
            transport_type: self.inner.transport.transport_type(),
            endpoint: self.inner.transport.endpoint(),
            can_subscribe: self.can_subscribe(),
            outstanding_calls: self.inner.table.len(),
            listened_methods: self.inner.router.methods(),
        }
    }

    /// Get client and transport statistics
    pub fn statistics(&self) -> ClientStatistics {
        let counters = self.inner.counters.lock().clone();
        ClientStatistics {
            transport: self.inner.transport.statistics(),
            calls_started: counters.calls_started,
            responses_received: counters.responses_received,
            unmatched_responses: counters.unmatched_responses,
            notifications_received: counters.notifications_received,
            malformed_messages: counters.malformed_messages,
            disconnects: counters.disconnects,
            reconnects: counters.reconnects,
            outstanding_calls: self.inner.table.len(),
        }
    }
}

impl ClientInner {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Open the transport; caller holds the lifecycle lock
    async fn connect_locked(self: &Arc<Self>) -> KodiClientResult<()> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        info!(endpoint = %self.transport.endpoint(), transport = %self.transport.transport_type(), "Connecting to Kodi");

        let inbound = match timeout(self.config.timeouts.connect, self.transport.open()).await {
            Ok(Ok(inbound)) => inbound,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(endpoint = %self.transport.endpoint(), error = %e, "Connection failed");
                return Err(KodiClientError::connection(e));
            }
            Err(_) => {
                self.transport.close().await;
                self.set_state(ConnectionState::Disconnected);
                let error = TransportError::ConnectionFailed(format!(
                    "Timed out after {}ms",
                    self.config.timeouts.connect.as_millis()
                ));
                warn!(endpoint = %self.transport.endpoint(), error = %error, "Connection failed");
                return Err(KodiClientError::Connection(error));
            }
        };

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.table.reopen();
        self.spawn_reader(epoch, inbound);
        self.set_state(ConnectionState::Connected);

        info!(endpoint = %self.transport.endpoint(), epoch = epoch, "Connected to Kodi");
        Ok(())
    }

    fn spawn_reader(self: &Arc<Self>, epoch: u64, inbound: InboundReceiver) {
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<JsonRpcNotification>();

        // Listeners run here, off the reader, so a slow handler never delays responses
        let router = self.router.clone();
        tokio::spawn(async move {
            while let Some(notification) = notify_rx.recv().await {
                let report = router.dispatch(&notification);
                if report.failed > 0 {
                    debug!(
                        method = %notification.method,
                        delivered = report.delivered,
                        failed = report.failed,
                        "Notification dispatched with failures"
                    );
                }
            }
        });

        let context = ReaderContext {
            client: Arc::downgrade(self),
            table: self.table.clone(),
            notifications: notify_tx,
            counters: self.counters.clone(),
            epoch,
        };

        let reader = tokio::spawn(context.run(inbound));
        if let Some(previous) = self.reader.lock().replace(reader) {
            previous.abort();
        }
    }

    /// React to the transport going away underneath an established connection
    async fn handle_disconnect(self: &Arc<Self>, epoch: u64, reason: String) {
        let _lifecycle = self.lifecycle.lock().await;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(epoch = epoch, reason = %reason, "Ignoring disconnect from a stale connection");
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);

        self.set_state(ConnectionState::Disconnected);
        self.transport.close().await;
        self.counters.lock().disconnects += 1;

        let drained = self
            .table
            .drain_all(DrainReason::ConnectionLost(reason.clone()));
        warn!(
            endpoint = %self.transport.endpoint(),
            reason = %reason,
            drained = drained,
            "Lost connection to Kodi"
        );

        if self.config.reconnect.enabled {
            self.spawn_reconnect();
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        let client = Arc::downgrade(self);
        let policy = self.config.reconnect.clone();
        let scheduled_epoch = self.epoch.load(Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                debug!(attempt = attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                tokio::time::sleep(delay).await;

                let Some(inner) = client.upgrade() else {
                    return;
                };

                let result = {
                    let _lifecycle = inner.lifecycle.lock().await;
                    if inner.epoch.load(Ordering::SeqCst) != scheduled_epoch {
                        debug!(attempt = attempt, "Connection changed since reconnect was scheduled");
                        return;
                    }
                    inner.connect_locked().await
                };

                match result {
                    Ok(()) => {
                        inner.counters.lock().reconnects += 1;
                        info!(attempt = attempt, "Reconnected to Kodi");
                        return;
                    }
                    Err(e) => {
                        warn!(attempt = attempt, error = %e, "Reconnect attempt failed");
                        if !policy.should_retry(attempt) {
                            error!(attempts = attempt, "Giving up reconnecting to Kodi");
                            return;
                        }
                    }
                }
            }
        });

        if let Some(previous) = self.reconnect.lock().replace(handle) {
            previous.abort();
        }
    }
}

/// Everything the reader task needs, without keeping the client alive
struct ReaderContext {
    client: Weak<ClientInner>,
    table: CorrelationTable,
    notifications: mpsc::UnboundedSender<JsonRpcNotification>,
    counters: Arc<parking_lot::Mutex<ClientCounters>>,
    epoch: u64,
}

impl ReaderContext {
    async fn run(self, mut inbound: InboundReceiver) {
        let reason = loop {
            match inbound.recv().await {
                Some(TransportEvent::Message(payload)) => self.handle_payload(&payload),
                Some(TransportEvent::ConnectionLost(reason)) => break reason,
                None => break "inbound channel closed".to_string(),
            }
        };

        if let Some(client) = self.client.upgrade() {
            client.handle_disconnect(self.epoch, reason).await;
        }
    }

    fn handle_payload(&self, payload: &[u8]) {
        match decode(payload) {
            InboundMessage::Response(response) => {
                self.counters.lock().responses_received += 1;
                if let Err(unmatched) = self.table.resolve(response) {
                    self.counters.lock().unmatched_responses += 1;
                    debug!(id = %unmatched.id, "Dropping response for unknown call");
                }
            }
            InboundMessage::Notification(notification) => {
                self.counters.lock().notifications_received += 1;
                debug!(method = %notification.method, "Notification received");
                if self.notifications.send(notification).is_err() {
                    debug!("Notification dispatcher stopped");
                }
            }
            InboundMessage::Malformed(e) => {
                self.counters.lock().malformed_messages += 1;
                warn!(
                    error = %e,
                    payload = %String::from_utf8_lossy(&payload[..payload.len().min(256)]),
                    "Dropping malformed message"
                );
            }
        }
    }
}

/// Connection status information
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub transport_type: TransportType,
    pub endpoint: String,
    pub can_subscribe: bool,
    pub outstanding_calls: usize,
    pub listened_methods: Vec<String>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Get status summary
    pub fn summary(&self) -> String {
        format!(
            "{} transport to {} - {} ({} calls in flight, {} notification methods)",
            self.transport_type,
            self.endpoint,
            self.state,
            self.outstanding_calls,
            self.listened_methods.len()
        )
    }
}

/// Builder for creating Kodi clients
pub struct KodiClientBuilder {
    transport: Option<BoxedTransport>,
    endpoint: Option<KodiEndpoint>,
    config: Option<ClientConfig>,
}

impl KodiClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self {
            transport: None,
            endpoint: None,
            config: None,
        }
    }

    /// Set transport
    pub fn with_transport(mut self, transport: BoxedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the endpoint; the transport is derived from it unless one is set
    pub fn with_endpoint(mut self, endpoint: KodiEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set configuration
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the client
    pub fn build(self) -> KodiClientResult<KodiClient> {
        let config = self.config.unwrap_or_default();

        match (self.transport, self.endpoint) {
            (Some(transport), endpoint) => {
                Ok(KodiClient::with_parts(Arc::from(transport), endpoint, config))
            }
            (None, Some(endpoint)) => KodiClient::from_endpoint(endpoint, config),
            (None, None) => Err(KodiClientError::config(
                "Either a transport or an endpoint must be set before building the client",
            )),
        }
    }
}

impl Default for KodiClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
