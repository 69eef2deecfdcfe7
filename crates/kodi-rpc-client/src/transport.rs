//! Transport layer for the Kodi client
//!
//! A transport moves raw JSON-RPC payloads. Everything it receives is pushed
//! onto the inbound channel returned by [`Transport::open`]; classifying and
//! correlating those bytes is the client's job.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::{ConnectionConfig, KodiEndpoint};
use crate::error::{KodiClientResult, TransportError};

pub mod http;
pub mod websocket;

// Re-export transport implementations
pub use http::HttpTransport;
pub use websocket::WebSocketTransport;

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// One POST per call on the HTTP port
    Http,
    /// Persistent socket on the WebSocket port
    WebSocket,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Http => write!(f, "HTTP"),
            TransportType::WebSocket => write!(f, "WebSocket"),
        }
    }
}

/// Transport capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// Whether the transport maintains a persistent connection
    pub persistent: bool,
    /// Whether the server can push notifications over this transport
    pub server_events: bool,
    /// Whether both sides can send at any time
    pub bidirectional: bool,
}

/// Something the transport observed on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete inbound payload
    Message(Vec<u8>),
    /// The connection ended; emitted at most once per `open`
    ConnectionLost(String),
}

/// Inbound side of an open transport
pub type InboundReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Transport trait defining the interface for all transport implementations
///
/// Methods take `&self` so one transport can serve concurrent calls; the
/// implementations keep their state behind atomics and locks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get transport capabilities
    fn capabilities(&self) -> TransportCapabilities;

    /// Endpoint this transport talks to
    fn endpoint(&self) -> String;

    /// Open the transport and hand back the inbound event channel.
    ///
    /// Opening an already open transport replaces the previous session.
    async fn open(&self) -> Result<InboundReceiver, TransportError>;

    /// Send one encoded payload
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Close the transport; closing twice is a no-op
    async fn close(&self);

    /// Check if open
    fn is_open(&self) -> bool;

    /// Get transport statistics
    fn statistics(&self) -> TransportStatistics {
        TransportStatistics::default()
    }
}

/// Type alias for a boxed transport
pub type BoxedTransport = Box<dyn Transport>;

/// Transport statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct TransportStatistics {
    /// Number of payloads sent
    pub messages_sent: u64,
    /// Number of inbound payloads received
    pub messages_received: u64,
    /// Number of successful opens
    pub connections_opened: u64,
    /// Number of errors encountered
    pub errors: u64,
    /// Average HTTP round trip (HTTP transport only)
    pub avg_response_time_ms: f64,
    /// Last error message
    pub last_error: Option<String>,
}

impl TransportStatistics {
    pub(crate) fn record_error(&mut self, error: &TransportError) {
        self.errors += 1;
        self.last_error = Some(error.to_string());
    }
}

/// Transport factory for creating transport instances
pub struct TransportFactory;

impl TransportFactory {
    /// Pick the transport for an endpoint: WebSocket when a WebSocket port is
    /// configured, HTTP otherwise.
    pub fn from_endpoint(
        endpoint: &KodiEndpoint,
        connection: &ConnectionConfig,
    ) -> KodiClientResult<BoxedTransport> {
        match Self::transport_type_for(endpoint) {
            TransportType::WebSocket => Ok(Box::new(WebSocketTransport::with_config(
                endpoint.ws_url()?,
                endpoint.credentials.clone(),
                connection.clone(),
            ))),
            TransportType::Http => Ok(Box::new(HttpTransport::with_config(
                endpoint.http_url()?,
                endpoint.credentials.clone(),
                connection,
            )?)),
        }
    }

    /// Transport type that would be chosen for an endpoint
    pub fn transport_type_for(endpoint: &KodiEndpoint) -> TransportType {
        if endpoint.ws_port.is_some() {
            TransportType::WebSocket
        } else {
            TransportType::Http
        }
    }
}
