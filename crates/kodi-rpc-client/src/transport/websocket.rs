//! WebSocket transport implementation for the Kodi client
//!
//! One socket carries every call and every notification. `open` spawns a
//! writer task draining the outbound queue and a reader task forwarding
//! frames onto the inbound channel.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, StatusCode, header};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ConnectionConfig, Credentials};
use crate::error::TransportError;
use crate::transport::{
    InboundReceiver, Transport, TransportCapabilities, TransportEvent, TransportStatistics,
    TransportType,
};

/// Outbound queue of the live socket, tagged with the session it belongs to
type Outbound = Option<(u64, mpsc::UnboundedSender<Message>)>;

/// WebSocket transport for the Kodi client
pub struct WebSocketTransport {
    /// `ws[s]://host:ws_port/jsonrpc`
    endpoint: Url,
    /// Basic auth sent on the handshake request
    credentials: Option<Credentials>,
    connection: ConnectionConfig,
    /// Outbound queue; `None` while closed or after the socket dropped
    outbound: Arc<parking_lot::Mutex<Outbound>>,
    /// Session counter so a stale reader never clears a newer queue
    session: parking_lot::Mutex<u64>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Statistics
    stats: Arc<parking_lot::Mutex<TransportStatistics>>,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let url = Url::parse(endpoint)
            .map_err(|e| TransportError::ConnectionFailed(format!("Invalid URL: {}", e)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::ConnectionFailed(format!(
                "Invalid scheme for WebSocket transport: {}",
                url.scheme()
            )));
        }

        Ok(Self::with_config(url, None, ConnectionConfig::default()))
    }

    /// Create a WebSocket transport with credentials and connection settings
    pub fn with_config(
        endpoint: Url,
        credentials: Option<Credentials>,
        connection: ConnectionConfig,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            connection,
            outbound: Arc::new(parking_lot::Mutex::new(None)),
            session: parking_lot::Mutex::new(0),
            reader: parking_lot::Mutex::new(None),
            stats: Arc::new(parking_lot::Mutex::new(TransportStatistics::default())),
        }
    }

    fn record_error(&self, error: TransportError) -> TransportError {
        self.stats.lock().record_error(&error);
        error
    }

    /// Build the handshake request with auth and configured headers
    fn handshake_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, TransportError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectionFailed(format!("Invalid handshake request: {}", e)))?;

        let headers = request.headers_mut();

        if let Some(credentials) = &self.credentials {
            let token = BASE64.encode(format!("{}:{}", credentials.username, credentials.password));
            let value = HeaderValue::from_str(&format!("Basic {}", token))
                .map_err(|e| TransportError::ConnectionFailed(format!("Invalid credentials: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        if let Some(user_agent) = &self.connection.user_agent
            && let Ok(value) = HeaderValue::from_str(user_agent)
        {
            headers.insert(header::USER_AGENT, value);
        }

        if let Some(custom) = &self.connection.headers {
            for (name, value) in custom {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    TransportError::ConnectionFailed(format!("Invalid header name {}: {}", name, e))
                })?;
                let value = HeaderValue::from_str(value).map_err(|e| {
                    TransportError::ConnectionFailed(format!("Invalid header value: {}", e))
                })?;
                headers.insert(name, value);
            }
        }

        Ok(request)
    }

    /// Tear down the current session without touching statistics
    fn shutdown(&self) -> bool {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }

        match self.outbound.lock().take() {
            Some((_, tx)) => {
                // Writer sends the close frame and exits once the queue is dropped
                let _ = tx.send(Message::Close(None));
                true
            }
            None => false,
        }
    }
}

fn handshake_error(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
            TransportError::Unauthorized
        }
        WsError::Http(response) => {
            TransportError::ConnectionFailed(format!("Handshake rejected: HTTP {}", response.status()))
        }
        other => TransportError::ConnectionFailed(other.to_string()),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            persistent: true,
            server_events: true,
            bidirectional: true,
        }
    }

    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }

    async fn open(&self) -> Result<InboundReceiver, TransportError> {
        self.shutdown();

        let request = self.handshake_request()?;
        info!(endpoint = %self.endpoint, "Opening WebSocket connection");

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| self.record_error(handshake_error(e)))?;

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let session = {
            let mut session = self.session.lock();
            *session += 1;
            *session
        };
        *self.outbound.lock() = Some((session, out_tx.clone()));

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if ws_tx.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let outbound = self.outbound.clone();
        let stats = self.stats.clone();
        let endpoint = self.endpoint.clone();

        let reader = tokio::spawn(async move {
            let reason = loop {
                match ws_rx.next().await {
                    Some(Ok(Message::Text(text))) => {
                        stats.lock().messages_received += 1;
                        if in_tx.send(TransportEvent::Message(text.as_bytes().to_vec())).is_err() {
                            break "inbound receiver dropped".to_string();
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        stats.lock().messages_received += 1;
                        if in_tx.send(TransportEvent::Message(data.to_vec())).is_err() {
                            break "inbound receiver dropped".to_string();
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = out_tx.send(Message::Pong(payload));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => format!("closed by server: {} {}", u16::from(frame.code), &*frame.reason),
                            None => "closed by server".to_string(),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let error = TransportError::WebSocket(e.to_string());
                        stats.lock().record_error(&error);
                        break e.to_string();
                    }
                    None => break "stream ended".to_string(),
                }
            };

            {
                let mut guard = outbound.lock();
                if guard.as_ref().is_some_and(|(current, _)| *current == session) {
                    *guard = None;
                }
            }

            warn!(endpoint = %endpoint, reason = %reason, "WebSocket connection lost");
            let _ = in_tx.send(TransportEvent::ConnectionLost(reason));
        });

        *self.reader.lock() = Some(reader);
        self.stats.lock().connections_opened += 1;
        info!(endpoint = %self.endpoint, "WebSocket connection established");

        Ok(in_rx)
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let text = String::from_utf8(payload)
            .map_err(|_| TransportError::WebSocket("Payload is not valid UTF-8".to_string()))?;

        let sender = self
            .outbound
            .lock()
            .as_ref()
            .map(|(_, tx)| tx.clone())
            .ok_or(TransportError::NotOpen)?;

        sender
            .send(Message::text(text))
            .map_err(|_| self.record_error(TransportError::Closed))?;

        self.stats.lock().messages_sent += 1;
        Ok(())
    }

    async fn close(&self) {
        if self.shutdown() {
            debug!(endpoint = %self.endpoint, "WebSocket transport closed");
        }
    }

    fn is_open(&self) -> bool {
        self.outbound.lock().is_some()
    }

    fn statistics(&self) -> TransportStatistics {
        self.stats.lock().clone()
    }
}
