//! HTTP transport implementation for the Kodi client
//!
//! Every call is an independent `POST /jsonrpc`. The response body is pushed
//! onto the inbound channel as a single payload, so the client correlates it
//! exactly like a frame read from the WebSocket.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use kodi_json_rpc::{DecodeError, InboundMessage, JsonRpcErrorObject, decode};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::config::{ConnectionConfig, Credentials};
use crate::error::{KodiClientResult, TransportError};
use crate::transport::{
    InboundReceiver, Transport, TransportCapabilities, TransportEvent, TransportStatistics,
    TransportType,
};

/// HTTP transport for the Kodi client
#[derive(Debug)]
pub struct HttpTransport {
    /// HTTP client
    client: Client,
    /// `http[s]://host:port/jsonrpc`
    endpoint: Url,
    /// Basic auth sent with every POST
    credentials: Option<Credentials>,
    /// Inbound sender for the current session; `None` while closed
    inbound: parking_lot::Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    /// Statistics
    stats: Arc<parking_lot::Mutex<TransportStatistics>>,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(endpoint: &str) -> KodiClientResult<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| TransportError::ConnectionFailed(format!("Invalid URL: {}", e)))?;

        Self::with_config(url, None, &ConnectionConfig::default())
    }

    /// Create an HTTP transport with credentials and connection settings
    pub fn with_config(
        endpoint: Url,
        credentials: Option<Credentials>,
        connection: &ConnectionConfig,
    ) -> KodiClientResult<Self> {
        // Validate URL scheme
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TransportError::ConnectionFailed(format!(
                "Invalid scheme for HTTP transport: {}",
                endpoint.scheme()
            ))
            .into());
        }

        let mut builder = Client::builder();
        if let Some(user_agent) = &connection.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if let Some(headers) = &connection.headers {
            builder = builder.default_headers(header_map(headers)?);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(endpoint, credentials, client))
    }

    /// Create HTTP transport with custom client
    pub fn with_client(endpoint: Url, credentials: Option<Credentials>, client: Client) -> Self {
        Self {
            client,
            endpoint,
            credentials,
            inbound: parking_lot::Mutex::new(None),
            stats: Arc::new(parking_lot::Mutex::new(TransportStatistics::default())),
        }
    }

    /// Update statistics
    fn update_stats<F>(&self, update_fn: F)
    where
        F: FnOnce(&mut TransportStatistics),
    {
        let mut stats = self.stats.lock();
        update_fn(&mut stats);
    }

    fn fail(&self, error: TransportError) -> TransportError {
        self.update_stats(|stats| stats.record_error(&error));
        error
    }

    /// Turn an HTTP response into one inbound payload
    async fn handle_response(&self, response: Response) -> Result<Vec<u8>, TransportError> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::Http(format!("HTTP error {}: {}", status, error_text)));
        }

        let stream = response
            .bytes_stream()
            .map(|result| result.map_err(std::io::Error::other));

        collect_json_body(stream).await
    }
}

/// Read a whole body and check that it is one JSON document
async fn collect_json_body<S, B, E>(mut stream: S) -> Result<Vec<u8>, TransportError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut buffer = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TransportError::Http(format!("Stream error: {}", e)))?;
        buffer.extend_from_slice(chunk.as_ref());
    }

    // The body answers exactly one call, so an unusable reply fails that call here
    match decode(&buffer) {
        InboundMessage::Malformed(DecodeError::InvalidJson(e)) => Err(TransportError::Http(format!(
            "Response body is not JSON: {}",
            e
        ))),
        InboundMessage::Malformed(e) => {
            let server_error = serde_json::from_slice::<Value>(&buffer)
                .ok()
                .and_then(|body| body.get("error").cloned())
                .and_then(|error| serde_json::from_value::<JsonRpcErrorObject>(error).ok());
            Err(TransportError::Http(match server_error {
                Some(error) => format!("Unattributable response ({}): {}", e, error),
                None => format!("Unusable JSON-RPC response: {}", e),
            }))
        }
        _ => Ok(buffer),
    }
}

fn header_map(
    headers: &std::collections::HashMap<String, String>,
) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Http(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Http(format!("Invalid header value: {}", e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl Transport for HttpTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Http
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            persistent: false,
            server_events: false,
            bidirectional: false,
        }
    }

    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }

    async fn open(&self) -> Result<InboundReceiver, TransportError> {
        // Nothing to dial: each send is its own request
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(tx);
        self.update_stats(|stats| stats.connections_opened += 1);
        debug!(endpoint = %self.endpoint, "HTTP transport opened");
        Ok(rx)
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let inbound = self.inbound.lock().clone().ok_or(TransportError::NotOpen)?;

        let start_time = Instant::now();
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload);

        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request.send().await.map_err(|e| {
            let error = if e.is_connect() {
                TransportError::ConnectionFailed(e.to_string())
            } else {
                TransportError::Http(format!("Request failed: {}", e))
            };
            self.fail(error)
        })?;

        let body = match self.handle_response(response).await {
            Ok(body) => body,
            Err(error) => {
                warn!(endpoint = %self.endpoint, error = %error, "HTTP call failed");
                return Err(self.fail(error));
            }
        };

        let elapsed_ms = start_time.elapsed().as_millis() as f64;
        self.update_stats(|stats| {
            stats.messages_sent += 1;
            stats.messages_received += 1;
            let n = stats.messages_received as f64;
            stats.avg_response_time_ms = (stats.avg_response_time_ms * (n - 1.0) + elapsed_ms) / n;
        });

        inbound
            .send(TransportEvent::Message(body))
            .map_err(|_| self.fail(TransportError::Closed))
    }

    async fn close(&self) {
        if self.inbound.lock().take().is_some() {
            debug!(endpoint = %self.endpoint, "HTTP transport closed");
        }
    }

    fn is_open(&self) -> bool {
        self.inbound.lock().is_some()
    }

    fn statistics(&self) -> TransportStatistics {
        self.stats.lock().clone()
    }
}
