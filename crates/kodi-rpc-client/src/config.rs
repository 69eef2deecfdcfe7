//! Configuration types for the Kodi client

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::error::{KodiClientError, KodiClientResult};

/// Path of the JSON-RPC endpoint on both the HTTP and the WebSocket port
pub const JSONRPC_PATH: &str = "/jsonrpc";

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientConfig {
    /// Timeout configurations
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Automatic reconnection of the persistent transport
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Connection configurations
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Transport open / WebSocket handshake timeout
    #[serde(with = "duration_serde")]
    pub connect: Duration,

    /// Default deadline for a single call
    #[serde(with = "duration_serde")]
    pub request: Duration,
}

/// Reconnection policy applied after the persistent transport drops.
///
/// Calls are never retried; only the connection is re-established.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Whether to reconnect after a transport-reported disconnect
    pub enabled: bool,

    /// Maximum number of attempts per outage (0 = unlimited)
    pub max_attempts: u32,

    /// Delay before the first attempt
    #[serde(with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    #[serde(with = "duration_serde")]
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// User agent string
    pub user_agent: Option<String>,

    /// Custom headers to include in requests and the WebSocket handshake
    pub headers: Option<HashMap<String, String>>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            request: Duration::from_secs(5),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            user_agent: Some(format!("kodi-rpc-client/{}", env!("CARGO_PKG_VERSION"))),
            headers: None,
        }
    }
}

impl ReconnectConfig {
    /// Calculate the delay before a given attempt number (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let mut delay = self.initial_delay;

        if attempt > 1 {
            let multiplier = self.backoff_multiplier.powi((attempt - 1) as i32);
            delay = Duration::from_millis((delay.as_millis() as f64 * multiplier) as u64);
        }

        // Cap at max delay
        if delay > self.max_delay {
            delay = self.max_delay;
        }

        // Apply jitter
        if self.jitter > 0.0 {
            let jitter_ms = (delay.as_millis() as f64 * self.jitter) as u64;
            let random_offset = rand::random::<f64>() * jitter_ms as f64;
            delay = Duration::from_millis(delay.as_millis() as u64 + random_offset as u64);
        }

        // Ensure final delay never exceeds max_delay (even after jitter)
        if delay > self.max_delay {
            delay = self.max_delay;
        }

        delay
    }

    /// Check if another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}

/// Username/password pair sent as HTTP Basic auth
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where a Kodi instance listens.
///
/// With `ws_port` set the client uses the persistent WebSocket transport,
/// otherwise single-shot HTTP on `port`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KodiEndpoint {
    pub host: String,
    /// HTTP port (also serves `/image`)
    pub port: u16,
    /// WebSocket port, if notifications are wanted
    pub ws_port: Option<u16>,
    pub credentials: Option<Credentials>,
    /// Use https/wss
    #[serde(default)]
    pub tls: bool,
}

impl KodiEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ws_port: None,
            credentials: None,
            tls: false,
        }
    }

    pub fn with_ws_port(mut self, ws_port: u16) -> Self {
        self.ws_port = Some(ws_port);
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    fn http_scheme(&self) -> &'static str {
        if self.tls { "https" } else { "http" }
    }

    /// `http[s]://host:port/jsonrpc`
    pub fn http_url(&self) -> KodiClientResult<Url> {
        parse_url(&format!(
            "{}://{}:{}{}",
            self.http_scheme(),
            self.host,
            self.port,
            JSONRPC_PATH
        ))
    }

    /// `ws[s]://host:ws_port/jsonrpc`
    pub fn ws_url(&self) -> KodiClientResult<Url> {
        let ws_port = self
            .ws_port
            .ok_or_else(|| KodiClientError::config("No WebSocket port configured"))?;
        let scheme = if self.tls { "wss" } else { "ws" };
        parse_url(&format!("{}://{}:{}{}", scheme, self.host, ws_port, JSONRPC_PATH))
    }

    /// Base URL for thumbnails: `http[s]://[user:pass@]host:port/image`
    pub fn image_base_url(&self) -> String {
        let auth = match &self.credentials {
            Some(credentials) => format!("{}:{}@", credentials.username, credentials.password),
            None => String::new(),
        };
        format!("{}://{}{}:{}/image", self.http_scheme(), auth, self.host, self.port)
    }

    /// Public URL of an `image://` thumbnail, served from the HTTP port.
    ///
    /// Anything whose scheme is not `image` (any case) has no URL.
    pub fn thumbnail_url(&self, thumbnail: &str) -> Option<String> {
        let (scheme, _) = thumbnail.split_once(':')?;
        if !scheme.eq_ignore_ascii_case("image") {
            return None;
        }
        Some(format!("{}/{}", self.image_base_url(), quote_plus(thumbnail)))
    }
}

/// Form-encode a path segment, leaving only alphanumerics and `_.-~` bare
fn quote_plus(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('*', "%2A")
        .replace("%7E", "~")
}

fn parse_url(raw: &str) -> KodiClientResult<Url> {
    Url::parse(raw).map_err(|e| KodiClientError::config(format!("Invalid URL {}: {}", raw, e)))
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
