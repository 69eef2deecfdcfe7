//! Error types for Kodi client operations

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use kodi_json_rpc::{JsonRpcErrorObject, RequestId};

/// Result type for Kodi client operations
pub type KodiClientResult<T> = Result<T, KodiClientError>;

/// Error surfaced to the caller of a client operation
#[derive(Error, Debug)]
pub enum KodiClientError {
    /// The transport could not be opened (network or handshake failure)
    #[error("Connection error: {0}")]
    Connection(#[source] TransportError),

    /// A call was made while the client was not connected
    #[error("Not connected")]
    NotConnected,

    /// No response arrived before the call's deadline
    #[error("Call to {method} timed out after {}ms", .timeout.as_millis())]
    Timeout { method: String, timeout: Duration },

    /// The transport dropped while the call was outstanding
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The client was closed while the call was outstanding
    #[error("Connection closed")]
    ConnectionClosed,

    /// The server answered with a JSON-RPC error object
    #[error("Server error (code {code}): {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The server rejected the supplied credentials
    #[error("Invalid credentials")]
    InvalidAuth,

    /// A transport failure attributable to one call
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Transport-specific errors
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport is not open")]
    NotOpen,

    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("WebSocket transport error: {0}")]
    WebSocket(String),

    #[error("Unauthorized (HTTP 401)")]
    Unauthorized,

    #[error("Transport closed unexpectedly")]
    Closed,
}

/// A response whose id matches no outstanding call (stale, duplicate or foreign)
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unmatched response id {id}")]
pub struct UnmatchedResponse {
    pub id: RequestId,
}

impl KodiClientError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Convert a connect-time transport failure
    pub fn connection(error: TransportError) -> Self {
        match error {
            TransportError::Unauthorized => Self::InvalidAuth,
            other => Self::Connection(other),
        }
    }

    /// Convert a transport failure that happened while sending one call
    pub fn send_failed(error: TransportError) -> Self {
        match error {
            TransportError::Unauthorized => Self::InvalidAuth,
            TransportError::NotOpen => Self::NotConnected,
            other => Self::Transport(other),
        }
    }

    /// Create a remote error from a JSON-RPC error object
    pub fn remote(error: JsonRpcErrorObject) -> Self {
        Self::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }

    /// Whether a caller could reasonably try again.
    ///
    /// The client itself never retries a call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::NotConnected | Self::ConnectionLost(_) => true,
            Self::Transport(TransportError::ConnectionFailed(_) | TransportError::Closed) => true,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Whether the call never reached a live connection or lost it midway
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::NotConnected
                | Self::ConnectionLost(_)
                | Self::ConnectionClosed
        )
    }

    /// Get the error code if this is a remote error
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let timeout = KodiClientError::Timeout {
            method: "Player.GetItem".to_string(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(timeout.to_string(), "Call to Player.GetItem timed out after 1500ms");

        let remote = KodiClientError::remote(JsonRpcErrorObject::new(-32602, "Invalid params.", None));
        assert_eq!(remote.to_string(), "Server error (code -32602): Invalid params.");
        assert_eq!(remote.error_code(), Some(-32602));
    }

    #[test]
    fn test_unauthorized_maps_to_invalid_auth() {
        assert!(matches!(
            KodiClientError::connection(TransportError::Unauthorized),
            KodiClientError::InvalidAuth
        ));
        assert!(matches!(
            KodiClientError::send_failed(TransportError::Unauthorized),
            KodiClientError::InvalidAuth
        ));
        assert!(matches!(
            KodiClientError::send_failed(TransportError::NotOpen),
            KodiClientError::NotConnected
        ));
    }

    #[test]
    fn test_retry_hints() {
        assert!(KodiClientError::ConnectionLost("eof".into()).is_retryable());
        assert!(KodiClientError::NotConnected.is_connection_error());
        assert!(!KodiClientError::InvalidAuth.is_retryable());
        assert!(!KodiClientError::remote(JsonRpcErrorObject::new(-32601, "x", None)).is_retryable());
    }
}
