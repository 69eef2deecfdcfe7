//! # JSON-RPC 2.0 Envelope and Codec for Kodi
//!
//! Transport-agnostic JSON-RPC 2.0 types as spoken by the Kodi remote API,
//! plus the codec used by the client to encode method calls and classify
//! inbound payloads.
//!
//! ## Features
//! - Request, response and notification envelopes (JSON-RPC 2.0 subset)
//! - `decode` classifies every payload as a response, a notification or a
//!   malformed message without ever returning an error to the caller
//! - Standard error codes plus Kodi's application-defined codes

pub mod codec;
pub mod error;
pub mod notification;
pub mod prelude;
pub mod request;
pub mod response;
pub mod types;

// Re-export main types
pub use codec::{InboundMessage, decode, encode_request};
pub use error::{DecodeError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use notification::JsonRpcNotification;
pub use request::JsonRpcRequest;
pub use response::{JsonRpcResponse, ResponseOutcome};
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}
