//! # Kodi JSON-RPC Prelude
//!
//! ```rust
//! use kodi_json_rpc::prelude::*;
//! ```

pub use crate::codec::{InboundMessage, decode, encode_request};
pub use crate::error::{DecodeError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use crate::notification::JsonRpcNotification;
pub use crate::request::JsonRpcRequest;
pub use crate::response::{JsonRpcResponse, ResponseOutcome};
pub use crate::types::{JsonRpcVersion, RequestId};

// Standard error codes
pub use crate::error_codes::*;
