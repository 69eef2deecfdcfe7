//! Wire codec: outgoing calls to bytes, inbound bytes to a classified message.
//!
//! Decoding never fails outright. Anything that cannot be attributed to a
//! response or a notification comes back as [`InboundMessage::Malformed`] so
//! the caller can record it and move on.

use serde_json::{Map, Value};

use crate::error::{DecodeError, JsonRpcErrorObject};
use crate::notification::JsonRpcNotification;
use crate::request::JsonRpcRequest;
use crate::response::{JsonRpcResponse, ResponseOutcome};
use crate::types::{JsonRpcVersion, RequestId};

/// A decoded inbound payload
#[derive(Debug)]
pub enum InboundMessage {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
    Malformed(DecodeError),
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Response(_) => "response",
            InboundMessage::Notification(_) => "notification",
            InboundMessage::Malformed(_) => "malformed",
        }
    }
}

/// Encode a method call as `{"jsonrpc":"2.0","method":..,"params":..,"id":..}`.
pub fn encode_request(id: u64, method: &str, params: Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&JsonRpcRequest::new(id, method, params))
}

/// Classify an inbound payload.
pub fn decode(bytes: &[u8]) -> InboundMessage {
    match classify(bytes) {
        Ok(message) => message,
        Err(error) => InboundMessage::Malformed(error),
    }
}

fn classify(bytes: &[u8]) -> Result<InboundMessage, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let mut object = match value {
        Value::Object(object) => object,
        Value::Array(_) => return Err(DecodeError::NotAnObject("array")),
        Value::String(_) => return Err(DecodeError::NotAnObject("string")),
        Value::Number(_) => return Err(DecodeError::NotAnObject("number")),
        Value::Bool(_) => return Err(DecodeError::NotAnObject("boolean")),
        Value::Null => return Err(DecodeError::NotAnObject("null")),
    };

    // Kodi always sends the version member, but a bare {"id":..,"result":..}
    // is still a well-formed response.
    if let Some(version) = object.get("jsonrpc")
        && version.as_str() != Some(crate::JSONRPC_VERSION)
    {
        return Err(DecodeError::UnsupportedVersion(version.to_string()));
    }

    match object.remove("id") {
        Some(id) => classify_response(id, object),
        None => classify_notification(object),
    }
}

fn classify_response(id: Value, mut object: Map<String, Value>) -> Result<InboundMessage, DecodeError> {
    let id = match &id {
        Value::Number(n) => n.as_u64().map(RequestId::Number),
        Value::String(s) => Some(RequestId::String(s.clone())),
        _ => None,
    }
    .ok_or(DecodeError::InvalidId(id))?;

    let outcome = match (object.remove("result"), object.remove("error")) {
        (Some(result), None) => ResponseOutcome::Result(result),
        (None, Some(error)) => ResponseOutcome::Error(
            serde_json::from_value::<JsonRpcErrorObject>(error)
                .map_err(|e| DecodeError::InvalidErrorObject(e.to_string()))?,
        ),
        (Some(_), Some(_)) => return Err(DecodeError::AmbiguousResponse),
        (None, None) => {
            return Err(match object.get("method").and_then(Value::as_str) {
                Some(method) => DecodeError::UnexpectedRequest(method.to_string()),
                None => DecodeError::MissingOutcome,
            });
        }
    };

    Ok(InboundMessage::Response(JsonRpcResponse {
        version: JsonRpcVersion::V2_0,
        id,
        outcome,
    }))
}

fn classify_notification(mut object: Map<String, Value>) -> Result<InboundMessage, DecodeError> {
    let Some(Value::String(method)) = object.remove("method") else {
        return Err(DecodeError::MissingMethod);
    };
    let params = object.remove("params").unwrap_or(Value::Null);

    Ok(InboundMessage::Notification(JsonRpcNotification::new(method, params)))
}
