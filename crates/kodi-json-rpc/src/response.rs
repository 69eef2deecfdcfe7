use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JsonRpcErrorObject;
use crate::types::{JsonRpcVersion, RequestId};

/// Either the `result` or the `error` member of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseOutcome {
    Result(Value),
    Error(JsonRpcErrorObject),
}

impl ResponseOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ResponseOutcome::Error(_))
    }

    pub fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
        match self {
            ResponseOutcome::Result(value) => Ok(value),
            ResponseOutcome::Error(error) => Err(error),
        }
    }
}

/// A JSON-RPC response correlated to an earlier request by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(rename = "jsonrpc", default)]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    #[serde(flatten)]
    pub outcome: ResponseOutcome,
}

impl JsonRpcResponse {
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id: id.into(),
            outcome: ResponseOutcome::Result(result),
        }
    }

    pub fn error(id: impl Into<RequestId>, error: JsonRpcErrorObject) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id: id.into(),
            outcome: ResponseOutcome::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn test_success_envelope() {
        let response = JsonRpcResponse::success(1, json!({"volume": 50}));

        assert_eq!(
            to_value(&response).unwrap(),
            json!({"jsonrpc": "2.0", "id": 1, "result": {"volume": 50}})
        );
        assert!(!response.is_error());
    }

    #[test]
    fn test_error_envelope() {
        let response = JsonRpcResponse::error(
            4,
            JsonRpcErrorObject::new(-32602, "Invalid params.", None),
        );

        assert_eq!(
            to_value(&response).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "id": 4,
                "error": {"code": -32602, "message": "Invalid params."}
            })
        );
        assert!(response.is_error());
    }

    #[test]
    fn test_outcome_into_result() {
        let ok = ResponseOutcome::Result(json!("pong"));
        assert_eq!(ok.into_result().unwrap(), json!("pong"));

        let err = ResponseOutcome::Error(JsonRpcErrorObject::new(-1, "boom", None));
        assert_eq!(err.into_result().unwrap_err().message, "boom");
    }
}
