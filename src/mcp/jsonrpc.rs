// JSON-RPC 2.0 envelopes for the MCP subset we speak

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response)
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Numeric id if this is a response to one of our requests. Servers
    /// sometimes echo ids back as strings.
    pub fn numeric_id(&self) -> Option<u64> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Parse one inbound frame. Server-initiated requests and notifications
/// (anything without result/error) come back as `None`.
pub fn parse_response(text: &str) -> Option<JsonRpcResponse> {
    let response: JsonRpcResponse = serde_json::from_str(text).ok()?;
    if response.result.is_none() && response.error.is_none() {
        return None;
    }
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_serialization() {
        let request = JsonRpcRequest::new(1, "test/method", Some(serde_json::json!({"foo": "bar"})));
        let serialized = serde_json::to_string(&request).unwrap();
        assert!(serialized.contains("\"jsonrpc\":\"2.0\""));
        assert!(serialized.contains("\"method\":\"test/method\""));

        let notification = JsonRpcNotification::new("notifications/initialized", None);
        let serialized = serde_json::to_string(&notification).unwrap();
        assert!(!serialized.contains("\"id\""));
        assert!(!serialized.contains("params"));
    }

    #[test]
    fn test_json_rpc_error_parsing() {
        let response = parse_response(
            r#"{"jsonrpc":"2.0","id":"7","error":{"code":-32600,"message":"Invalid request"}}"#,
        )
        .unwrap();
        assert_eq!(response.numeric_id(), Some(7));

        let error = response.into_result().unwrap_err();
        assert_eq!(error.code, -32600);
        assert_eq!(error.message, "Invalid request");
    }

    #[test]
    fn test_server_notifications_are_skipped() {
        assert!(parse_response(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).is_none());
        assert!(parse_response("not json").is_none());
    }
}
