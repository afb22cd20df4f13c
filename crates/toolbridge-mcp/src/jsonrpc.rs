//! JSON-RPC 2.0 envelopes for MCP communication.

use serde::{Deserialize, Serialize};

/// A JSON-RPC 2.0 request. Requests always carry an id and expect a response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Build a successful response (used by tests and mock servers).
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Split the response into its result or its error.
    ///
    /// Exactly one of `result` and `error` must be present; anything else is
    /// [`ResponseError::Malformed`].
    pub fn into_result(self) -> Result<serde_json::Value, ResponseError> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (None, Some(err)) => Err(ResponseError::Rpc(err)),
            (Some(_), Some(_)) => Err(ResponseError::Malformed("has both result and error")),
            (None, None) => Err(ResponseError::Malformed("has neither result nor error")),
        }
    }
}

/// Why a response carries no usable result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseError {
    /// The server answered with a JSON-RPC error object.
    Rpc(JsonRpcError),
    /// The response violates the result/error exclusivity rule.
    Malformed(&'static str),
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// JSON-RPC "internal error" code.
pub const INTERNAL_ERROR: i64 = -32603;
/// JSON-RPC "method not found" code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// A message received from a server, classified by shape.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// A reply to one of our requests.
    Response(JsonRpcResponse),
    /// A request initiated by the server (sampling, roots, ...). Not supported.
    ServerRequest { id: serde_json::Value, method: String },
    /// A notification initiated by the server (logging, progress, ...).
    ServerNotification { method: String },
}

impl IncomingMessage {
    /// Parse one JSON frame from the wire.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Classify an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        match value.get("method").and_then(|m| m.as_str()) {
            Some(method) => {
                let method = method.to_string();
                match value.get("id") {
                    Some(id) if !id.is_null() => Ok(Self::ServerRequest {
                        id: id.clone(),
                        method,
                    }),
                    _ => Ok(Self::ServerNotification { method }),
                }
            }
            None => serde_json::from_value(value).map(Self::Response),
        }
    }
}
