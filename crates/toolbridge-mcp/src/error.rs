//! Error types for MCP operations.

use thiserror::Error;

/// Errors from MCP server communication.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("MCP server '{name}' is not running")]
    ServerNotRunning { name: String },

    #[error("MCP session '{name}' is not initialized")]
    NotInitialized { name: String },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP request '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("Transport for '{name}' is closed")]
    TransportClosed { name: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid server descriptor '{name}': {reason}")]
    InvalidDescriptor { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether the error means the underlying connection is gone for good.
    ///
    /// Fatal errors move a session to `Failed`; timeouts and JSON-RPC errors
    /// leave it usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            McpError::ServerNotRunning { .. } | McpError::TransportClosed { .. } | McpError::Io(_)
        )
    }

    /// Whether the error is a request deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::Timeout { .. })
    }
}

impl From<reqwest::Error> for McpError {
    fn from(e: reqwest::Error) -> Self {
        McpError::Http(e.to_string())
    }
}
