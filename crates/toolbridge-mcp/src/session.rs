//! MCP session: the protocol layer over one transport.
//!
//! Handles the MCP handshake (initialize + initialized notification), tool
//! discovery (tools/list) and tool invocation (tools/call).

use crate::config::{ServerDescriptor, TransportKind};
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ResponseError};
use crate::transport::{self, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Upper bound on `tools/list` pages, in case a server keeps handing out cursors.
const MAX_TOOL_PAGES: usize = 100;

/// Identity advertised to servers during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self::new("toolbridge", env!("CARGO_PKG_VERSION"))
    }
}

/// What a server reported about itself in its `initialize` result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerInfo {
    pub protocol_version: String,
    pub name: String,
    pub version: Option<String>,
    pub capabilities: serde_json::Value,
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initializing,
    Ready,
    /// A fatal transport error occurred; the session will not recover.
    Failed,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        };
        f.pad(s)
    }
}

/// Information about a tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of calling a tool on an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct McpToolResult {
    pub content: Vec<McpToolContent>,
    pub is_error: bool,
}

impl McpToolResult {
    /// A successful result with one text item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// A failed result with one text item describing the failure.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpToolContent::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// All text items joined by newlines.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                McpToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A content item in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum McpToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: serde_json::Value,
    },
    /// A content type this client does not know about.
    #[serde(other)]
    Unknown,
}

/// Deserialization helpers for MCP protocol messages.
#[derive(Deserialize)]
struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    protocol_version: String,
    #[serde(default)]
    capabilities: serde_json::Value,
    #[serde(default, rename = "serverInfo")]
    server_info: Option<ServerIdentity>,
}

#[derive(Deserialize)]
struct ServerIdentity {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolEntry>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Deserialize)]
struct ToolCallResult {
    #[serde(default)]
    content: Vec<McpToolContent>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

/// One protocol session with one MCP server.
pub struct McpSession {
    name: String,
    transport: Box<dyn Transport>,
    next_id: AtomicU64,
    state: Mutex<SessionState>,
}

impl McpSession {
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
            next_id: AtomicU64::new(1),
            state: Mutex::new(SessionState::Created),
        }
    }

    /// Build a session with the transport the descriptor asks for.
    pub fn from_descriptor(descriptor: &ServerDescriptor) -> Self {
        Self::new(descriptor.name.clone(), transport::connect(descriptor))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            tracing::debug!("MCP session '{}': {} -> {}", self.name, *current, state);
            *current = state;
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Created | SessionState::Initializing => Err(McpError::NotInitialized {
                name: self.name.clone(),
            }),
            SessionState::Failed => Err(McpError::ServerNotRunning {
                name: self.name.clone(),
            }),
            SessionState::Closed => Err(McpError::TransportClosed {
                name: self.name.clone(),
            }),
        }
    }

    /// Send a request and record fatal transport failures in the state.
    async fn send(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        match self.transport.request(request).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                if e.is_fatal() && self.state() != SessionState::Closed {
                    tracing::warn!("MCP session '{}' failed: {e}", self.name);
                    self.set_state(SessionState::Failed);
                }
                Err(e)
            }
        }
    }

    /// Send a request whose result is required.
    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let resp = self.send(method, params).await?;
        match resp.into_result() {
            Ok(result) => Ok(result),
            Err(ResponseError::Malformed(why)) => Err(McpError::Protocol(format!(
                "{method} response from '{}' {why}",
                self.name
            ))),
            Err(ResponseError::Rpc(err)) => Err(McpError::JsonRpc {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
            }),
        }
    }

    /// Perform the handshake. Must be the first call on a session.
    pub async fn initialize(&self, client: &ClientInfo) -> Result<ServerInfo, McpError> {
        match self.state() {
            SessionState::Created => {}
            SessionState::Closed => {
                return Err(McpError::TransportClosed {
                    name: self.name.clone(),
                });
            }
            other => {
                return Err(McpError::Protocol(format!(
                    "session '{}' cannot be initialized while {other}",
                    self.name
                )));
            }
        }
        self.set_state(SessionState::Initializing);

        match self.handshake(client).await {
            Ok(info) => {
                self.set_state(SessionState::Ready);
                tracing::info!(
                    "MCP server '{}' initialized ({} {})",
                    self.name,
                    if info.name.is_empty() { "unnamed" } else { info.name.as_str() },
                    info.version.as_deref().unwrap_or("")
                );
                Ok(info)
            }
            Err(e) => {
                if self.state() != SessionState::Closed {
                    self.set_state(SessionState::Failed);
                }
                Err(e)
            }
        }
    }

    async fn handshake(&self, client: &ClientInfo) -> Result<ServerInfo, McpError> {
        self.transport.initialize().await?;

        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": client,
        });
        let result = self.call("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
            McpError::Protocol(format!("Failed to parse initialize response: {e}"))
        })?;

        self.transport
            .notify(JsonRpcNotification::new("notifications/initialized", None))
            .await?;

        let identity = init.server_info.unwrap_or(ServerIdentity {
            name: String::new(),
            version: None,
        });
        Ok(ServerInfo {
            protocol_version: init.protocol_version,
            name: identity.name,
            version: identity.version,
            capabilities: init.capabilities,
        })
    }

    /// Fetch the server's tool catalog, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        self.ensure_ready()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.take().map(|c| serde_json::json!({ "cursor": c }));
            let result = self.call("tools/list", params).await?;
            let page: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
            })?;

            tools.extend(page.tools.into_iter().map(|t| McpToolInfo {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(
            "MCP server '{}' returned more than {MAX_TOOL_PAGES} tool pages; truncating",
            self.name
        );
        Ok(tools)
    }

    /// Call a tool. Errors reported by the server come back as an error result.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, McpError> {
        self.ensure_ready()?;

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        let resp = self.send("tools/call", Some(params)).await?;

        let result = match resp.into_result() {
            Ok(result) => result,
            Err(ResponseError::Malformed(why)) => {
                return Err(McpError::Protocol(format!(
                    "tools/call response from '{}' {why}",
                    self.name
                )));
            }
            Err(ResponseError::Rpc(err)) => {
                return Ok(McpToolResult::error(format!(
                    "MCP server '{}' returned error {}: {}",
                    self.name, err.code, err.message
                )));
            }
        };

        let call_result: ToolCallResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/call result: {e}")))?;

        Ok(McpToolResult {
            content: call_result.content,
            is_error: call_result.is_error,
        })
    }

    /// Close the transport. The session is `Closed` afterwards even on error.
    pub async fn close(&self) -> Result<(), McpError> {
        let result = self.transport.close().await;
        self.set_state(SessionState::Closed);
        result
    }
}
