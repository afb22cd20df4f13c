//! Multi-transport MCP (Model Context Protocol) client.
//!
//! Servers are reached over one of three bindings: a child process speaking
//! newline-delimited JSON-RPC on stdio, a server-sent-events stream with
//! POSTed requests, or plain HTTP POSTs. Each server gets an [`McpSession`];
//! the [`McpManager`] starts them in parallel, merges their tool catalogs into
//! one routing table and dispatches calls by tool name.

pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod manager;
pub mod session;
pub mod sse;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{RawServerDescriptor, ServerDescriptor, TransportConfig, TransportKind};
pub use error::McpError;
pub use manager::{McpManager, ServerSummary};
pub use session::{
    ClientInfo, McpSession, McpToolContent, McpToolInfo, McpToolResult, ServerInfo, SessionState,
};
pub use transport::Transport;
