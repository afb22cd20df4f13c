//! Transports: how JSON-RPC messages reach an MCP server and come back.
//!
//! Three bindings implement [`Transport`]:
//!
//! - [`StdioTransport`]: a child process speaking newline-delimited JSON.
//! - [`SseTransport`]: a GET event stream for responses plus POSTs to a
//!   server-announced endpoint.
//! - [`HttpTransport`]: one POST per message, answered in the body, an event
//!   stream body, or a session-keyed push stream.

mod http;
mod pending;
mod sse;
mod stdio;

use crate::config::{ServerDescriptor, TransportConfig, TransportKind};
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::{ProcessState, StdioTransport};

/// A boxed, sendable future borrowed from the transport.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The contract every wire binding fulfils.
///
/// Methods take `&self` so a session can issue requests concurrently; each
/// implementation decides whether those requests are pipelined.
pub trait Transport: Send + Sync {
    /// Establish whatever connection state the binding needs.
    fn initialize(&self) -> BoxFuture<'_, Result<(), McpError>>;

    /// Send a request and wait for the response carrying the same id.
    fn request(&self, request: JsonRpcRequest) -> BoxFuture<'_, Result<JsonRpcResponse, McpError>>;

    /// Send a notification without waiting for any reply.
    fn notify(&self, notification: JsonRpcNotification) -> BoxFuture<'_, Result<(), McpError>>;

    /// Release all resources. Calling it more than once is harmless.
    fn close(&self) -> BoxFuture<'_, Result<(), McpError>>;

    /// Which binding this is.
    fn kind(&self) -> TransportKind;
}

/// Build the transport a descriptor asks for. Nothing is connected yet.
pub fn connect(descriptor: &ServerDescriptor) -> Box<dyn Transport> {
    let timeout = Duration::from_millis(descriptor.timeout_ms);
    let connect_timeout = Duration::from_millis(descriptor.connect_timeout_ms);

    match &descriptor.transport {
        TransportConfig::Stdio {
            command,
            args,
            env,
            cwd,
        } => Box::new(StdioTransport::new(
            &descriptor.name,
            command,
            args,
            env,
            cwd.as_deref(),
            timeout,
        )),
        TransportConfig::Sse { url, headers } => Box::new(SseTransport::new(
            &descriptor.name,
            url,
            headers,
            timeout,
            connect_timeout,
        )),
        TransportConfig::Http { url, headers } => {
            Box::new(HttpTransport::new(&descriptor.name, url, headers, timeout))
        }
    }
}

/// Build a header map from configured string pairs, skipping invalid entries.
pub(crate) fn header_map(
    server: &str,
    headers: &std::collections::HashMap<String, String>,
) -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderName, HeaderValue};

    let mut map = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::warn!("Ignoring invalid header '{name}' for MCP server '{server}'"),
        }
    }
    map
}

/// The HTTP client of a network transport, built on first use.
pub(crate) fn shared_client(
    cell: &std::sync::OnceLock<reqwest::Client>,
) -> Result<&reqwest::Client, McpError> {
    if let Some(client) = cell.get() {
        return Ok(client);
    }
    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| McpError::Http(format!("Failed to build HTTP client: {e}")))?;
    Ok(cell.get_or_init(|| client))
}
