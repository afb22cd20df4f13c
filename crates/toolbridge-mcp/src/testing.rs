//! Scripted in-memory transport for unit tests.

use crate::config::TransportKind;
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::{BoxFuture, Transport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Handler =
    Box<dyn Fn(&JsonRpcRequest) -> Option<Result<JsonRpcResponse, McpError>> + Send + Sync>;

/// A transport that answers like a well-behaved server exposing `tools`.
///
/// `tools/call` replies with the text `"<server>:<tool>"`. A handler can
/// override any request; returning `None` falls back to the default reply.
pub(crate) struct MockTransport {
    server: String,
    tools: Vec<String>,
    fail_init: bool,
    fail_close: bool,
    delay: Duration,
    closes: Arc<AtomicUsize>,
    notifications: Arc<Mutex<Vec<String>>>,
    request_ids: Arc<Mutex<Vec<u64>>>,
    handler: Option<Handler>,
}

impl MockTransport {
    pub(crate) fn new(server: &str, tools: &[&str]) -> Self {
        Self {
            server: server.to_string(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            fail_init: false,
            fail_close: false,
            delay: Duration::ZERO,
            closes: Arc::new(AtomicUsize::new(0)),
            notifications: Arc::new(Mutex::new(Vec::new())),
            request_ids: Arc::new(Mutex::new(Vec::new())),
            handler: None,
        }
    }

    pub(crate) fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub(crate) fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Delay every request, to make parallelism observable.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_close_counter(mut self, closes: Arc<AtomicUsize>) -> Self {
        self.closes = closes;
        self
    }

    pub(crate) fn with_handler(
        mut self,
        handler: impl Fn(&JsonRpcRequest) -> Option<Result<JsonRpcResponse, McpError>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub(crate) fn notifications(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.notifications)
    }

    pub(crate) fn request_ids(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.request_ids)
    }

    fn default_reply(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                request.id,
                serde_json::json!({
                    "protocolVersion": crate::session::PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": self.server, "version": "0.0.1"}
                }),
            ),
            "tools/list" => {
                let tools: Vec<_> = self
                    .tools
                    .iter()
                    .map(|t| serde_json::json!({"name": t, "description": format!("{t} tool")}))
                    .collect();
                JsonRpcResponse::success(request.id, serde_json::json!({ "tools": tools }))
            }
            "tools/call" => {
                let tool = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or_default();
                JsonRpcResponse::success(
                    request.id,
                    serde_json::json!({
                        "content": [{"type": "text", "text": format!("{}:{tool}", self.server)}]
                    }),
                )
            }
            other => JsonRpcResponse::failure(
                request.id,
                crate::jsonrpc::METHOD_NOT_FOUND,
                format!("unknown method {other}"),
            ),
        }
    }
}

impl Transport for MockTransport {
    fn initialize(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            if self.fail_init {
                return Err(McpError::Http(format!("{} refused connection", self.server)));
            }
            Ok(())
        })
    }

    fn request(&self, request: JsonRpcRequest) -> BoxFuture<'_, Result<JsonRpcResponse, McpError>> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.request_ids.lock().unwrap().push(request.id);
            if let Some(reply) = self.handler.as_ref().and_then(|h| h(&request)) {
                return reply;
            }
            Ok(self.default_reply(&request))
        })
    }

    fn notify(&self, notification: JsonRpcNotification) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            self.notifications.lock().unwrap().push(notification.method);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(McpError::ServerNotRunning {
                    name: self.server.clone(),
                });
            }
            Ok(())
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }
}
