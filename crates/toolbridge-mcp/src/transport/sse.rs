//! Streaming-HTTP transport using server-sent events.
//!
//! `GET <base>/sse` opens a long-lived event stream. The first `endpoint`
//! event names the path that requests must be POSTed to; responses then come
//! back as `message` events on the stream, matched to their request by id.

use super::pending::PendingRequests;
use super::{BoxFuture, Transport, header_map, shared_client};
use crate::config::TransportKind;
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::sse::SseStream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// SSE transport for one remote MCP server.
pub struct SseTransport {
    name: String,
    stream_url: String,
    base_url: String,
    headers: HeaderMap,
    timeout: Duration,
    connect_timeout: Duration,
    client: OnceLock<reqwest::Client>,
    endpoint: OnceLock<String>,
    pending: PendingRequests,
    cancel: CancellationToken,
    reader_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Create a transport. `url` may be the server base or its `/sse` path.
    pub fn new(
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        let trimmed = url.trim_end_matches('/');
        let (stream_url, base_url) = match trimmed.strip_suffix("/sse") {
            Some(base) => (trimmed.to_string(), base.to_string()),
            None => (format!("{trimmed}/sse"), trimmed.to_string()),
        };

        Self {
            name: name.to_string(),
            stream_url,
            base_url,
            headers: header_map(name, headers),
            timeout,
            connect_timeout,
            client: OnceLock::new(),
            endpoint: OnceLock::new(),
            pending: PendingRequests::new(),
            cancel: CancellationToken::new(),
            reader_handle: std::sync::Mutex::new(None),
        }
    }

    fn closed(&self) -> McpError {
        McpError::TransportClosed {
            name: self.name.clone(),
        }
    }

    fn connect_timed_out(&self) -> McpError {
        McpError::Timeout {
            name: format!("{} connect", self.name),
            timeout_ms: self.connect_timeout.as_millis() as u64,
        }
    }

    /// Open the event stream and wait for the server to announce its endpoint.
    async fn open(&self) -> Result<(), McpError> {
        if self.cancel.is_cancelled() {
            return Err(self.closed());
        }
        if self.endpoint.get().is_some() {
            return Ok(());
        }

        let client = shared_client(&self.client)?;
        let deadline = Instant::now() + self.connect_timeout;

        tracing::debug!("Opening SSE stream for '{}': {}", self.name, self.stream_url);
        let connect = client
            .get(&self.stream_url)
            .headers(self.headers.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .send();
        let response = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| self.connect_timed_out())??;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Http(format!(
                "GET {} returned {status}",
                self.stream_url
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let handle = tokio::spawn(read_events(
            self.name.clone(),
            SseStream::from_response(response),
            self.pending.clone(),
            self.cancel.clone(),
            endpoint_tx,
        ));
        *self
            .reader_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        let remaining = deadline.saturating_duration_since(Instant::now());
        let announced = match tokio::time::timeout(remaining, endpoint_rx).await {
            Ok(Ok(path)) => path,
            Ok(Err(_)) => return Err(self.closed()),
            Err(_) => return Err(self.connect_timed_out()),
        };

        let endpoint = resolve_endpoint(&self.base_url, &announced);
        tracing::debug!("MCP server '{}' announced endpoint {endpoint}", self.name);
        let _ = self.endpoint.set(endpoint);
        Ok(())
    }

    fn ready(&self) -> Result<(&reqwest::Client, &str), McpError> {
        if self.cancel.is_cancelled() {
            return Err(self.closed());
        }
        match (self.client.get(), self.endpoint.get()) {
            (Some(client), Some(endpoint)) => Ok((client, endpoint)),
            _ => Err(McpError::NotInitialized {
                name: self.name.clone(),
            }),
        }
    }

    fn request_timed_out(&self, method: String) -> McpError {
        McpError::Timeout {
            name: method,
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    async fn post(&self, body: &impl serde::Serialize) -> Result<(), McpError> {
        let (client, endpoint) = self.ready()?;
        let response = client
            .post(endpoint)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Http(format!(
                "POST {endpoint} returned {status}: {body}"
            )));
        }
        Ok(())
    }

    /// POST under the request deadline, giving up early if the transport closes.
    async fn post_within(
        &self,
        body: &impl serde::Serialize,
        method: &str,
    ) -> Result<(), McpError> {
        tokio::select! {
            result = tokio::time::timeout(self.timeout, self.post(body)) => match result {
                Ok(result) => result,
                Err(_) => Err(self.request_timed_out(method.to_string())),
            },
            _ = self.cancel.cancelled() => Err(self.closed()),
        }
    }

    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        self.ready()?;
        // The POST and the wait for the event share one deadline
        let deadline = Instant::now() + self.timeout;
        let slot = self.pending.register(request.id);

        self.post_within(&request, &request.method).await?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        slot.wait(&self.name, &request.method, remaining, &self.cancel)
            .await
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        self.post_within(&notification, &notification.method).await
    }

    async fn shutdown(&self) -> Result<(), McpError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.cancel.cancel();
        if let Some(handle) = self
            .reader_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.pending.fail_all();
        tracing::debug!("Closed SSE transport for '{}'", self.name);
        Ok(())
    }
}

/// Turn the announced endpoint into a full URL.
///
/// Absolute URLs are used as-is; paths are appended to the base URL.
fn resolve_endpoint(base_url: &str, announced: &str) -> String {
    let announced = announced.trim();
    if announced.starts_with("http://") || announced.starts_with("https://") {
        return announced.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if announced.starts_with('/') {
        format!("{base}{announced}")
    } else {
        format!("{base}/{announced}")
    }
}

/// Background reader for the event stream.
async fn read_events(
    server: String,
    mut events: SseStream,
    pending: PendingRequests,
    cancel: CancellationToken,
    endpoint_tx: oneshot::Sender<String>,
) {
    let mut endpoint_tx = Some(endpoint_tx);

    loop {
        let event = tokio::select! {
            event = events.next() => event,
            _ = cancel.cancelled() => return,
        };

        match event {
            Some(Ok(event)) => match event.kind() {
                "endpoint" => match endpoint_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(event.data);
                    }
                    None => tracing::debug!("Ignoring repeated endpoint event from '{server}'"),
                },
                "message" => {
                    pending.dispatch_frame(&server, &event.data);
                }
                other => tracing::debug!("Ignoring SSE event '{other}' from '{server}'"),
            },
            Some(Err(e)) => {
                tracing::warn!("SSE stream from '{server}' failed: {e}");
                break;
            }
            None => {
                tracing::warn!("SSE stream from '{server}' ended");
                break;
            }
        }
    }

    // No more responses can arrive: fail everything in flight and refuse new work
    cancel.cancel();
    pending.fail_all();
}

impl Transport for SseTransport {
    fn initialize(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(self.open())
    }

    fn request(&self, request: JsonRpcRequest) -> BoxFuture<'_, Result<JsonRpcResponse, McpError>> {
        Box::pin(self.send_request(request))
    }

    fn notify(&self, notification: JsonRpcNotification) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(self.send_notification(notification))
    }

    fn close(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(self.shutdown())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }
}
