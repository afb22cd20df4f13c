//! Plain and session-aware HTTP transport.
//!
//! Every message is one POST to the server URL. The reply may come back as a
//! JSON body, as an event-stream body, or (after `202 Accepted`) on a push
//! stream the transport opens once the server assigns an `Mcp-Session-Id`.
//! All three paths deliver through the same correlation table.

use super::pending::PendingRequests;
use super::{BoxFuture, Transport, header_map, shared_client};
use crate::config::TransportKind;
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::sse::SseStream;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Header carrying the server-assigned session identifier.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Bound on the best-effort session DELETE sent on close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP transport for one remote MCP server.
pub struct HttpTransport {
    name: String,
    url: String,
    headers: HeaderMap,
    timeout: Duration,
    client: OnceLock<reqwest::Client>,
    session_id: std::sync::Mutex<Option<String>>,
    pending: PendingRequests,
    cancel: CancellationToken,
    push_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HttpTransport {
    pub fn new(
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            headers: header_map(name, headers),
            timeout,
            client: OnceLock::new(),
            session_id: std::sync::Mutex::new(None),
            pending: PendingRequests::new(),
            cancel: CancellationToken::new(),
            push_handle: std::sync::Mutex::new(None),
        }
    }

    /// The session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn closed(&self) -> McpError {
        McpError::TransportClosed {
            name: self.name.clone(),
        }
    }

    fn client(&self) -> Result<&reqwest::Client, McpError> {
        if self.cancel.is_cancelled() {
            return Err(self.closed());
        }
        shared_client(&self.client)
    }

    /// Stateless servers need no setup; just make sure the client exists.
    async fn open(&self) -> Result<(), McpError> {
        self.client()?;
        Ok(())
    }

    fn request_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        if let Some(id) = self.session_id() {
            match HeaderValue::from_str(&id) {
                Ok(value) => {
                    headers.insert(SESSION_HEADER, value);
                }
                Err(_) => tracing::warn!("Server '{}' sent an unusable session id", self.name),
            }
        }
        headers
    }

    /// Remember the server-assigned session and open the push stream for it.
    fn capture_session(&self, response: &reqwest::Response) {
        let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };

        {
            let mut current = self.session_id.lock().unwrap_or_else(PoisonError::into_inner);
            if current.as_deref() == Some(id) {
                return;
            }
            tracing::debug!("MCP server '{}' assigned session {id}", self.name);
            *current = Some(id.to_string());
        }

        if let Some(client) = self.client.get() {
            let handle = tokio::spawn(read_push_stream(
                self.name.clone(),
                client.clone(),
                self.url.clone(),
                self.request_headers(),
                self.pending.clone(),
                self.cancel.clone(),
            ));
            if let Some(old) = self
                .push_handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(handle)
            {
                old.abort();
            }
        }
    }

    /// POST one message and route whatever comes back in the body.
    ///
    /// `expect` is the id of the request whose reply we are waiting for, if
    /// any; an event-stream body is read until that reply has been delivered.
    async fn post(
        &self,
        body: &impl serde::Serialize,
        expect: Option<u64>,
    ) -> Result<(), McpError> {
        let client = self.client()?;
        let response = client
            .post(&self.url)
            .headers(self.request_headers())
            .json(body)
            .send()
            .await?;

        self.capture_session(&response);

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::Http(format!(
                "POST {} returned {status}: {text}",
                self.url
            )));
        }
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        let Some(expect) = expect else {
            return Ok(());
        };

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_event_stream {
            let mut events = SseStream::from_response(response);
            while let Some(event) = events.next().await {
                let event = event?;
                if event.kind() != "message" {
                    continue;
                }
                let delivered = self.pending.dispatch_frame(&self.name, &event.data);
                if delivered.contains(&expect) {
                    break;
                }
            }
        } else {
            let text = response.text().await?;
            if !text.trim().is_empty() {
                self.pending.dispatch_frame(&self.name, &text);
            }
        }
        Ok(())
    }

    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        self.client()?;
        let deadline = Instant::now() + self.timeout;
        let id = request.id;
        let slot = self.pending.register(id);

        let posted = tokio::select! {
            result = tokio::time::timeout(self.timeout, self.post(&request, Some(id))) => result,
            _ = self.cancel.cancelled() => Ok(Err(self.closed())),
        };
        match posted {
            Ok(result) => result?,
            Err(_) => {
                return Err(McpError::Timeout {
                    name: request.method,
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        slot.wait(&self.name, &request.method, remaining, &self.cancel)
            .await
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        match tokio::time::timeout(self.timeout, self.post(&notification, None)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                name: notification.method,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn shutdown(&self) -> Result<(), McpError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.cancel.cancel();
        if let Some(handle) = self
            .push_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.pending.fail_all();

        // Ask the server to drop its session state
        if let (Some(client), Some(id)) = (self.client.get(), self.session_id()) {
            let result = client
                .delete(&self.url)
                .headers(self.headers.clone())
                .header(SESSION_HEADER, id)
                .timeout(CLOSE_TIMEOUT)
                .send()
                .await;
            if let Err(e) = result {
                tracing::debug!("Session DELETE for '{}' failed: {e}", self.name);
            }
        }
        tracing::debug!("Closed HTTP transport for '{}'", self.name);
        Ok(())
    }
}

/// Background reader for the session push stream (`GET` with the session header).
async fn read_push_stream(
    server: String,
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    pending: PendingRequests,
    cancel: CancellationToken,
) {
    let mut headers = headers;
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

    let response = tokio::select! {
        response = client.get(&url).headers(headers).send() => response,
        _ = cancel.cancelled() => return,
    };
    let response = match response {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            tracing::debug!("No push stream for '{server}' (GET returned {})", r.status());
            return;
        }
        Err(e) => {
            tracing::debug!("No push stream for '{server}': {e}");
            return;
        }
    };

    let mut events = SseStream::from_response(response);
    loop {
        let event = tokio::select! {
            event = events.next() => event,
            _ = cancel.cancelled() => return,
        };
        match event {
            Some(Ok(event)) if event.kind() == "message" => {
                pending.dispatch_frame(&server, &event.data);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!("Push stream for '{server}' failed: {e}");
                return;
            }
            None => {
                tracing::debug!("Push stream for '{server}' ended");
                return;
            }
        }
    }
}

impl Transport for HttpTransport {
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
        TransportKind::Http
    }
}
