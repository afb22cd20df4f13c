//! Stdio transport for MCP server communication.
//!
//! Spawns a child process and exchanges newline-delimited JSON-RPC messages
//! over its stdin/stdout. One request is in flight at a time: a request holds
//! the reader until its own reply line arrives, so concurrent callers on the
//! same transport are served one after another.

use super::{BoxFuture, Transport};
use crate::config::TransportKind;
use crate::error::McpError;
use crate::jsonrpc::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a server gets to exit after stdin is closed before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How often process liveness is re-checked while waiting for a reply.
const LIVENESS_POLL: Duration = Duration::from_millis(250);

/// Lifecycle of the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Not spawned yet.
    Starting,
    Running,
    /// Shutdown requested; waiting for exit.
    Stopping,
    Stopped,
}

/// Stdio transport for one MCP server process.
pub struct StdioTransport {
    name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<String>,
    timeout: Duration,
    state: std::sync::Mutex<ProcessState>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    // Held for a whole request/reply exchange
    stdout: Mutex<Option<Lines<BufReader<ChildStdout>>>>,
    stderr_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl StdioTransport {
    /// Create a transport; the process is spawned by [`Transport::initialize`].
    pub fn new(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args: args.to_vec(),
            env: env.clone(),
            cwd: cwd.map(str::to_string),
            timeout,
            state: std::sync::Mutex::new(ProcessState::Starting),
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            stdout: Mutex::new(None),
            stderr_handle: std::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Current lifecycle state of the child process.
    pub fn state(&self) -> ProcessState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ProcessState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    async fn spawn(&self) -> Result<(), McpError> {
        match self.state() {
            ProcessState::Running => return Ok(()),
            ProcessState::Stopping | ProcessState::Stopped => {
                return Err(McpError::TransportClosed {
                    name: self.name.clone(),
                });
            }
            ProcessState::Starting => {}
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: self.command.clone(),
            source: e,
        })?;

        let missing = |stream: &str| McpError::Protocol(format!("child {stream} was not piped"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        // Diagnostic output is only ever logged
        if let Some(stderr) = child.stderr.take() {
            let server = self.name.clone();
            let handle = tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "stderr: {line}");
                }
            });
            *self
                .stderr_handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        tracing::debug!(
            "Spawned MCP server '{}' (pid {:?}): {} {:?}",
            self.name,
            child.id(),
            self.command,
            self.args
        );

        *self.stdin.lock().await = Some(stdin);
        *self.stdout.lock().await = Some(BufReader::new(stdout).lines());
        *self.child.lock().await = Some(child);
        self.set_state(ProcessState::Running);
        Ok(())
    }

    async fn write_line(&self, line: &str) -> Result<(), McpError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| McpError::ServerNotRunning {
            name: self.name.clone(),
        })?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Fail if the child has exited.
    async fn ensure_running(&self) -> Result<(), McpError> {
        let mut guard = self.child.lock().await;
        let not_running = || McpError::ServerNotRunning {
            name: self.name.clone(),
        };
        let child = guard.as_mut().ok_or_else(not_running)?;
        match child.try_wait()? {
            Some(status) => {
                tracing::warn!("MCP server '{}' exited unexpectedly: {status}", self.name);
                Err(not_running())
            }
            None => Ok(()),
        }
    }

    async fn exchange(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let serialized = serde_json::to_string(request)?;

        let mut reader = self.stdout.lock().await;
        let lines = reader.as_mut().ok_or_else(|| McpError::ServerNotRunning {
            name: self.name.clone(),
        })?;

        self.ensure_running().await?;
        self.write_line(&serialized).await?;

        let mut liveness = tokio::time::interval(LIVENESS_POLL);
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.ensure_running().await?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = liveness.tick() => continue,
            };
            let Some(line) = line else {
                return Err(McpError::TransportClosed {
                    name: self.name.clone(),
                });
            };
            if line.trim().is_empty() {
                continue;
            }

            match IncomingMessage::parse(&line) {
                Ok(IncomingMessage::Response(resp)) if resp.id == Some(request.id) => {
                    return Ok(resp);
                }
                Ok(IncomingMessage::Response(resp)) => {
                    tracing::debug!(
                        "Discarding stale response {:?} from '{}' while waiting for {}",
                        resp.id,
                        self.name,
                        request.id
                    );
                }
                Ok(IncomingMessage::ServerNotification { method }) => {
                    tracing::debug!("Notification from '{}': {method}", self.name);
                }
                Ok(IncomingMessage::ServerRequest { method, .. }) => {
                    tracing::debug!("Ignoring server request '{method}' from '{}'", self.name);
                }
                Err(e) => {
                    tracing::warn!("Failed to parse MCP message from '{}': {e}: {line}", self.name);
                }
            }
        }
    }

    /// Run `work` under the request timeout, giving up early if the transport closes.
    async fn bounded<T>(
        &self,
        method: &str,
        work: impl Future<Output = Result<T, McpError>>,
    ) -> Result<T, McpError> {
        if self.cancel.is_cancelled() {
            return Err(McpError::TransportClosed {
                name: self.name.clone(),
            });
        }

        tokio::select! {
            result = tokio::time::timeout(self.timeout, work) => match result {
                Ok(result) => result,
                Err(_) => Err(McpError::Timeout {
                    name: method.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
            },
            _ = self.cancel.cancelled() => Err(McpError::TransportClosed {
                name: self.name.clone(),
            }),
        }
    }

    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        self.bounded(&request.method, self.exchange(&request)).await
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        let serialized = serde_json::to_string(&notification)?;
        self.bounded(&notification.method, self.write_line(&serialized))
            .await
    }

    /// Close stdin, wait briefly for the process to exit, then kill it.
    async fn shutdown(&self) -> Result<(), McpError> {
        match self.state() {
            ProcessState::Stopping | ProcessState::Stopped => return Ok(()),
            ProcessState::Starting => {
                self.set_state(ProcessState::Stopped);
                self.cancel.cancel();
                return Ok(());
            }
            ProcessState::Running => self.set_state(ProcessState::Stopping),
        }

        // Wake any request blocked on the reader
        self.cancel.cancel();

        // Dropping stdin sends EOF, the conventional stdio shutdown signal
        drop(self.stdin.lock().await.take());

        let result = match self.child.lock().await.take() {
            Some(mut child) => match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!("MCP server '{}' exited: {status}", self.name);
                    Ok(())
                }
                Ok(Err(e)) => {
                    let _ = child.kill().await;
                    Err(McpError::Io(e))
                }
                Err(_) => {
                    tracing::warn!(
                        "MCP server '{}' did not exit within {}s, killing",
                        self.name,
                        SHUTDOWN_GRACE.as_secs()
                    );
                    child.kill().await.map_err(McpError::Io)
                }
            },
            None => Ok(()),
        };

        if let Some(handle) = self
            .stderr_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.stdout.lock().await.take();
        self.set_state(ProcessState::Stopped);
        result
    }
}

impl Transport for StdioTransport {
    fn initialize(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(self.spawn())
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
        TransportKind::Stdio
    }
}
