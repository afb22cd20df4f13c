//! MCP manager: orchestrates multiple MCP server sessions.
//!
//! Startup runs two fan-out/fan-in phases, initialization and tool discovery,
//! each waiting for every server before moving on. A server that fails is
//! logged and left out; the rest keep working.

use crate::config::{ServerDescriptor, TransportKind};
use crate::session::{ClientInfo, McpSession, McpToolInfo, McpToolResult, SessionState};
use crate::transport::{self, Transport};
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};

/// One row of [`McpManager::server_summary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSummary {
    pub name: String,
    pub kind: TransportKind,
    pub state: SessionState,
    /// Tools this server owns in the routing table.
    pub tool_count: usize,
}

/// Manages sessions with multiple MCP servers.
pub struct McpManager {
    /// Active sessions, in configuration order.
    sessions: Vec<McpSession>,
    /// Tool name to owning server name.
    routes: HashMap<String, String>,
}

impl McpManager {
    /// Start every enabled, valid server with its configured transport.
    pub async fn start(descriptors: &[ServerDescriptor], client: &ClientInfo) -> Self {
        Self::start_with(descriptors, client, transport::connect).await
    }

    /// Start servers using `factory` to build each transport.
    ///
    /// Servers that fail to start are logged and skipped. The manager is
    /// usable with whatever subset succeeded, possibly none.
    pub async fn start_with<F>(
        descriptors: &[ServerDescriptor],
        client: &ClientInfo,
        factory: F,
    ) -> Self
    where
        F: Fn(&ServerDescriptor) -> Box<dyn Transport>,
    {
        let candidates = select_descriptors(descriptors);
        let sessions: Vec<McpSession> = candidates
            .iter()
            .map(|d| McpSession::new(d.name.clone(), factory(d)))
            .collect();

        // Phase 1: initialize everything in parallel
        let outcomes = join_all(sessions.iter().map(|session| async move {
            let result = session.initialize(client).await;
            if result.is_err() {
                // Release whatever the transport managed to acquire
                if let Err(e) = session.close().await {
                    tracing::debug!("Cleanup of '{}' failed: {e}", session.name());
                }
            }
            result
        }))
        .await;

        let mut active = Vec::with_capacity(sessions.len());
        for (session, outcome) in sessions.into_iter().zip(outcomes) {
            match outcome {
                Ok(_) => active.push(session),
                Err(e) => {
                    tracing::warn!("Failed to start MCP server '{}': {e}", session.name());
                }
            }
        }

        // Phase 2: discover catalogs in parallel, merge in configuration order
        let catalogs = join_all(active.iter().map(|s| s.list_tools())).await;
        let mut routes = HashMap::new();
        for (session, catalog) in active.iter().zip(catalogs) {
            let tools = match catalog {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!("Failed to list tools of MCP server '{}': {e}", session.name());
                    continue;
                }
            };
            let mut owned = 0;
            for tool in tools {
                if let Some(owner) = routes.get(&tool.name) {
                    tracing::warn!(
                        "Tool '{}' from MCP server '{}' is already provided by '{owner}'",
                        tool.name,
                        session.name()
                    );
                    continue;
                }
                routes.insert(tool.name, session.name().to_string());
                owned += 1;
            }
            tracing::info!("MCP server '{}' started ({owned} tools)", session.name());
        }

        Self {
            sessions: active,
            routes,
        }
    }

    fn session(&self, name: &str) -> Option<&McpSession> {
        self.sessions.iter().find(|s| s.name() == name)
    }

    /// Fetch the current catalogs of all ready sessions.
    ///
    /// Catalogs are fetched live and merged in configuration order; a tool
    /// name seen twice keeps its first occurrence.
    pub async fn all_tools(&self) -> Vec<McpToolInfo> {
        let ready: Vec<&McpSession> = self.sessions.iter().filter(|s| s.is_ready()).collect();
        let catalogs = join_all(ready.iter().map(|s| s.list_tools())).await;

        let mut seen = HashSet::new();
        let mut tools = Vec::new();
        for (session, catalog) in ready.iter().zip(catalogs) {
            match catalog {
                Ok(catalog) => {
                    tools.extend(catalog.into_iter().filter(|t| seen.insert(t.name.clone())));
                }
                Err(e) => {
                    tracing::warn!("Failed to list tools of MCP server '{}': {e}", session.name());
                }
            }
        }
        tools
    }

    /// Call a tool by name. Every failure comes back as an error result.
    pub async fn call_tool(&self, tool_name: &str, arguments: serde_json::Value) -> McpToolResult {
        let Some(server) = self.routes.get(tool_name) else {
            return McpToolResult::error(format!("Unknown MCP tool '{tool_name}'"));
        };
        let Some(session) = self.session(server) else {
            return McpToolResult::error(format!(
                "MCP server '{server}' for tool '{tool_name}' is not available"
            ));
        };

        match session.call_tool(tool_name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("MCP tool '{tool_name}' on '{server}' failed: {e}");
                McpToolResult::error(format!("MCP tool '{tool_name}' failed: {e}"))
            }
        }
    }

    /// Whether at least one session can take calls.
    pub fn is_available(&self) -> bool {
        self.sessions.iter().any(|s| s.is_ready())
    }

    /// Name of the server that owns `tool_name`.
    pub fn owner_of(&self, tool_name: &str) -> Option<&str> {
        self.routes.get(tool_name).map(String::as_str)
    }

    /// Names of the active servers, in configuration order.
    pub fn server_names(&self) -> Vec<&str> {
        self.sessions.iter().map(|s| s.name()).collect()
    }

    /// Number of active sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Active servers with their transport, state and routed tool count.
    pub fn server_summary(&self) -> Vec<ServerSummary> {
        self.sessions
            .iter()
            .map(|s| ServerSummary {
                name: s.name().to_string(),
                kind: s.kind(),
                state: s.state(),
                tool_count: self.routes.values().filter(|owner| *owner == s.name()).count(),
            })
            .collect()
    }

    /// Close all sessions concurrently. Failures are logged, never propagated.
    pub async fn close(&mut self) {
        let sessions = std::mem::take(&mut self.sessions);
        self.routes.clear();

        let results = join_all(sessions.iter().map(|s| s.close())).await;
        for (session, result) in sessions.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("Failed to close MCP server '{}': {e}", session.name());
            }
        }
    }
}

/// Keep enabled, valid descriptors; the first of any duplicate name wins.
fn select_descriptors(descriptors: &[ServerDescriptor]) -> Vec<&ServerDescriptor> {
    let mut names = HashSet::new();
    let mut selected = Vec::new();
    for descriptor in descriptors {
        if !descriptor.enabled {
            tracing::debug!("Skipping disabled MCP server '{}'", descriptor.name);
            continue;
        }
        if let Err(e) = descriptor.validate() {
            tracing::warn!("Skipping MCP server: {e}");
            continue;
        }
        if !names.insert(descriptor.name.as_str()) {
            tracing::warn!(
                "Skipping duplicate MCP server name '{}'; keeping the first",
                descriptor.name
            );
            continue;
        }
        selected.push(descriptor);
    }
    selected
}
