//! Plain-text and JSON rendering of servers, tools and tool results.

use std::fmt::Write;
use toolbridge_config::LoadedConfig;
use toolbridge_mcp::{McpManager, McpToolContent, McpToolInfo, McpToolResult};

/// One line per content item.
pub fn render_result(result: &McpToolResult) -> String {
    result
        .content
        .iter()
        .map(render_content)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_content(content: &McpToolContent) -> String {
    match content {
        McpToolContent::Text { text } => text.clone(),
        McpToolContent::Image { data, mime_type } => {
            format!("[image {mime_type}, {} base64 bytes]", data.len())
        }
        McpToolContent::Audio { data, mime_type } => {
            format!("[audio {mime_type}, {} base64 bytes]", data.len())
        }
        McpToolContent::Resource { resource } => {
            match resource.get("text").and_then(|t| t.as_str()) {
                Some(text) => text.to_string(),
                None => format!(
                    "[resource {}]",
                    resource.get("uri").and_then(|u| u.as_str()).unwrap_or("?")
                ),
            }
        }
        McpToolContent::Unknown => "[unsupported content]".to_string(),
    }
}

/// Active servers first, then configured servers that did not start.
pub fn render_servers(config: &LoadedConfig, manager: &McpManager) -> String {
    let mut out = String::new();
    let summary = manager.server_summary();
    for server in &summary {
        let _ = writeln!(
            out,
            "{:<20} {:<6} {:<8} {} tools",
            server.name, server.kind, server.state, server.tool_count
        );
    }
    for descriptor in &config.servers {
        if summary.iter().any(|s| s.name == descriptor.name) {
            continue;
        }
        let status = if descriptor.enabled { "down" } else { "disabled" };
        let _ = writeln!(out, "{:<20} {:<6} {status}", descriptor.name, descriptor.kind());
    }
    for rejected in &config.rejected {
        let _ = writeln!(out, "{:<20} invalid: {}", rejected.name, rejected.reason);
    }
    if out.is_empty() {
        let _ = writeln!(out, "No MCP servers configured ({})", config.path.display());
    }
    out
}

/// `name  [server]  description` for each tool.
pub fn render_tools(tools: &[McpToolInfo], manager: &McpManager) -> String {
    let mut out = String::new();
    for tool in tools {
        let owner = manager.owner_of(&tool.name).unwrap_or("-");
        let _ = writeln!(out, "{:<24} [{owner}] {}", tool.name, tool.description);
    }
    out
}

/// Tools as a JSON array, with the owning server of each.
pub fn tools_json(tools: &[McpToolInfo], manager: &McpManager) -> serde_json::Value {
    tools
        .iter()
        .map(|tool| {
            serde_json::json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": tool.input_schema,
                "server": manager.owner_of(&tool.name),
            })
        })
        .collect()
}
