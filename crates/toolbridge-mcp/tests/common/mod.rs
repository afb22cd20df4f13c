//! Shared pieces for the mock MCP servers used by the network transport tests.

#![allow(dead_code)]

use serde_json::{Value, json};
use std::time::Duration;

/// How a mock server answers one incoming message.
pub enum Reply {
    /// Answer right away.
    Now(Value),
    /// Answer after a delay.
    After(Duration, Value),
    /// Never answer (notifications, or the `never` tool).
    Never,
    /// Close the response channel without answering.
    Hangup,
    /// Hold the incoming POST open instead of accepting it.
    Stall,
}

/// Tools every mock server advertises.
pub fn tools() -> Value {
    json!([
        {"name": "echo", "description": "Echo the text argument",
         "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}},
        {"name": "slow", "description": "Echo after a delay"},
        {"name": "never", "description": "Never answers"},
        {"name": "hangup", "description": "Drops the connection"},
        {"name": "stall", "description": "Never finishes accepting the request"},
        {"name": "fail", "description": "Always fails"}
    ])
}

fn text(id: &Value, text: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {"content": [{"type": "text", "text": text}], "isError": false}
    })
}

/// Decide the reply of a well-behaved MCP server named `server`.
pub fn reply_for(server: &str, message: &Value) -> Reply {
    let Some(id) = message.get("id") else {
        return Reply::Never;
    };
    let method = message["method"].as_str().unwrap_or_default();
    match method {
        "initialize" => Reply::Now(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": server, "version": "9.9.9"}
            }
        })),
        "tools/list" => Reply::Now(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"tools": tools()}
        })),
        "tools/call" => {
            let tool = message["params"]["name"].as_str().unwrap_or_default();
            let arg = message["params"]["arguments"]["text"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            match tool {
                "echo" => Reply::Now(text(id, format!("{server}: {arg}"))),
                "slow" => Reply::After(
                    Duration::from_millis(300),
                    text(id, format!("{server}: {arg}")),
                ),
                "never" => Reply::Never,
                "hangup" => Reply::Hangup,
                "stall" => Reply::Stall,
                _ => Reply::Now(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32603, "message": "tool exploded"}
                })),
            }
        }
        other => Reply::Now(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": format!("method not found: {other}")}
        })),
    }
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}
