//! Plain and session HTTP transport against an in-process axum server.

mod common;

use axum::Router;
use axum::extract::{Json, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use common::Reply;
use futures_util::future::join_all;
use futures_util::stream;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use toolbridge_mcp::{ClientInfo, McpManager, McpSession, ServerDescriptor, TransportConfig};

const SESSION: &str = "sess-42";

#[derive(Clone, Default)]
struct MockState {
    /// Hand out a session id on `initialize`.
    stateful: bool,
    /// Reply to `echo` on the push stream instead of in the body.
    push_replies: bool,
    /// Reply to `echo` as an event-stream body.
    stream_replies: bool,
    /// Session header seen on each POST, in arrival order.
    seen_sessions: Arc<Mutex<Vec<Option<String>>>>,
    /// Authorization header seen on each POST.
    seen_auth: Arc<Mutex<Vec<Option<String>>>>,
    push: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn handle_post(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state
        .seen_sessions
        .lock()
        .unwrap()
        .push(header_value(&headers, "mcp-session-id"));
    state
        .seen_auth
        .lock()
        .unwrap()
        .push(header_value(&headers, "authorization"));

    let is_initialize = body["method"] == "initialize";
    let is_echo = body["params"]["name"] == "echo";

    let reply = match common::reply_for("http-mock", &body) {
        Reply::Now(reply) => reply,
        Reply::After(delay, reply) => {
            tokio::time::sleep(delay).await;
            reply
        }
        Reply::Never | Reply::Stall => {
            if body.get("id").is_none() {
                return StatusCode::ACCEPTED.into_response();
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
            return StatusCode::ACCEPTED.into_response();
        }
        Reply::Hangup => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    if is_echo && state.push_replies {
        let push = Arc::clone(&state.push);
        tokio::spawn(async move {
            // The client opens the push stream in the background; wait for it
            for _ in 0..100 {
                let sender = push.lock().unwrap().clone();
                if let Some(tx) = sender {
                    let _ = tx.send(reply.to_string());
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });
        return StatusCode::ACCEPTED.into_response();
    }

    if is_echo && state.stream_replies {
        let progress = json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {}});
        let body = format!("event: message\ndata: {progress}\n\nevent: message\ndata: {reply}\n\n");
        return ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response();
    }

    let mut response = Json(reply).into_response();
    if is_initialize && state.stateful {
        response.headers_mut().insert(
            "mcp-session-id",
            axum::http::HeaderValue::from_static(SESSION),
        );
    }
    response
}

async fn handle_get(State(state): State<MockState>, headers: HeaderMap) -> Response {
    if !state.stateful || header_value(&headers, "mcp-session-id").as_deref() != Some(SESSION) {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    *state.push.lock().unwrap() = Some(tx);
    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|data| (Ok::<_, Infallible>(Event::default().data(data)), rx))
    });
    Sse::new(events).into_response()
}

async fn handle_delete(State(state): State<MockState>, headers: HeaderMap) -> StatusCode {
    if let Some(id) = header_value(&headers, "mcp-session-id") {
        state.deleted.lock().unwrap().push(id);
    }
    StatusCode::OK
}

async fn mock_server(state: MockState) -> String {
    let router = Router::new()
        .route("/mcp", post(handle_post).get(handle_get).delete(handle_delete))
        .with_state(state);
    format!("{}/mcp", common::serve(router).await)
}

async fn ready_session(url: &str, timeout_ms: u64) -> McpSession {
    let descriptor = ServerDescriptor::http("remote", url).with_timeout_ms(timeout_ms);
    let session = McpSession::from_descriptor(&descriptor);
    let info = session.initialize(&ClientInfo::default()).await.unwrap();
    assert_eq!(info.name, "http-mock");
    session
}

#[tokio::test]
async fn stateless_request_response() {
    let state = MockState::default();
    let url = mock_server(state.clone()).await;
    let session = ready_session(&url, 5000).await;

    let tools = session.list_tools().await.unwrap();
    assert_eq!(tools[0].name, "echo");

    let result = session.call_tool("echo", json!({"text": "plain"})).await.unwrap();
    assert_eq!(result.text_content(), "http-mock: plain");

    // initialize, notifications/initialized, tools/list, tools/call
    let seen = state.seen_sessions.lock().unwrap().clone();
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(Option::is_none));
    session.close().await.unwrap();
    assert!(state.deleted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn custom_headers_are_sent() {
    let state = MockState::default();
    let url = mock_server(state.clone()).await;

    let mut descriptor = ServerDescriptor::http("remote", &url);
    if let TransportConfig::Http { headers, .. } = &mut descriptor.transport {
        headers.insert("Authorization".to_string(), "Bearer t0ken".to_string());
    }
    let session = McpSession::from_descriptor(&descriptor);
    session.initialize(&ClientInfo::default()).await.unwrap();

    let auth = state.seen_auth.lock().unwrap().clone();
    assert!(!auth.is_empty());
    assert!(auth.iter().all(|a| a.as_deref() == Some("Bearer t0ken")));
    session.close().await.unwrap();
}

#[tokio::test]
async fn session_id_is_echoed_and_deleted_on_close() {
    let state = MockState {
        stateful: true,
        ..MockState::default()
    };
    let url = mock_server(state.clone()).await;
    let session = ready_session(&url, 5000).await;
    session.call_tool("echo", json!({"text": "x"})).await.unwrap();

    let seen = state.seen_sessions.lock().unwrap().clone();
    assert_eq!(seen[0], None);
    assert!(seen[1..].iter().all(|s| s.as_deref() == Some(SESSION)));

    session.close().await.unwrap();
    assert_eq!(state.deleted.lock().unwrap().as_slice(), [SESSION]);
}

#[tokio::test]
async fn reply_on_push_stream() {
    let state = MockState {
        stateful: true,
        push_replies: true,
        ..MockState::default()
    };
    let url = mock_server(state).await;
    let session = ready_session(&url, 5000).await;

    let result = session.call_tool("echo", json!({"text": "pushed"})).await.unwrap();
    assert_eq!(result.text_content(), "http-mock: pushed");
    session.close().await.unwrap();
}

#[tokio::test]
async fn reply_as_event_stream_body() {
    let state = MockState {
        stream_replies: true,
        ..MockState::default()
    };
    let url = mock_server(state).await;
    let session = ready_session(&url, 5000).await;

    let result = session.call_tool("echo", json!({"text": "streamed"})).await.unwrap();
    assert_eq!(result.text_content(), "http-mock: streamed");
    session.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_requests_are_independent() {
    let url = mock_server(MockState::default()).await;
    let session = ready_session(&url, 5000).await;

    let texts: Vec<String> = (0..6).map(|i| format!("msg-{i}")).collect();
    let results = join_all(texts.iter().enumerate().map(|(i, text)| {
        let tool = if i % 2 == 0 { "slow" } else { "echo" };
        session.call_tool(tool, json!({ "text": text }))
    }))
    .await;

    for (text, result) in texts.iter().zip(results) {
        assert_eq!(result.unwrap().text_content(), format!("http-mock: {text}"));
    }
    session.close().await.unwrap();
}

#[tokio::test]
async fn timeout_then_next_request_succeeds() {
    let url = mock_server(MockState::default()).await;
    let session = ready_session(&url, 400).await;

    let err = session.call_tool("never", json!({})).await.unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");

    let result = session.call_tool("echo", json!({"text": "ok"})).await.unwrap();
    assert_eq!(result.text_content(), "http-mock: ok");
    session.close().await.unwrap();
}

#[tokio::test]
async fn server_error_status_is_reported() {
    let url = mock_server(MockState::default()).await;
    let session = ready_session(&url, 5000).await;

    let err = session.call_tool("hangup", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("500"), "got {err}");
    // HTTP errors are per request, the session stays usable
    assert!(session.is_ready());
    session.close().await.unwrap();
}

#[tokio::test]
async fn manager_mixes_http_with_unreachable_server() {
    let url = mock_server(MockState::default()).await;
    let mut unreachable = ServerDescriptor::http("down", "http://127.0.0.1:9/mcp");
    unreachable.timeout_ms = 1000;
    let descriptors = vec![unreachable, ServerDescriptor::http("up", &url)];

    let mut manager = McpManager::start(&descriptors, &ClientInfo::default()).await;
    assert_eq!(manager.server_names(), ["up"]);
    assert_eq!(manager.owner_of("echo"), Some("up"));

    let summary = manager.server_summary();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].tool_count, common::tools().as_array().unwrap().len());

    let tools: HashMap<_, _> = manager
        .all_tools()
        .await
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect();
    assert!(tools.contains_key("slow"));
    manager.close().await;
}
