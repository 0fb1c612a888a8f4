// Protocol bridge against in-process MCP servers (axum)

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use matrix::config::MatrixConfig;
use matrix::mcp::Bridge;
use matrix::runtime::RunnerDescriptor;
use matrix::tools::CallInput;
use matrix::{Matrix, MatrixError};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct ServerState {
    stream: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

fn tools() -> Value {
    json!([
        {
            "name": "chat",
            "description": "Say something",
            "inputSchema": {"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]}
        },
        {
            "name": "search",
            "inputSchema": {"type": "object", "properties": {"q": {"type": "string"}, "limit": {"type": "integer"}}}
        }
    ])
}

/// JSON-RPC reply for one request; None for notifications
fn respond(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let result = match request["method"].as_str().unwrap_or_default() {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "hello-sse", "version": "1.0.0"}
        }),
        "tools/list" => json!({ "tools": tools() }),
        "tools/call" => {
            let args = &request["params"]["arguments"];
            json!({"content": [{"type": "text", "text": format!("echo: {}", args)}]})
        }
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("unknown method {}", other)}
            }))
        }
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

async fn sse_stream(
    State(state): State<ServerState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    *state.stream.lock().await = Some(tx);

    let endpoint = Event::default()
        .event("endpoint")
        .data("/messages/?session_id=test");
    let messages = stream::unfold(rx, |mut rx| async move {
        let message = rx.recv().await?;
        Some((Ok(Event::default().event("message").data(message)), rx))
    });
    Sse::new(stream::once(async move { Ok(endpoint) }).chain(messages))
}

async fn post_message(State(state): State<ServerState>, Json(request): Json<Value>) -> StatusCode {
    if let Some(reply) = respond(&request) {
        if let Some(tx) = state.stream.lock().await.as_ref() {
            let _ = tx.send(reply.to_string());
        }
    }
    StatusCode::ACCEPTED
}

async fn ws_upgrade(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(serve_socket)
}

async fn serve_socket(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        if let Some(reply) = respond(&request) {
            if socket.send(WsMessage::Text(reply.to_string())).await.is_err() {
                return;
            }
        }
    }
}

/// Serves SSE on /sse/ (POSTs on /messages/) and WebSocket on /ws
async fn spawn_server() -> String {
    let app = Router::new()
        .route("/sse/", get(sse_stream))
        .route("/messages/", axum::routing::post(post_message))
        .route("/ws", get(ws_upgrade))
        .with_state(ServerState::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("127.0.0.1:{}", addr.port())
}

#[tokio::test]
async fn test_probe_sse() {
    let addr = spawn_server().await;
    let report = Bridge::default()
        .probe(&format!("http://{}/sse", addr), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(report.url, format!("http://{}/sse/", addr));
    assert!(!report.used_fallback);
    assert_eq!(report.server_info.unwrap().name, "hello-sse");
    let names: Vec<_> = report.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["chat", "search"]);
}

#[tokio::test]
async fn test_probe_messages_url_falls_back_to_sse() {
    let addr = spawn_server().await;
    let report = Bridge::default()
        .probe(&format!("http://{}/messages/", addr), TIMEOUT)
        .await
        .unwrap();

    assert!(report.used_fallback);
    assert_eq!(report.url, format!("http://{}/sse/", addr));
}

#[tokio::test]
async fn test_nothing_listening_names_both_urls() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = Bridge::default()
        .probe(&format!("http://127.0.0.1:{}/sse/", port), TIMEOUT)
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(matches!(err, MatrixError::TransportUnreachable { .. }));
    assert!(message.contains("/sse/"));
    assert!(message.contains("/messages/"));
}

#[tokio::test]
async fn test_call_infers_single_required_field() {
    let addr = spawn_server().await;
    let home = TempDir::new().unwrap();
    let matrix = Matrix::from_config(MatrixConfig::new(home.path())).unwrap();

    let outcome = matrix
        .call(
            "chat",
            None,
            Some(&format!("http://{}/sse/", addr)),
            &CallInput::text("Hi"),
            Some(TIMEOUT),
        )
        .await
        .unwrap();
    assert_eq!(outcome.text, r#"echo: {"query":"Hi"}"#);
}

#[tokio::test]
async fn test_call_unknown_tool_lists_all() {
    let addr = spawn_server().await;
    let err = Bridge::default()
        .call("nope", &format!("http://{}/sse/", addr), json!({}), TIMEOUT)
        .await
        .unwrap_err();

    match err {
        MatrixError::UnknownTool { tool, available } => {
            assert_eq!(tool, "nope");
            assert_eq!(available, vec!["chat", "search"]);
        }
        other => panic!("expected UnknownTool, got {:?}", other),
    }
}

#[tokio::test]
async fn test_do_task_picks_the_accepting_tool() {
    let addr = spawn_server().await;
    let home = TempDir::new().unwrap();
    let matrix = Matrix::from_config(MatrixConfig::new(home.path())).unwrap();
    let url = format!("http://{}/sse/", addr);

    // Both tools take text, so the tool must be named
    let err = matrix
        .do_task(None, Some(&url), &CallInput::text("rust"), None, Some(TIMEOUT))
        .await
        .unwrap_err();
    assert!(matches!(err, MatrixError::AmbiguousInput { .. }));

    let outcome = matrix
        .do_task(
            None,
            Some(&url),
            &CallInput::text("rust"),
            Some("search"),
            Some(TIMEOUT),
        )
        .await
        .unwrap();
    assert_eq!(outcome.text, r#"echo: {"q":"rust"}"#);
}

#[tokio::test]
async fn test_websocket_transport() {
    let addr = spawn_server().await;
    let url = format!("ws://{}/ws", addr);

    let report = Bridge::default().probe(&url, TIMEOUT).await.unwrap();
    assert_eq!(report.url, url);
    assert_eq!(report.tools.len(), 2);

    let outcome = Bridge::default()
        .call("chat", &url, json!({"query": "over ws"}), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(outcome.text, r#"echo: {"query":"over ws"}"#);
}

#[tokio::test]
async fn test_do_task_uses_declared_tool_hints() {
    let addr = spawn_server().await;
    let home = TempDir::new().unwrap();
    let matrix = Matrix::from_config(MatrixConfig::new(home.path())).unwrap();

    let mut descriptor = RunnerDescriptor::connector(&format!("http://{}/sse/", addr));
    descriptor.tools = vec!["search".to_string()];
    let target = home.path().join("runners").join("svc");
    descriptor.save(&target).unwrap();
    matrix.alias_add("svc", "mcp_server:svc@1.0.0", target).unwrap();
    matrix.run("svc", None).await.unwrap();

    let outcome = matrix
        .do_task(Some("svc"), None, &CallInput::text("rust"), None, Some(TIMEOUT))
        .await
        .unwrap();
    assert_eq!(outcome.text, r#"echo: {"q":"rust"}"#);
}
