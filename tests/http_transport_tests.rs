/*
 * HTTP/SSE transport tests against a server on an ephemeral port
 */

mod mocks;

use dap_debugger_mcp::breakpoints::BreakpointRegistrar;
use dap_debugger_mcp::debug_state::DebugStateSync;
use dap_debugger_mcp::mcp_server::{serve, AppState};
use dap_debugger_mcp::mcp_tools::DebuggerTools;
use dap_debugger_mcp::session_hub::{SessionId, SessionTransportHub};
use mocks::{MockAdapter, MockWorkspace, RecordingStore};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct TestServer {
    address: SocketAddr,
    hub: Arc<SessionTransportHub>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(max_sessions: usize) -> Self {
        let adapter = Arc::new(MockAdapter::new());
        let workspace = Arc::new(MockWorkspace::new(Some("/work")));
        let store = Arc::new(RecordingStore::default());
        let debug_state = Arc::new(DebugStateSync::new(
            adapter,
            workspace.clone(),
            Duration::from_millis(100),
        ));
        let registrar = Arc::new(BreakpointRegistrar::new(workspace, store));
        let tools = DebuggerTools::new(debug_state.clone(), registrar);
        let hub = Arc::new(SessionTransportHub::new(max_sessions));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = AppState {
            hub: hub.clone(),
            tools,
            debug_state,
        };
        tokio::spawn(async move {
            let _ = serve(listener, app, async move {
                let _ = shutdown_rx.await;
            })
            .await;
        });

        Self {
            address,
            hub,
            shutdown: Some(shutdown_tx),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Incremental reader of an SSE response body
struct SseReader {
    response: reqwest::Response,
    buffer: String,
}

impl SseReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: String::new(),
        }
    }

    /// Data of the next event named `name`, skipping everything else
    async fn next_event(&mut self, name: &str) -> String {
        loop {
            while let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                let mut event = "message".to_string();
                let mut data = Vec::new();
                for line in block.lines() {
                    if let Some(value) = line.strip_prefix("event:") {
                        event = value.trim().to_string();
                    } else if let Some(value) = line.strip_prefix("data:") {
                        data.push(value.trim_start().to_string());
                    }
                }
                if event == name && !data.is_empty() {
                    return data.join("\n");
                }
            }

            let chunk = tokio::time::timeout(Duration::from_secs(5), self.response.chunk())
                .await
                .expect("timed out waiting for SSE data")
                .expect("SSE stream failed")
                .expect("SSE stream ended");
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Next protocol message carrying `id`
    async fn next_reply(&mut self, id: i64) -> Value {
        loop {
            let data = self.next_event("message").await;
            let message: Value = serde_json::from_str(&data).expect("message is JSON");
            if message["id"] == json!(id) {
                return message;
            }
        }
    }
}

async fn post_json(client: &reqwest::Client, url: &str, body: &Value) -> reqwest::Response {
    client
        .post(url)
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap()
}

async fn open_session(client: &reqwest::Client, server: &TestServer) -> (SseReader, String) {
    let response = client.get(server.url("/mcp")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let mut reader = SseReader::new(response);
    let endpoint = reader.next_event("endpoint").await;
    (reader, endpoint)
}

#[tokio::test]
async fn test_missing_session_id_is_rejected() {
    let server = TestServer::start(4).await;
    let client = reqwest::Client::new();

    let response = post_json(&client, &server.url("/messages"), &json!({})).await;

    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(response.text().await.unwrap(), "Missing sessionId parameter");
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let server = TestServer::start(4).await;
    let client = reqwest::Client::new();
    let url = server.url(&format!("/messages?sessionId={}", SessionId::new()));

    let response = post_json(&client, &url, &json!({})).await;

    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.text().await.unwrap(), "Session not found");
}

#[tokio::test]
async fn test_stream_announces_endpoint_first() {
    let server = TestServer::start(4).await;
    let client = reqwest::Client::new();

    let (_reader, endpoint) = open_session(&client, &server).await;

    let id = endpoint
        .strip_prefix("/messages?sessionId=")
        .expect("endpoint names the messages path");
    let id: SessionId = id.parse().unwrap();
    assert!(server.hub.contains(&id));
}

#[tokio::test]
async fn test_invalid_json_body_is_rejected() {
    let server = TestServer::start(4).await;
    let client = reqwest::Client::new();
    let (_reader, endpoint) = open_session(&client, &server).await;

    let response = client
        .post(server.url(&endpoint))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(response.text().await.unwrap(), "Invalid JSON body");
}

#[tokio::test]
async fn test_session_limit_refuses_stream() {
    let server = TestServer::start(1).await;
    let client = reqwest::Client::new();
    let (_reader, _endpoint) = open_session(&client, &server).await;

    let response = client.get(server.url("/mcp")).send().await.unwrap();

    assert_eq!(response.status().as_u16(), 500);
    assert_eq!(
        response.text().await.unwrap(),
        "Error establishing SSE stream"
    );
}

#[tokio::test]
async fn test_health_reports_sessions() {
    let server = TestServer::start(4).await;
    let client = reqwest::Client::new();
    let (_reader, _endpoint) = open_session(&client, &server).await;

    let response = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 1);
    assert_eq!(body["debuggee"], "idle");
}

#[tokio::test]
async fn test_mcp_round_trip_over_sse() {
    let server = TestServer::start(4).await;
    let client = reqwest::Client::new();
    let (mut reader, endpoint) = open_session(&client, &server).await;
    let messages = server.url(&endpoint);

    let response = post_json(
        &client,
        &messages,
        &json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "0.1.0"}
            }
        }),
    )
    .await;
    assert_eq!(response.status().as_u16(), 202);

    let init = reader.next_reply(1).await;
    assert_eq!(init["result"]["serverInfo"]["name"], "dap-debugger-mcp");

    let response = post_json(
        &client,
        &messages,
        &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await;
    assert_eq!(response.status().as_u16(), 202);

    post_json(
        &client,
        &messages,
        &json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await;
    let list = reader.next_reply(2).await;
    let names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect();
    assert!(names.contains(&"addBreakpoints"));
    assert!(names.contains(&"getLines"));

    post_json(
        &client,
        &messages,
        &json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "evaluate", "arguments": {"expression": "x"}}
        }),
    )
    .await;
    let call = reader.next_reply(3).await;
    assert_eq!(
        call["result"]["content"][0]["text"],
        "The debugger is not running."
    );
}

#[tokio::test]
async fn test_closed_session_is_not_routable() {
    let server = TestServer::start(4).await;
    let client = reqwest::Client::new();
    let (_reader, endpoint) = open_session(&client, &server).await;
    let id: SessionId = endpoint
        .trim_start_matches("/messages?sessionId=")
        .parse()
        .unwrap();

    assert!(server.hub.close_channel(&id));

    let response = post_json(&client, &server.url(&endpoint), &json!({})).await;
    assert_eq!(response.status().as_u16(), 404);
}
