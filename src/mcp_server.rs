/*
 * DAP Debugger MCP Server - HTTP/SSE and stdio transports
 * Copyright (C) 2025 ladvien
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::Stream;
use rmcp::serve_server;
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::debug_state::DebugStateSync;
use crate::error::{Error, Result};
use crate::mcp_tools::DebuggerTools;
use crate::session_hub::{
    HubError, SessionChannel, SessionEvent, SessionId, SessionTransportHub,
};

/// In-memory pipe size between a session's bridge and its protocol handler
const SESSION_PIPE_BYTES: usize = 64 * 1024;

/// Shared handles for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SessionTransportHub>,
    pub tools: DebuggerTools,
    pub debug_state: Arc<DebugStateSync>,
}

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/mcp", get(sse_handler))
        .route("/messages", post(messages_handler))
        .route("/health", get(health_handler))
        .with_state(app)
}

/// Serve `app` on an already bound listener until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    app: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let hub = app.hub.clone();
    axum::serve(listener, router(app))
        .with_graceful_shutdown(async move {
            shutdown.await;
            // Open SSE streams end once their sessions are gone.
            let closed = hub.close_all();
            info!("Closed {} session(s) for shutdown", closed);
        })
        .await?;
    Ok(())
}

/// SSE body of one session; closes the session when the client goes away
struct SessionStream {
    id: SessionId,
    hub: Arc<SessionTransportHub>,
    outbound: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Stream for SessionStream {
    type Item = std::result::Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.outbound.poll_recv(cx).map(|event| {
            event.map(|event| {
                Ok(Event::default()
                    .event(event.event_name())
                    .data(event.data()))
            })
        })
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        if self.hub.close_channel(&self.id) {
            debug!("Client of session {} disconnected", self.id);
        }
    }
}

async fn sse_handler(State(app): State<AppState>) -> Response {
    info!("Received GET /mcp, establishing SSE stream");

    let SessionChannel {
        id,
        inbound,
        outbound,
        cancel,
    } = match app.hub.open_channel() {
        Ok(channel) => channel,
        Err(e) => {
            error!("Error establishing SSE stream: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error establishing SSE stream",
            )
                .into_response();
        }
    };

    tokio::spawn(serve_session(
        app.hub.clone(),
        app.tools.clone(),
        id,
        inbound,
        cancel,
    ));

    let stream = SessionStream {
        id,
        hub: app.hub.clone(),
        outbound,
    };
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn messages_handler(
    State(app): State<AppState>,
    Query(query): Query<MessagesQuery>,
    body: Bytes,
) -> Response {
    let session_id = query.session_id.as_deref().filter(|id| !id.is_empty());
    let Some(raw_id) = session_id else {
        warn!("POST /messages without a session id");
        return hub_error_response(HubError::MissingSessionId);
    };

    let known = raw_id
        .parse::<SessionId>()
        .is_ok_and(|id| app.hub.contains(&id));
    if !known {
        warn!("No active session for id {}", raw_id);
        return hub_error_response(HubError::SessionNotFound);
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Invalid JSON body for session {}: {}", raw_id, e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON body").into_response();
        }
    };

    match app.hub.route_request(Some(raw_id), payload) {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(e) => hub_error_response(e),
    }
}

fn hub_error_response(error: HubError) -> Response {
    match error {
        HubError::MissingSessionId => {
            (StatusCode::BAD_REQUEST, "Missing sessionId parameter").into_response()
        }
        HubError::SessionNotFound => (StatusCode::NOT_FOUND, "Session not found").into_response(),
        HubError::CapacityExceeded { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Error handling request").into_response()
        }
    }
}

async fn health_handler(State(app): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": app.hub.len(),
        "maxSessions": app.hub.max_sessions(),
        "debuggee": app.debug_state.run_state().await,
    }))
}

/// Run one MCP protocol handler for a session.
///
/// The handler speaks newline-delimited JSON-RPC over an in-memory pipe;
/// this task feeds it the session's inbound requests and pushes every line
/// it writes back to the client.
async fn serve_session(
    hub: Arc<SessionTransportHub>,
    tools: DebuggerTools,
    id: SessionId,
    mut inbound: mpsc::UnboundedReceiver<Value>,
    cancel: CancellationToken,
) {
    let (server_io, bridge_io) = tokio::io::duplex(SESSION_PIPE_BYTES);
    let (server_read, server_write) = tokio::io::split(server_io);

    // serve_server waits for the client's initialize, which only arrives
    // through the bridge below.
    let handler = tokio::spawn(async move {
        match serve_server(tools, (server_read, server_write)).await {
            Ok(running) => {
                if let Err(e) = running.waiting().await {
                    warn!("MCP session {} handler ended with error: {}", id, e);
                }
            }
            Err(e) => warn!("MCP session {} failed to initialize: {}", id, e),
        }
    });

    let (bridge_read, mut bridge_write) = tokio::io::split(bridge_io);
    let mut lines = BufReader::new(bridge_read).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Session {} cancelled", id);
                break;
            }
            request = inbound.recv() => {
                let Some(request) = request else { break };
                let mut frame = match serde_json::to_vec(&request) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Dropping unserializable request for session {}: {}", id, e);
                        continue;
                    }
                };
                frame.push(b'\n');
                if let Err(e) = bridge_write.write_all(&frame).await {
                    warn!("Session {} handler is gone: {}", id, e);
                    break;
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if hub.push(&id, SessionEvent::Message(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Session {} handler finished", id);
                    break;
                }
                Err(e) => {
                    warn!("Reading from session {} handler failed: {}", id, e);
                    break;
                }
            },
        }
    }

    hub.close_channel(&id);
    handler.abort();
}

/// Owns the pieces needed to run either transport
pub struct McpServer {
    config: Config,
    tools: DebuggerTools,
    debug_state: Arc<DebugStateSync>,
    hub: Arc<SessionTransportHub>,
}

impl McpServer {
    pub fn new(config: Config, tools: DebuggerTools, debug_state: Arc<DebugStateSync>) -> Self {
        let hub = Arc::new(SessionTransportHub::new(config.max_sessions));
        Self {
            config,
            tools,
            debug_state,
            hub,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            hub: self.hub.clone(),
            tools: self.tools.clone(),
            debug_state: self.debug_state.clone(),
        }
    }

    /// Serve MCP over HTTP: `GET /mcp` streams, `POST /messages` receives
    pub async fn run_http(self) -> Result<()> {
        let address = self.config.bind_address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            Error::Connection(format!("Failed to bind {}: {}", address, e))
        })?;
        info!("MCP HTTP/SSE server listening on {}", address);

        serve(listener, self.app_state(), shutdown_signal()).await
    }

    /// Run a single MCP session over stdin/stdout
    pub async fn run_stdio(self) -> Result<()> {
        info!("Starting MCP server in stdio mode");

        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();

        let running = serve_server(self.tools, (stdin, stdout))
            .await
            .map_err(|e| Error::Mcp(format!("MCP stdio server failed: {}", e)))?;

        let cancel_token = running.cancellation_token();
        let mut wait_handle = tokio::spawn(running.waiting());

        tokio::select! {
            result = (&mut wait_handle) => {
                match result {
                    Ok(Ok(_)) => {
                        info!("MCP stdio server completed successfully");
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        error!("MCP stdio server error: {}", e);
                        Err(Error::Mcp(format!("MCP stdio server failed: {}", e)))
                    }
                    Err(e) => {
                        error!("MCP stdio server task error: {}", e);
                        Err(Error::Mcp(format!("MCP stdio server failed: {}", e)))
                    }
                }
            }
            _ = shutdown_signal() => {
                info!("Graceful shutdown requested");
                cancel_token.cancel();
                let _ = wait_handle.await;
                Ok(())
            }
        }
    }
}

/// Resolves on SIGTERM or SIGINT (Ctrl-C elsewhere)
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                    _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
                }
                return;
            }
            _ => warn!("Failed to install signal handlers, falling back to Ctrl-C"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl-C, shutting down gracefully");
}
