/*
 * DAP Debugger MCP Server - Debug Adapter Client
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

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::codec::{DapReader, DapWriter};
use super::messages::{
    EvaluateBody, IncomingMessage, OutgoingResponse, Request, Response, StackTraceBody,
    ThreadsBody,
};
use crate::breakpoints::{BreakpointStore, SourceBreakpoint};
use crate::config::AdapterConfig;
use crate::debug_adapter::{
    AdapterEvent, ControlAction, DebugAdapter, EvaluateContext, EvaluateOutcome, EventFanout,
    StackFrame,
};
use crate::error::{Error, Result};

type PendingRequests = Arc<DashMap<i64, oneshot::Sender<Response>>>;
type SharedWriter = Arc<Mutex<DapWriter<OwnedWriteHalf>>>;

/// One live TCP connection to the adapter
struct DapConnection {
    writer: SharedWriter,
    pending: PendingRequests,
    next_seq: Arc<AtomicI64>,
    reader_task: JoinHandle<()>,
}

impl DapConnection {
    /// Write a request now; the receiver resolves with its response
    async fn send(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<oneshot::Receiver<Response>> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(seq, tx);

        debug!("DAP -> {} (seq {})", command, seq);
        let request = Request::new(seq, command, arguments);
        if let Err(e) = self.writer.lock().await.write_message(&request).await {
            self.pending.remove(&seq);
            return Err(e);
        }
        Ok(rx)
    }

    async fn request(&self, command: &str, arguments: Option<Value>) -> Result<Response> {
        let rx = self.send(command, arguments).await?;
        await_response(command, rx).await
    }

    /// Send a request and turn an unsuccessful response into an error
    async fn request_ok(&self, command: &str, arguments: Option<Value>) -> Result<Option<Value>> {
        let response = self.request(command, arguments).await?;
        into_body(response)
    }
}

async fn await_response(command: &str, rx: oneshot::Receiver<Response>) -> Result<Response> {
    rx.await.map_err(|_| {
        Error::Connection(format!(
            "Debug adapter closed the connection before answering '{command}'"
        ))
    })
}

fn into_body(response: Response) -> Result<Option<Value>> {
    if response.success {
        Ok(response.body)
    } else {
        Err(Error::Adapter(response.error_text()))
    }
}

impl Drop for DapConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Client for a debug adapter listening on TCP.
///
/// Also acts as the breakpoint store: breakpoints are kept per file, replayed
/// while a new session is being configured, and pushed immediately when a
/// session is live.
pub struct DapClient {
    config: AdapterConfig,
    connection: RwLock<Option<Arc<DapConnection>>>,
    active: Arc<AtomicBool>,
    events: Arc<EventFanout>,
    breakpoints: DashMap<PathBuf, BTreeMap<u32, bool>>,
}

impl std::fmt::Debug for DapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DapClient")
            .field("address", &self.config.address())
            .field("active", &self.is_active())
            .field("breakpoint_files", &self.breakpoints.len())
            .finish()
    }
}

impl DapClient {
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            config,
            connection: RwLock::new(None),
            active: Arc::new(AtomicBool::new(false)),
            events: Arc::new(EventFanout::new()),
            breakpoints: DashMap::new(),
        }
    }

    async fn current_connection(&self) -> Result<Arc<DapConnection>> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Adapter("No active debug session".to_string()))
    }

    async fn connect(&self, initialized: Arc<Notify>) -> Result<Arc<DapConnection>> {
        let address = self.config.address();
        let stream = TcpStream::connect(&address).await.map_err(|e| {
            Error::Connection(format!("Cannot reach debug adapter at {address}: {e}"))
        })?;
        let (read_half, write_half) = stream.into_split();

        let writer: SharedWriter = Arc::new(Mutex::new(DapWriter::new(write_half)));
        let pending: PendingRequests = Arc::new(DashMap::new());
        let next_seq = Arc::new(AtomicI64::new(1));

        let reader_task = tokio::spawn(read_loop(
            DapReader::new(read_half),
            ReadLoopContext {
                writer: writer.clone(),
                pending: pending.clone(),
                next_seq: next_seq.clone(),
                events: self.events.clone(),
                active: self.active.clone(),
                initialized,
            },
        ));

        info!("Connected to debug adapter at {}", address);
        Ok(Arc::new(DapConnection {
            writer,
            pending,
            next_seq,
            reader_task,
        }))
    }

    async fn configure_and_launch(
        &self,
        conn: &Arc<DapConnection>,
        initialized: Arc<Notify>,
    ) -> Result<()> {
        conn.request_ok(
            "initialize",
            Some(json!({
                "clientID": "dap-debugger-mcp",
                "clientName": "DAP Debugger MCP",
                "adapterID": self.config.adapter_id,
                "linesStartAt1": true,
                "columnsStartAt1": true,
                "pathFormat": "path",
            })),
        )
        .await?;

        // Adapters may hold the launch response until configurationDone.
        let launch = conn
            .send("launch", Some(self.config.launch_arguments.clone()))
            .await?;

        if tokio::time::timeout(self.config.launch_timeout, initialized.notified())
            .await
            .is_err()
        {
            return Err(Error::Timeout(format!(
                "Debug adapter did not send 'initialized' within {:?}",
                self.config.launch_timeout
            )));
        }

        let files: Vec<PathBuf> = self.breakpoints.iter().map(|e| e.key().clone()).collect();
        for path in files {
            if let Err(e) = self.sync_file_breakpoints(conn, &path).await {
                warn!("Failed to set breakpoints for {}: {}", path.display(), e);
            }
        }

        conn.request_ok("configurationDone", None).await?;

        into_body(await_response("launch", launch).await?)?;
        Ok(())
    }

    async fn sync_file_breakpoints(&self, conn: &DapConnection, path: &Path) -> Result<()> {
        let lines: Vec<u32> = self
            .breakpoints
            .get(path)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|(_, enabled)| **enabled)
                    .map(|(line, _)| line + 1)
                    .collect()
            })
            .unwrap_or_default();

        let breakpoints: Vec<Value> = lines.iter().map(|line| json!({ "line": line })).collect();
        conn.request_ok(
            "setBreakpoints",
            Some(json!({
                "source": { "path": path.to_string_lossy() },
                "breakpoints": breakpoints,
                "lines": lines,
            })),
        )
        .await?;
        Ok(())
    }

    async fn thread_ids(&self, conn: &DapConnection) -> Result<Vec<i64>> {
        let body = conn.request_ok("threads", None).await?;
        let threads: ThreadsBody = serde_json::from_value(body.unwrap_or(Value::Null))?;
        Ok(threads.threads.into_iter().map(|thread| thread.id).collect())
    }

    async fn first_thread(&self, conn: &DapConnection) -> Result<i64> {
        self.thread_ids(conn)
            .await?
            .first()
            .copied()
            .ok_or_else(|| Error::Adapter("Debuggee reports no threads".to_string()))
    }

    async fn drop_connection(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.connection.write().await.take();
    }
}

#[async_trait]
impl DebugAdapter for DapClient {
    async fn launch(&self) -> Result<()> {
        if self.is_active() {
            return Err(Error::Adapter(
                "A debug session is already active".to_string(),
            ));
        }

        let initialized = Arc::new(Notify::new());
        let conn = self.connect(initialized.clone()).await?;
        self.events.send(AdapterEvent::SessionStarting);

        self.active.store(true, Ordering::SeqCst);
        *self.connection.write().await = Some(conn.clone());

        if let Err(e) = self.configure_and_launch(&conn, initialized).await {
            error!("Debug adapter launch failed: {}", e);
            self.drop_connection().await;
            self.events.send(AdapterEvent::Terminated);
            return Err(e);
        }

        info!("Debuggee launched");
        Ok(())
    }

    async fn control(&self, action: ControlAction, thread_id: Option<i64>) -> Result<()> {
        let conn = self.current_connection().await?;

        let mut arguments = Map::new();
        if action.needs_thread() {
            let thread_id = match thread_id {
                Some(id) => id,
                None => self.first_thread(&conn).await?,
            };
            arguments.insert("threadId".to_string(), json!(thread_id));
        }
        if action == ControlAction::Stop {
            arguments.insert("terminateDebuggee".to_string(), json!(true));
        }

        conn.request_ok(action.dap_command(), Some(Value::Object(arguments)))
            .await?;
        debug!("Control '{}' acknowledged", action);

        if action == ControlAction::Stop {
            // The reader is aborted with the connection; report the end ourselves.
            self.drop_connection().await;
            self.events.send(AdapterEvent::Terminated);
        }
        Ok(())
    }

    async fn stack_trace(
        &self,
        thread_id: i64,
        start_frame: i64,
        levels: i64,
    ) -> Result<Vec<StackFrame>> {
        let conn = self.current_connection().await?;
        let body = conn
            .request_ok(
                "stackTrace",
                Some(json!({
                    "threadId": thread_id,
                    "startFrame": start_frame,
                    "levels": levels,
                })),
            )
            .await?;
        let body: StackTraceBody = serde_json::from_value(body.unwrap_or(Value::Null))?;
        Ok(body.stack_frames.into_iter().map(StackFrame::from).collect())
    }

    async fn evaluate(
        &self,
        expression: &str,
        frame_id: i64,
        context: EvaluateContext,
    ) -> Result<EvaluateOutcome> {
        let conn = self.current_connection().await?;
        let response = conn
            .request(
                "evaluate",
                Some(json!({
                    "expression": expression,
                    "frameId": frame_id,
                    "context": context.as_str(),
                })),
            )
            .await?;

        if !response.success {
            return Ok(EvaluateOutcome::Error(response.error_text()));
        }
        let body: EvaluateBody = serde_json::from_value(response.body.unwrap_or(Value::Null))?;
        Ok(EvaluateOutcome::Value(body.result))
    }

    async fn threads(&self) -> Result<Vec<i64>> {
        let conn = self.current_connection().await?;
        self.thread_ids(&conn).await
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<AdapterEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl BreakpointStore for DapClient {
    async fn add_breakpoints(&self, breakpoints: Vec<SourceBreakpoint>) -> Result<()> {
        let mut touched: Vec<PathBuf> = Vec::new();
        for breakpoint in breakpoints {
            self.breakpoints
                .entry(breakpoint.path.clone())
                .or_default()
                .insert(breakpoint.line, breakpoint.enabled);
            if !touched.contains(&breakpoint.path) {
                touched.push(breakpoint.path);
            }
        }

        let conn = self.connection.read().await.clone();
        if let Some(conn) = conn {
            for path in touched {
                self.sync_file_breakpoints(&conn, &path).await?;
            }
        }
        Ok(())
    }

    fn breakpoints(&self) -> Vec<SourceBreakpoint> {
        let mut all: Vec<SourceBreakpoint> = self
            .breakpoints
            .iter()
            .flat_map(|entry| {
                let path = entry.key().clone();
                entry
                    .value()
                    .iter()
                    .map(|(line, enabled)| SourceBreakpoint {
                        path: path.clone(),
                        line: *line,
                        enabled: *enabled,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
        all
    }
}

struct ReadLoopContext {
    writer: SharedWriter,
    pending: PendingRequests,
    next_seq: Arc<AtomicI64>,
    events: Arc<EventFanout>,
    active: Arc<AtomicBool>,
    initialized: Arc<Notify>,
}

async fn read_loop(mut reader: DapReader<OwnedReadHalf>, ctx: ReadLoopContext) {
    let mut saw_terminated = false;

    loop {
        let value = match reader.read_value().await {
            Ok(Some(value)) => value,
            Ok(None) => {
                info!("Debug adapter closed the connection");
                break;
            }
            Err(e) => {
                error!("Failed to read from debug adapter: {}", e);
                break;
            }
        };

        let message = match serde_json::from_value::<IncomingMessage>(value) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed DAP message: {}", e);
                continue;
            }
        };

        match message {
            IncomingMessage::Response(response) => {
                match ctx.pending.remove(&response.request_seq) {
                    Some((_, tx)) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(
                        "Response to unknown request seq {}",
                        response.request_seq
                    ),
                }
            }
            IncomingMessage::Event(event) => {
                debug!("DAP <- event {}", event.event);
                if event.event == "initialized" {
                    ctx.initialized.notify_one();
                    continue;
                }
                if let Some(adapter_event) = event.to_adapter_event() {
                    if matches!(
                        adapter_event,
                        AdapterEvent::Exited { .. } | AdapterEvent::Terminated
                    ) {
                        ctx.active.store(false, Ordering::SeqCst);
                    }
                    saw_terminated |= adapter_event == AdapterEvent::Terminated;
                    ctx.events.send(adapter_event);
                }
            }
            IncomingMessage::Request(request) => {
                warn!("Rejecting reverse request '{}'", request.command);
                let seq = ctx.next_seq.fetch_add(1, Ordering::SeqCst);
                let reply = OutgoingResponse::unsupported(seq, &request);
                if let Err(e) = ctx.writer.lock().await.write_message(&reply).await {
                    error!("Failed to answer reverse request: {}", e);
                    break;
                }
            }
        }
    }

    ctx.active.store(false, Ordering::SeqCst);
    // Dropping the senders fails every in-flight request.
    ctx.pending.clear();
    if !saw_terminated {
        ctx.events.send(AdapterEvent::Terminated);
    }
}
