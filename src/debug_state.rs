/*
 * DAP Debugger MCP Server - Debuggee State Synchronization
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

//! Bridges request/response tool calls onto the debuggee's event-driven
//! execution.
//!
//! Run state transitions:
//!
//! ```text
//! Idle --start--> Running --stopped--> Paused --continue/step--> Running
//!                    ^                                              |
//!                    +------------- start ---- Exited <---- exit ---+
//! ```
//!
//! Adapter notifications are applied by a single pump task in arrival order.
//! Every await inside an operation is a point where another tool call or a
//! notification can change the state, so operations re-read the state after
//! each suspension.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::debug_adapter::{AdapterEvent, ControlAction, DebugAdapter, EvaluateContext};
use crate::error::Result;
use crate::output_capture::OutputCapture;
use crate::workspace::Workspace;

/// Prefix of the reply to control commands once the debuggee has exited
pub const PROCESS_EXITED_PREFIX: &str = "Process Exited\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Exited,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// Which side of the pause race finished first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    /// The debuggee reported `stopped`
    Paused,
    /// The timer elapsed first
    TimedOut,
    /// The run ended before pausing
    Exited,
}

impl PauseOutcome {
    pub fn is_paused(self) -> bool {
        self == PauseOutcome::Paused
    }
}

/// Soft failures, returned to callers as text instead of errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    NoActiveDebuggee,
    NoActiveThread,
    ThreadNotPaused,
    NoResolvableFrame,
}

impl Diagnostic {
    pub fn message(self) -> &'static str {
        match self {
            Diagnostic::NoActiveDebuggee => "No active debug session.",
            Diagnostic::NoActiveThread => "The debugger is not running.",
            Diagnostic::ThreadNotPaused => "The debugger is not paused.",
            Diagnostic::NoResolvableFrame => {
                "No source location is available for the current frame."
            }
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug)]
struct SyncState {
    run_state: RunState,
    active_thread: Option<i64>,
    output: OutputCapture,
}

struct Shared {
    state: RwLock<SyncState>,
    run_state_tx: watch::Sender<RunState>,
}

impl Shared {
    fn set_run_state(&self, state: &mut SyncState, next: RunState) {
        if state.run_state != next {
            debug!("Debuggee state {} -> {}", state.run_state, next);
            state.run_state = next;
        }
        self.run_state_tx.send_replace(next);
    }

    /// Fresh run: new output buffer, state `Running`
    async fn begin_run(&self) {
        let mut state = self.state.write().await;
        if matches!(state.run_state, RunState::Idle | RunState::Exited) {
            state.output.reset();
            state.active_thread = None;
            self.set_run_state(&mut state, RunState::Running);
        }
    }

    async fn mark_paused(&self, thread_id: Option<i64>) {
        let mut state = self.state.write().await;
        if state.run_state == RunState::Exited {
            return;
        }
        if thread_id.is_some() {
            state.active_thread = thread_id;
        }
        self.set_run_state(&mut state, RunState::Paused);
    }

    async fn mark_exited(&self) {
        let mut state = self.state.write().await;
        state.output.freeze();
        state.active_thread = None;
        self.set_run_state(&mut state, RunState::Exited);
    }

    async fn apply_event(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::SessionStarting => self.begin_run().await,
            AdapterEvent::Stopped { thread_id, reason } => {
                debug!("Debuggee stopped ({}) on thread {:?}", reason, thread_id);
                self.mark_paused(thread_id).await;
            }
            AdapterEvent::Continued { .. } => {
                let mut state = self.state.write().await;
                if state.run_state == RunState::Paused {
                    self.set_run_state(&mut state, RunState::Running);
                }
            }
            AdapterEvent::Output { text, .. } => {
                let mut state = self.state.write().await;
                if !state.output.append(text) {
                    debug!("Dropping output received after exit");
                }
            }
            AdapterEvent::Exited { exit_code } => {
                info!("Debuggee exited with code {:?}", exit_code);
                self.mark_exited().await;
            }
            AdapterEvent::Terminated => {
                let already_exited = self.state.read().await.run_state == RunState::Exited;
                if !already_exited {
                    info!("Debug session terminated");
                    self.mark_exited().await;
                }
            }
        }
    }
}

fn spawn_event_pump(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<AdapterEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            shared.apply_event(event).await;
        }
        debug!("Debug adapter event stream closed");
    })
}

/// Lines `[start, end)` around the 0-based `line` of a document with
/// `line_count` lines: at most `context` before and `context` from the
/// paused line onwards, never outside the document.
pub fn context_window(line: usize, line_count: usize, context: usize) -> (usize, usize) {
    let line = line.min(line_count);
    let start = line.saturating_sub(context);
    let end = line.saturating_add(context).min(line_count);
    (start, end)
}

/// Owner of the debuggee's run state and captured output
pub struct DebugStateSync {
    adapter: Arc<dyn DebugAdapter>,
    workspace: Arc<dyn Workspace>,
    shared: Arc<Shared>,
    pause_timeout: Duration,
    pump: JoinHandle<()>,
}

impl DebugStateSync {
    /// Must be called inside a Tokio runtime: spawns the notification pump.
    pub fn new(
        adapter: Arc<dyn DebugAdapter>,
        workspace: Arc<dyn Workspace>,
        pause_timeout: Duration,
    ) -> Self {
        let (run_state_tx, _) = watch::channel(RunState::Idle);
        let shared = Arc::new(Shared {
            state: RwLock::new(SyncState {
                run_state: RunState::Idle,
                active_thread: None,
                output: OutputCapture::new(),
            }),
            run_state_tx,
        });
        let pump = spawn_event_pump(shared.clone(), adapter.subscribe());

        Self {
            adapter,
            workspace,
            shared,
            pause_timeout,
            pump,
        }
    }

    pub fn pause_timeout(&self) -> Duration {
        self.pause_timeout
    }

    pub async fn run_state(&self) -> RunState {
        self.shared.state.read().await.run_state
    }

    pub async fn active_thread(&self) -> Option<i64> {
        self.shared.state.read().await.active_thread
    }

    /// Captured output of the last run, available once it exited
    pub async fn output_snapshot(&self) -> Option<String> {
        self.shared.state.read().await.output.snapshot()
    }

    /// Observe run state transitions
    pub fn watch_run_state(&self) -> watch::Receiver<RunState> {
        self.shared.run_state_tx.subscribe()
    }

    /// Live pause listeners, including `watch_run_state` receivers
    pub fn pause_listener_count(&self) -> usize {
        self.shared.run_state_tx.receiver_count()
    }

    /// Launch the debuggee (unless one is already live) and wait briefly for
    /// it to pause.
    pub async fn start(&self) -> Result<PauseOutcome> {
        if self.adapter.is_active() {
            info!("Debuggee already active, waiting for it to pause");
        } else {
            self.shared.begin_run().await;
            if let Err(e) = self.adapter.launch().await {
                warn!("Launch failed: {}", e);
                self.shared.mark_exited().await;
                return Err(e);
            }
        }

        let outcome = self.await_paused(self.pause_timeout).await;
        info!("Start finished: {:?}", outcome);
        Ok(outcome)
    }

    /// Issue a control command without waiting for its effect.
    ///
    /// Returns the text to report instead when no command was issued.
    pub async fn send_control(&self, action: ControlAction) -> Result<Option<String>> {
        let (previous, thread_id) = {
            let mut state = self.shared.state.write().await;
            match state.run_state {
                RunState::Exited => {
                    debug!("Control '{}' skipped, debuggee exited", action);
                    let output = state.output.snapshot().unwrap_or_default();
                    return Ok(Some(format!("{PROCESS_EXITED_PREFIX}{output}")));
                }
                RunState::Idle => {
                    return Ok(Some(Diagnostic::NoActiveDebuggee.to_string()));
                }
                RunState::Running | RunState::Paused => {}
            }
            let previous = state.run_state;
            // Resume before issuing, so a `stopped` racing the acknowledgement wins.
            if action.resumes_execution() && previous == RunState::Paused {
                self.shared.set_run_state(&mut state, RunState::Running);
            }
            (previous, state.active_thread)
        };

        if let Err(e) = self.adapter.control(action, thread_id).await {
            let mut state = self.shared.state.write().await;
            if previous == RunState::Paused && state.run_state == RunState::Running {
                self.shared.set_run_state(&mut state, RunState::Paused);
            }
            return Err(e);
        }
        Ok(None)
    }

    /// Race the debuggee reaching a paused state against a timer of `timeout`.
    ///
    /// `Paused` means the debuggee reached a paused state. The listener is
    /// released before returning, whichever side won.
    pub async fn await_paused(&self, timeout: Duration) -> PauseOutcome {
        let mut listener = self.shared.run_state_tx.subscribe();
        let reached =
            listener.wait_for(|state| matches!(state, RunState::Paused | RunState::Exited));

        tokio::select! {
            state = reached => match state.map(|state| *state) {
                Ok(RunState::Paused) => PauseOutcome::Paused,
                Ok(_) => PauseOutcome::Exited,
                Err(_) => PauseOutcome::Exited,
            },
            _ = tokio::time::sleep(timeout) => {
                debug!("No pause within {:?}", timeout);
                PauseOutcome::TimedOut
            }
        }
    }

    /// Source lines around the paused location, or a diagnostic text
    pub async fn read_context(&self, lines_of_context: usize) -> Result<String> {
        let run_state = self.run_state().await;
        if matches!(run_state, RunState::Idle | RunState::Exited) || !self.adapter.is_active() {
            return Ok(Diagnostic::NoActiveDebuggee.to_string());
        }

        if run_state != RunState::Paused {
            debug!("Pausing debuggee to read context");
            let thread_id = self.active_thread().await;
            self.adapter.control(ControlAction::Pause, thread_id).await?;
            self.await_paused(self.pause_timeout).await;
        }

        // Re-check: the state may have moved while we were suspended.
        match self.run_state().await {
            RunState::Paused => {}
            RunState::Idle | RunState::Exited => {
                return Ok(Diagnostic::NoActiveDebuggee.to_string())
            }
            RunState::Running => return Ok(Diagnostic::ThreadNotPaused.to_string()),
        }
        let Some(thread_id) = self.inspected_thread().await? else {
            return Ok(Diagnostic::NoActiveThread.to_string());
        };

        let frames = self.adapter.stack_trace(thread_id, 0, 1).await?;
        let Some((path, line)) = frames
            .into_iter()
            .next()
            .and_then(|frame| frame.source_path.map(|path| (path, frame.line)))
        else {
            return Ok(Diagnostic::NoResolvableFrame.to_string());
        };

        let document = self.workspace.open_document(&path).await?;
        let paused_line = line.saturating_sub(1) as usize;
        let (start, end) = context_window(paused_line, document.line_count(), lines_of_context);
        debug!(
            "Reading {}[{}..{}) around line {}",
            path.display(),
            start,
            end,
            line
        );
        Ok(document.slice(start, end).join("\n"))
    }

    /// Thread whose frames are inspected.
    ///
    /// A `stopped` notification may omit its thread. While paused, the
    /// adapter's first thread is then adopted. The adapter is only asked
    /// when the debuggee is paused and no thread is known.
    async fn inspected_thread(&self) -> Result<Option<i64>> {
        let (run_state, thread_id) = {
            let state = self.shared.state.read().await;
            (state.run_state, state.active_thread)
        };
        if thread_id.is_some() || run_state != RunState::Paused || !self.adapter.is_active() {
            return Ok(thread_id);
        }

        let Some(first) = self.adapter.threads().await?.first().copied() else {
            return Ok(None);
        };
        let mut state = self.shared.state.write().await;
        if state.run_state == RunState::Paused && state.active_thread.is_none() {
            debug!("Stopped without a thread, inspecting thread {}", first);
            state.active_thread = Some(first);
        }
        Ok(Some(first))
    }

    /// Evaluate an expression in the top frame of the paused thread
    pub async fn evaluate(&self, expression: &str) -> Result<String> {
        let Some(thread_id) = self.inspected_thread().await? else {
            return Ok(Diagnostic::NoActiveThread.to_string());
        };
        if !self.adapter.is_active() {
            return Ok(Diagnostic::NoActiveDebuggee.to_string());
        }

        let frames = self.adapter.stack_trace(thread_id, 0, 1).await?;
        let Some(frame) = frames.first() else {
            return Ok(Diagnostic::NoResolvableFrame.to_string());
        };

        let outcome = self
            .adapter
            .evaluate(expression, frame.id, EvaluateContext::Repl)
            .await?;
        Ok(outcome.into_text())
    }
}

impl Drop for DebugStateSync {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
