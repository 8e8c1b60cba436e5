/*
 * DAP Debugger MCP Server - Debug Adapter Interface
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
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::error::Result;

/// Execution control commands understood by the debug adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlAction {
    StepOver,
    StepInto,
    StepOut,
    Continue,
    Pause,
    Restart,
    Stop,
}

impl ControlAction {
    pub const ALL: [ControlAction; 7] = [
        ControlAction::StepOver,
        ControlAction::StepInto,
        ControlAction::StepOut,
        ControlAction::Continue,
        ControlAction::Pause,
        ControlAction::Restart,
        ControlAction::Stop,
    ];

    /// Name of the remote tool that issues this action
    pub fn tool_name(self) -> &'static str {
        match self {
            ControlAction::StepOver => "stepOver",
            ControlAction::StepInto => "stepInto",
            ControlAction::StepOut => "stepOut",
            ControlAction::Continue => "continue",
            ControlAction::Pause => "pause",
            ControlAction::Restart => "restart",
            ControlAction::Stop => "stop",
        }
    }

    /// DAP request command implementing this action
    pub fn dap_command(self) -> &'static str {
        match self {
            ControlAction::StepOver => "next",
            ControlAction::StepInto => "stepIn",
            ControlAction::StepOut => "stepOut",
            ControlAction::Continue => "continue",
            ControlAction::Pause => "pause",
            ControlAction::Restart => "restart",
            ControlAction::Stop => "disconnect",
        }
    }

    /// Whether the debuggee resumes execution once the action is accepted
    pub fn resumes_execution(self) -> bool {
        matches!(
            self,
            ControlAction::StepOver
                | ControlAction::StepInto
                | ControlAction::StepOut
                | ControlAction::Continue
        )
    }

    /// Whether the DAP request needs a `threadId` argument
    pub fn needs_thread(self) -> bool {
        !matches!(self, ControlAction::Restart | ControlAction::Stop)
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool_name())
    }
}

/// One frame of a paused thread's call stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    /// Absolute source path, when the adapter can resolve one
    pub source_path: Option<PathBuf>,
    /// 1-based line number
    pub line: u32,
}

/// Scope in which an expression is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluateContext {
    Repl,
    Watch,
    Hover,
}

impl EvaluateContext {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluateContext::Repl => "repl",
            EvaluateContext::Watch => "watch",
            EvaluateContext::Hover => "hover",
        }
    }
}

/// Evaluation failures reported by the debuggee are data, not faults
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluateOutcome {
    Value(String),
    Error(String),
}

impl EvaluateOutcome {
    pub fn into_text(self) -> String {
        match self {
            EvaluateOutcome::Value(text) | EvaluateOutcome::Error(text) => text,
        }
    }
}

/// Notifications pushed by the debug adapter
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// A new debug session is about to start
    SessionStarting,
    Stopped {
        thread_id: Option<i64>,
        reason: String,
    },
    Continued {
        thread_id: Option<i64>,
    },
    Output {
        category: Option<String>,
        text: String,
    },
    Exited {
        exit_code: Option<i64>,
    },
    Terminated,
}

/// Lossless fan-out of adapter notifications.
///
/// Every subscriber owns an unbounded queue, so a slow consumer sees every
/// notification in emission order. Closed subscribers are pruned on send.
#[derive(Debug, Default)]
pub struct EventFanout {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AdapterEvent>>>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<AdapterEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn send(&self, event: AdapterEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Subscribers whose receiver is still alive
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<AdapterEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The debug adapter as seen by the bridge.
///
/// Implementations forward commands to a real adapter process. Every
/// notification is fanned out through [`DebugAdapter::subscribe`]; each
/// receiver is an independent listener that never misses a notification
/// and is released when dropped.
#[async_trait]
pub trait DebugAdapter: Send + Sync {
    /// Start a debuggee run
    async fn launch(&self) -> Result<()>;

    /// Issue a control command. Returns once the adapter acknowledged it,
    /// without waiting for the resulting state change.
    async fn control(&self, action: ControlAction, thread_id: Option<i64>) -> Result<()>;

    async fn stack_trace(
        &self,
        thread_id: i64,
        start_frame: i64,
        levels: i64,
    ) -> Result<Vec<StackFrame>>;

    async fn evaluate(
        &self,
        expression: &str,
        frame_id: i64,
        context: EvaluateContext,
    ) -> Result<EvaluateOutcome>;

    /// Ids of the debuggee's threads, in the adapter's order
    async fn threads(&self) -> Result<Vec<i64>>;

    /// Whether a debug session is currently live
    fn is_active(&self) -> bool;

    fn subscribe(&self) -> mpsc::UnboundedReceiver<AdapterEvent>;
}
