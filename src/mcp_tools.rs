/*
 * DAP Debugger MCP Server - Centralized Tool Definitions
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

use rmcp::{
    handler::server::ServerHandler,
    model::*,
    schemars,
    service::{RequestContext, RoleServer},
    Error as McpError,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::breakpoints::{BreakpointOutcome, BreakpointRegistrar};
use crate::debug_adapter::ControlAction;
use crate::debug_state::{DebugStateSync, PauseOutcome};
use crate::tool_registry::{ToolError, ToolRegistry, ToolResult};

/// Reply of `addBreakpoints` when no workspace folder is open
pub const NO_WORKSPACE_MESSAGE: &str = "No workspace folder is open; breakpoint was not added.";

// Parameter structures for tools
#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct NoArguments {}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddBreakpointRequest {
    /// Path of the source file, relative to the workspace root
    pub relative_file_path: String,
    /// 1-based line number
    pub line: NonZeroU32,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct GetLinesRequest {
    /// Lines of context on each side of the paused line
    pub count: u32,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct EvaluateRequest {
    pub expression: String,
}

fn control_description(action: ControlAction) -> &'static str {
    match action {
        ControlAction::StepOver => "Step over the current line of the paused debuggee.",
        ControlAction::StepInto => "Step into the call on the current line of the paused debuggee.",
        ControlAction::StepOut => "Step out of the current function of the paused debuggee.",
        ControlAction::Continue => "Resume the paused debuggee until the next breakpoint or exit.",
        ControlAction::Pause => "Pause the running debuggee.",
        ControlAction::Restart => "Restart the debug session.",
        ControlAction::Stop => "Stop the debug session and terminate the debuggee.",
    }
}

fn start_message(outcome: PauseOutcome) -> &'static str {
    match outcome {
        PauseOutcome::Paused => "Debugger started and paused.",
        PauseOutcome::TimedOut => "Debugger started; the debuggee has not paused yet.",
        PauseOutcome::Exited => "Debugger started; the debuggee exited before pausing.",
    }
}

/// Build the table of debugger tools over the shared state
pub fn build_registry(
    state: Arc<DebugStateSync>,
    registrar: Arc<BreakpointRegistrar>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let start_state = state.clone();
    registry.register::<NoArguments, _, _>(
        "start",
        "Start debugging the configured program and wait briefly for it to pause at a breakpoint. Add breakpoints first if the program should stop early.",
        move |_| {
            let state = start_state.clone();
            async move {
                info!("Starting debug session");
                let outcome = state.start().await?;
                Ok(ToolResult::text(start_message(outcome)))
            }
        },
    );

    for action in ControlAction::ALL {
        let state = state.clone();
        registry.register::<NoArguments, _, _>(
            action.tool_name(),
            control_description(action),
            move |_| {
                let state = state.clone();
                async move {
                    debug!("Control command: {}", action);
                    Ok(match state.send_control(action).await? {
                        Some(text) => ToolResult::text(text),
                        None => ToolResult::empty(),
                    })
                }
            },
        );
    }

    registry.register::<AddBreakpointRequest, _, _>(
        "addBreakpoints",
        "Add a breakpoint at a 1-based line of a file given relative to the workspace root.",
        move |req| {
            let registrar = registrar.clone();
            async move {
                match registrar
                    .add(&req.relative_file_path, req.line.get())
                    .await?
                {
                    BreakpointOutcome::Added(_) => Ok(ToolResult::empty()),
                    BreakpointOutcome::Skipped => Ok(ToolResult::text(NO_WORKSPACE_MESSAGE)),
                }
            }
        },
    );

    let lines_state = state.clone();
    registry.register::<GetLinesRequest, _, _>(
        "getLines",
        "Show the source lines around the paused location, `count` lines on each side. Pauses a running debuggee first.",
        move |req| {
            let state = lines_state.clone();
            async move {
                let text = state.read_context(req.count as usize).await?;
                Ok(ToolResult::text(text))
            }
        },
    );

    registry.register::<EvaluateRequest, _, _>(
        "evaluate",
        "Evaluate an expression in the top stack frame of the paused debuggee.",
        move |req| {
            let state = state.clone();
            async move {
                let text = state.evaluate(&req.expression).await?;
                Ok(ToolResult::text(text))
            }
        },
    );

    registry
}

/// MCP face of the debugger: every tool call goes through the registry
#[derive(Clone)]
pub struct DebuggerTools {
    registry: Arc<ToolRegistry>,
}

impl DebuggerTools {
    pub fn new(state: Arc<DebugStateSync>, registrar: Arc<BreakpointRegistrar>) -> Self {
        Self::from_registry(build_registry(state, registrar))
    }

    pub fn from_registry(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.registry
            .definitions()
            .into_iter()
            .map(|def| Tool::new(def.name, def.description, def.input_schema))
            .collect()
    }

    /// Run a tool and shape the outcome as an MCP result
    pub async fn call(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        match self.registry.invoke(name, arguments).await {
            Ok(result) => {
                let content = result.text.map(Content::text).into_iter().collect();
                if result.is_error {
                    Ok(CallToolResult::error(content))
                } else {
                    Ok(CallToolResult::success(content))
                }
            }
            Err(e @ (ToolError::UnknownTool(_) | ToolError::InvalidArguments { .. })) => {
                error!("Rejected tool call '{}': {}", name, e);
                Err(McpError::invalid_params(e.to_string(), None))
            }
        }
    }
}

impl ServerHandler for DebuggerTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "dap-debugger-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some("Drive a debug adapter from MCP: set breakpoints, start the program, step through it, read the surrounding source and evaluate expressions.".to_string()),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            next_cursor: None,
            tools: self.tools(),
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = request.arguments.map(Value::Object).unwrap_or(Value::Null);
        self.call(&request.name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_breakpoint_request_uses_camel_case() {
        let req: AddBreakpointRequest =
            serde_json::from_value(serde_json::json!({"relativeFilePath": "main.js", "line": 3}))
                .unwrap();
        assert_eq!(req.relative_file_path, "main.js");
        assert_eq!(req.line.get(), 3);
    }

    #[test]
    fn test_line_zero_is_rejected() {
        let req = serde_json::from_value::<AddBreakpointRequest>(
            serde_json::json!({"relativeFilePath": "main.js", "line": 0}),
        );
        assert!(req.is_err());
    }

    #[test]
    fn test_every_control_action_has_a_description() {
        for action in ControlAction::ALL {
            assert!(!control_description(action).is_empty());
        }
    }
}
