/*
 * DAP Debugger MCP Server - Library
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

#![allow(clippy::result_large_err)]

//! # DAP Debugger MCP
//!
//! Exposes a Debug Adapter Protocol debuggee to Model Context Protocol
//! clients. Clients set breakpoints, start the program, step through it,
//! read the source around the paused line and evaluate expressions, all as
//! MCP tool calls.
//!
//! ## Transports
//!
//! - HTTP/SSE (default): `GET /mcp` opens a session stream whose first event
//!   names the endpoint to POST messages to (`/messages?sessionId=<id>`).
//! - stdio: one session over stdin/stdout (`--stdio`).
//!
//! ## Tools
//!
//! | Tool | Arguments |
//! |------|-----------|
//! | `start` | none |
//! | `stepOver`, `stepInto`, `stepOut`, `continue`, `pause`, `restart`, `stop` | none |
//! | `addBreakpoints` | `relativeFilePath`, `line` (1-based) |
//! | `getLines` | `count` |
//! | `evaluate` | `expression` |
//!
//! ## Configuration
//!
//! - `MCP_HOST` / `MCP_PORT`: HTTP bind address (default `127.0.0.1:4000`)
//! - `MCP_MAX_SESSIONS`: concurrent sessions (default 50)
//! - `DAP_HOST` / `DAP_PORT`: debug adapter address (default `127.0.0.1:4711`)
//! - `DAP_ADAPTER_ID`, `DAP_LAUNCH_ARGS`, `DAP_LAUNCH_TIMEOUT_MS`
//! - `WORKSPACE_ROOT`: folder breakpoint paths are relative to
//! - `PAUSE_TIMEOUT_MS`: wait for a pause after `start` (default 5000)
//! - `RUST_LOG`: log filter

pub mod breakpoints;
pub mod cli;
pub mod config;
pub mod dap;
pub mod debug_adapter;
pub mod debug_state;
pub mod error;
pub mod mcp_server;
pub mod mcp_tools;
pub mod output_capture;
pub mod session_hub;
pub mod tool_registry;
pub mod workspace;

pub mod prelude {
    pub use crate::breakpoints::{BreakpointOutcome, BreakpointRegistrar, BreakpointStore};
    pub use crate::config::Config;
    pub use crate::dap::DapClient;
    pub use crate::debug_adapter::{AdapterEvent, ControlAction, DebugAdapter};
    pub use crate::debug_state::{DebugStateSync, PauseOutcome, RunState};
    pub use crate::error::{Error, Result};
    pub use crate::mcp_server::McpServer;
    pub use crate::mcp_tools::DebuggerTools;
    pub use crate::session_hub::{SessionId, SessionTransportHub};
    pub use crate::workspace::{FsWorkspace, Workspace};
}
