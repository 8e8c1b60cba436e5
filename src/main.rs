/*
 * DAP Debugger MCP Server
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

use clap::Parser;
use is_terminal::IsTerminal;
use std::sync::Arc;
use tracing::{error, info};

use dap_debugger_mcp::breakpoints::BreakpointRegistrar;
use dap_debugger_mcp::cli::{Cli, Commands};
use dap_debugger_mcp::config::Config;
use dap_debugger_mcp::dap::DapClient;
use dap_debugger_mcp::debug_state::DebugStateSync;
use dap_debugger_mcp::error::{Error, Result};
use dap_debugger_mcp::mcp_server::McpServer;
use dap_debugger_mcp::mcp_tools::DebuggerTools;
use dap_debugger_mcp::workspace::FsWorkspace;

#[tokio::main]
async fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic payload".to_string()
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "Unknown location".to_string());

        eprintln!("FATAL PANIC in dap-debugger-mcp: {} at {}", payload, location);
        std::io::Write::flush(&mut std::io::stderr()).unwrap_or(());
    }));

    let cli = Cli::parse();

    // stdout carries the protocol in stdio mode, so logs go to stderr without colors.
    if cli.stdio {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_ansi(std::io::stdout().is_terminal())
            .init();
    }

    let mut config = Config::from_env()?;
    cli.apply(&mut config);
    config.validate()?;

    match cli.command() {
        Commands::Check => check_adapter(&config).await,
        Commands::Serve => {
            let server = build_server(config);
            if cli.stdio {
                server.run_stdio().await
            } else {
                server.run_http().await
            }
        }
    }
}

fn build_server(config: Config) -> McpServer {
    let adapter = Arc::new(DapClient::new(config.adapter.clone()));
    let workspace = Arc::new(FsWorkspace::new(config.workspace_root.clone()));

    let debug_state = Arc::new(DebugStateSync::new(
        adapter.clone(),
        workspace.clone(),
        config.pause_timeout,
    ));
    let registrar = Arc::new(BreakpointRegistrar::new(workspace, adapter));
    let tools = DebuggerTools::new(debug_state.clone(), registrar);

    info!(
        "Debug adapter at {}, workspace root {:?}",
        config.adapter.address(),
        config.workspace_root
    );
    McpServer::new(config, tools, debug_state)
}

async fn check_adapter(config: &Config) -> Result<()> {
    let address = config.adapter.address();
    match tokio::net::TcpStream::connect(&address).await {
        Ok(_) => {
            info!("Debug adapter is reachable at {}", address);
            Ok(())
        }
        Err(e) => {
            error!("Debug adapter is not reachable at {}: {}", address, e);
            Err(Error::Connection(format!("{}: {}", address, e)))
        }
    }
}
