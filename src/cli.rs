use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "dap-debugger-mcp")]
#[command(author = "ladvien")]
#[command(version)]
#[command(about = "Drive a Debug Adapter Protocol debuggee from MCP clients", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Serve a single MCP session over stdin/stdout instead of HTTP
    #[arg(long, global = true)]
    pub stdio: bool,

    /// Address the HTTP/SSE server binds to
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port the HTTP/SSE server listens on
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Maximum concurrent MCP sessions
    #[arg(long, global = true)]
    pub max_sessions: Option<usize>,

    /// Host of the debug adapter
    #[arg(long, global = true)]
    pub dap_host: Option<String>,

    /// Port of the debug adapter
    #[arg(long, global = true)]
    pub dap_port: Option<u16>,

    /// Root folder that breakpoint paths are relative to
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// How long `start` and `getLines` wait for the debuggee to pause
    #[arg(long, global = true, value_name = "MS")]
    pub pause_timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the MCP server (default)
    Serve,

    /// Check that the debug adapter accepts connections
    Check,
}

impl Cli {
    /// Command to run, `serve` when none was given
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }

    /// Overlay explicit flags on top of environment configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.mcp_host = host.clone();
        }
        if let Some(port) = self.port {
            config.mcp_port = port;
        }
        if let Some(max_sessions) = self.max_sessions {
            config.max_sessions = max_sessions;
        }
        if let Some(dap_host) = &self.dap_host {
            config.adapter.host = dap_host.clone();
        }
        if let Some(dap_port) = self.dap_port {
            config.adapter.port = dap_port;
        }
        if let Some(workspace) = &self.workspace {
            config.workspace_root = Some(workspace.clone());
        }
        if let Some(ms) = self.pause_timeout_ms {
            config.pause_timeout = Duration::from_millis(ms);
        }
    }
}
