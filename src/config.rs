use crate::error::{Error, Result};
use serde_json::Value;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Where the debug adapter listens and how a debuggee is launched through it
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub host: String,
    pub port: u16,
    /// `adapterID` sent in the DAP `initialize` request
    pub adapter_id: String,
    /// Arguments of the DAP `launch` request, passed through verbatim
    pub launch_arguments: Value,
    /// Upper bound on waiting for the adapter's `initialized` event
    pub launch_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4711,
            adapter_id: "bridge".to_string(),
            launch_arguments: Value::Object(Default::default()),
            launch_timeout: Duration::from_millis(10_000),
        }
    }
}

impl AdapterConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mcp_host: String,
    pub mcp_port: u16,
    pub max_sessions: usize,
    pub adapter: AdapterConfig,
    pub workspace_root: Option<PathBuf>,
    pub pause_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mcp_host: "127.0.0.1".to_string(),
            mcp_port: 4000,
            max_sessions: 50,
            adapter: AdapterConfig::default(),
            workspace_root: None,
            pause_timeout: Duration::from_millis(5_000),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let mcp_host = env::var("MCP_HOST").unwrap_or(defaults.mcp_host);
        let mcp_port = env::var("MCP_PORT")
            .unwrap_or_else(|_| "4000".to_string())
            .parse::<u16>()
            .map_err(|_| Error::Config("Invalid MCP_PORT".to_string()))?;

        let mut max_sessions = defaults.max_sessions;
        if let Ok(val) = env::var("MCP_MAX_SESSIONS") {
            max_sessions = val
                .parse()
                .map_err(|_| Error::Config("Invalid MCP_MAX_SESSIONS".to_string()))?;
        }

        let mut adapter = AdapterConfig::default();

        if let Ok(val) = env::var("DAP_HOST") {
            adapter.host = val;
        }

        if let Ok(val) = env::var("DAP_PORT") {
            adapter.port = val
                .parse()
                .map_err(|_| Error::Config("Invalid DAP_PORT".to_string()))?;
        }

        if let Ok(val) = env::var("DAP_ADAPTER_ID") {
            adapter.adapter_id = val;
        }

        if let Ok(val) = env::var("DAP_LAUNCH_ARGS") {
            adapter.launch_arguments = serde_json::from_str(&val)
                .map_err(|e| Error::Config(format!("Invalid DAP_LAUNCH_ARGS: {e}")))?;
        }

        if let Ok(val) = env::var("DAP_LAUNCH_TIMEOUT_MS") {
            let milliseconds: u64 = val
                .parse()
                .map_err(|_| Error::Config("Invalid DAP_LAUNCH_TIMEOUT_MS".to_string()))?;
            adapter.launch_timeout = Duration::from_millis(milliseconds);
        }

        let workspace_root = env::var("WORKSPACE_ROOT")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let mut pause_timeout = defaults.pause_timeout;
        if let Ok(val) = env::var("PAUSE_TIMEOUT_MS") {
            let milliseconds: u64 = val
                .parse()
                .map_err(|_| Error::Config("Invalid PAUSE_TIMEOUT_MS".to_string()))?;
            pause_timeout = Duration::from_millis(milliseconds);
        }

        Ok(Config {
            mcp_host,
            mcp_port,
            max_sessions,
            adapter,
            workspace_root,
            pause_timeout,
        })
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.mcp_host, self.mcp_port)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(Error::Config("Max sessions must be > 0".to_string()));
        }

        if self.pause_timeout.is_zero() {
            return Err(Error::Config("Pause timeout must be > 0".to_string()));
        }

        if !self.adapter.launch_arguments.is_object() {
            return Err(Error::Config(
                "DAP launch arguments must be a JSON object".to_string(),
            ));
        }

        if let Some(root) = &self.workspace_root {
            if !root.is_absolute() {
                return Err(Error::Config(format!(
                    "Workspace root must be an absolute path: {}",
                    root.display()
                )));
            }
        }

        Ok(())
    }
}
