pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("MCP protocol error: {0}")]
    Mcp(String),

    /// The debug adapter rejected a request or reported a failure.
    #[error("Debug adapter error: {0}")]
    Adapter(String),

    /// Malformed traffic on the debug adapter wire.
    #[error("DAP protocol error: {0}")]
    Protocol(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure came from the debug adapter side of the bridge.
    pub fn is_adapter_failure(&self) -> bool {
        matches!(
            self,
            Error::Adapter(_) | Error::Protocol(_) | Error::Connection(_)
        )
    }
}
