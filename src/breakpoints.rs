use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::workspace::Workspace;

/// A breakpoint against an absolute source location
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceBreakpoint {
    pub path: PathBuf,
    /// 0-based line index
    pub line: u32,
    pub enabled: bool,
}

impl SourceBreakpoint {
    pub fn new(path: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            path: path.into(),
            line,
            enabled: true,
        }
    }
}

/// Breakpoint persistence collaborator
#[async_trait]
pub trait BreakpointStore: Send + Sync {
    async fn add_breakpoints(&self, breakpoints: Vec<SourceBreakpoint>) -> Result<()>;

    fn breakpoints(&self) -> Vec<SourceBreakpoint>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointOutcome {
    Added(SourceBreakpoint),
    /// No workspace root is open, nothing was registered
    Skipped,
}

/// Turns `(relative path, 1-based line)` requests into persisted breakpoints
pub struct BreakpointRegistrar {
    workspace: Arc<dyn Workspace>,
    store: Arc<dyn BreakpointStore>,
}

impl BreakpointRegistrar {
    pub fn new(workspace: Arc<dyn Workspace>, store: Arc<dyn BreakpointStore>) -> Self {
        Self { workspace, store }
    }

    pub async fn add(&self, relative_path: &str, line: u32) -> Result<BreakpointOutcome> {
        let Some(path) = self.workspace.resolve(relative_path) else {
            warn!(
                "No workspace root; skipping breakpoint {}:{}",
                relative_path, line
            );
            return Ok(BreakpointOutcome::Skipped);
        };

        let breakpoint = SourceBreakpoint::new(path, line.saturating_sub(1));
        self.store.add_breakpoints(vec![breakpoint.clone()]).await?;

        info!(
            "Breakpoint added at {}:{}",
            breakpoint.path.display(),
            breakpoint.line + 1
        );
        Ok(BreakpointOutcome::Added(breakpoint))
    }

    pub fn breakpoints(&self) -> Vec<SourceBreakpoint> {
        self.store.breakpoints()
    }
}
