use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Text of a source artifact split into lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    path: PathBuf,
    lines: Vec<String>,
}

impl TextDocument {
    pub fn new(path: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            path: path.into(),
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Line at a 0-based index
    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    /// Lines `[start, end)`, clipped to the document
    pub fn slice(&self, start: usize, end: usize) -> &[String] {
        let end = end.min(self.lines.len());
        let start = start.min(end);
        &self.lines[start..end]
    }
}

/// Workspace collaborator: path resolution and source retrieval
#[async_trait]
pub trait Workspace: Send + Sync {
    /// The single workspace root, if one is open
    fn root(&self) -> Option<&Path>;

    async fn open_document(&self, path: &Path) -> Result<TextDocument>;

    /// Join a workspace-relative path against the root
    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        self.root().map(|root| root.join(relative))
    }
}

/// Workspace backed by the local filesystem
#[derive(Debug, Clone, Default)]
pub struct FsWorkspace {
    root: Option<PathBuf>,
}

impl FsWorkspace {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Workspace for FsWorkspace {
    fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    async fn open_document(&self, path: &Path) -> Result<TextDocument> {
        debug!("Opening source document {}", path.display());
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Workspace(format!("Cannot read {}: {e}", path.display())))?;
        Ok(TextDocument::new(path, &text))
    }
}
