/// In-memory workspace and breakpoint store
use async_trait::async_trait;
use dap_debugger_mcp::breakpoints::{BreakpointStore, SourceBreakpoint};
use dap_debugger_mcp::error::{Error, Result};
use dap_debugger_mcp::workspace::{TextDocument, Workspace};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockWorkspace {
    root: Option<PathBuf>,
    documents: Mutex<HashMap<PathBuf, String>>,
}

impl MockWorkspace {
    pub fn new(root: Option<&str>) -> Self {
        Self {
            root: root.map(PathBuf::from),
            documents: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_document(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.documents
            .lock()
            .unwrap()
            .insert(path.into(), text.into());
    }

    /// A document whose lines read `line 1`, `line 2`, ...
    pub fn add_numbered_document(&self, path: impl Into<PathBuf>, line_count: usize) {
        let text = (1..=line_count)
            .map(|n| format!("line {n}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.add_document(path, text);
    }
}

#[async_trait]
impl Workspace for MockWorkspace {
    fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    async fn open_document(&self, path: &Path) -> Result<TextDocument> {
        self.documents
            .lock()
            .unwrap()
            .get(path)
            .map(|text| TextDocument::new(path, text))
            .ok_or_else(|| Error::Workspace(format!("No document at {}", path.display())))
    }
}

#[derive(Default)]
pub struct RecordingStore {
    added: Mutex<Vec<SourceBreakpoint>>,
}

#[async_trait]
impl BreakpointStore for RecordingStore {
    async fn add_breakpoints(&self, breakpoints: Vec<SourceBreakpoint>) -> Result<()> {
        self.added.lock().unwrap().extend(breakpoints);
        Ok(())
    }

    fn breakpoints(&self) -> Vec<SourceBreakpoint> {
        self.added.lock().unwrap().clone()
    }
}
