/// Output emitted by one debuggee run.
///
/// Append-only while the run is live. Once the run exits the buffer is frozen
/// and becomes readable through [`OutputCapture::snapshot`]. A new run gets a
/// fresh buffer via [`OutputCapture::reset`].
#[derive(Debug, Default, Clone)]
pub struct OutputCapture {
    chunks: Vec<String>,
    frozen: bool,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the buffer with an empty, writable one
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Record one output notification. Ignored after the run exited.
    pub fn append(&mut self, text: impl Into<String>) -> bool {
        if self.frozen {
            return false;
        }
        self.chunks.push(text.into());
        true
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Accumulated output, available only once the run has exited
    pub fn snapshot(&self) -> Option<String> {
        self.frozen.then(|| self.chunks.concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_requires_freeze() {
        let mut capture = OutputCapture::new();
        capture.append("hello\n");
        assert_eq!(capture.snapshot(), None);

        capture.freeze();
        assert_eq!(capture.snapshot().as_deref(), Some("hello\n"));
    }

    #[test]
    fn test_append_after_freeze_is_dropped() {
        let mut capture = OutputCapture::new();
        capture.append("a\n");
        capture.freeze();
        assert!(!capture.append("b\n"));
        assert_eq!(capture.len(), 1);
        assert_eq!(capture.snapshot().as_deref(), Some("a\n"));
    }

    #[test]
    fn test_reset_starts_fresh_run() {
        let mut capture = OutputCapture::new();
        capture.append("old run\n");
        capture.freeze();

        capture.reset();
        assert!(capture.is_empty());
        assert!(!capture.is_frozen());
        assert!(capture.append("new run\n"));
    }

    #[test]
    fn test_chunks_keep_order() {
        let mut capture = OutputCapture::new();
        capture.append("1");
        capture.append("2");
        capture.append("3\n");
        capture.freeze();
        assert_eq!(capture.snapshot().as_deref(), Some("123\n"));
    }
}
