/// Mock collaborators for integration testing
///
/// The debug adapter, workspace and breakpoint store are replaced by
/// in-memory doubles so the bridge can be driven without a real debugger.
#[allow(dead_code)]
pub mod debug_adapter;
#[allow(dead_code)]
pub mod workspace;

pub use debug_adapter::{AdapterCall, MockAdapter};
pub use workspace::{MockWorkspace, RecordingStore};
