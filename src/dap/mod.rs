//! Debug Adapter Protocol client side: wire framing, message shapes and the
//! TCP client used as the bridge's [`DebugAdapter`](crate::debug_adapter::DebugAdapter).

pub mod client;
pub mod codec;
pub mod messages;

pub use client::DapClient;

/// Maximum length of a single header line, including the trailing newline.
pub const MAX_DAP_HEADER_LINE_BYTES: usize = 8 * 1024;

/// Maximum accepted `Content-Length` of one message body.
pub const MAX_DAP_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
