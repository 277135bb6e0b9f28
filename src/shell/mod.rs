//! Shell multiplexing
//!
//! Everything between a caller's `execute` and the bytes on a remote PTY:
//! transports that open the shell, the streams that bridge it, line
//! assembly, completion detection, the dispatch loop and the session
//! handle callers hold.

pub mod completion;
pub mod dispatch;
pub mod lines;
pub mod local;
pub mod session;
pub mod ssh;
pub mod streams;
pub mod transport;

// Re-exports for convenience
pub use completion::{CompletionPatterns, DEFAULT_PATTERNS};
pub use dispatch::{retry_budget, DispatchState, REMOTE_LOG_TARGET};
pub use lines::LineAssembler;
pub use local::LocalShellConnector;
pub use session::{CommandOutput, SessionInfo, ShellSession};
pub use ssh::SshConnector;
pub use streams::{ChannelEnds, ShellStreams, StreamEvent};
pub use transport::{PtyOptions, ShellConnector, TransportHandle};
