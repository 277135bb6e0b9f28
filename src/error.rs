//! Error types and Result aliases for shellmux

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for shellmux operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for shellmux
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // === Connection errors ===
    /// TCP or SSH handshake failed
    #[error("Failed to connect to {host}:{port}: {reason}")]
    ConnectFailed {
        host: String,
        port: u16,
        reason: String,
    },

    /// The server rejected the supplied credentials
    #[error("Authentication rejected for {username}@{host}")]
    AuthenticationFailed { host: String, username: String },

    /// Session or channel establishment did not finish in time
    #[error("Connecting to {host}:{port} timed out after {duration:?} ({stage})")]
    ConnectTimeout {
        host: String,
        port: u16,
        stage: String,
        duration: Duration,
    },

    /// Opening the shell channel (or its PTY) failed
    #[error("Failed to open shell channel: {reason}")]
    ChannelOpenFailed { reason: String },

    // === PTY errors (local backend) ===
    /// Failed to create PTY
    #[error("Failed to create PTY for '{command}': {reason}")]
    PtyCreationFailed { command: String, reason: String },

    /// Failed to spawn the shell inside the PTY
    #[error("Failed to spawn '{command}': {reason}")]
    CommandSpawnFailed { command: String, reason: String },

    // === Command errors ===
    /// Command text was empty or whitespace
    #[error("Command cannot be empty")]
    EmptyCommand,

    /// Command text spans more than one line
    #[error("Command {command:?} must be a single line")]
    MultiLineCommand { command: String },

    /// Timeout was zero
    #[error("Timeout for command '{command}' must be greater than zero")]
    InvalidTimeout { command: String },

    /// The command was not accepted, or its output did not finish, in time
    #[error("Command '{command}' timed out after {duration:?}")]
    CommandTimeout { command: String, duration: Duration },

    /// The remote shell went away; the session must be rebuilt
    #[error("Shell session closed{}", exit_status.map(|s| format!(" (exit-status: {})", s)).unwrap_or_default())]
    SessionClosed { exit_status: Option<u32> },

    /// The command ran but its output carried a known error keyword
    #[error("{command}: {line}")]
    RemoteCommand {
        command: String,
        keyword: String,
        line: String,
    },

    /// Writing to the shell channel failed
    #[error("Failed to write to shell channel: {reason}")]
    ShellWriteFailed { reason: String },

    /// A session operation needs a connection that was never made
    #[error("Not connected to {host}")]
    NotConnected { host: String },

    /// The remote working directory could not be resolved
    #[error("Unable to resolve absolute path of work dir '{work_dir}'")]
    WorkDirUnresolved { work_dir: String },

    // === Configuration errors ===
    /// Failed to load configuration file
    #[error("Failed to load config from '{}': {reason}", path.display())]
    ConfigLoadFailed { path: PathBuf, reason: String },

    /// Configuration validation failed
    #[error("Configuration validation failed for '{field}': {reason}")]
    ConfigValidationFailed { field: String, reason: String },

    /// Failed to serialize configuration
    #[error("Failed to serialize config as {format}: {reason}")]
    ConfigSerializationFailed { format: String, reason: String },

    /// Failed to parse configuration
    #[error("Failed to parse {format} config: {reason}")]
    ConfigParseFailed { format: String, reason: String },

    /// A completion pattern did not compile
    #[error("Invalid completion pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // === I/O and library errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
}

impl Error {
    /// Whether this error is a submission or result-wait timeout.
    ///
    /// Timeouts leave the session usable; the caller decides whether to retry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::CommandTimeout { .. } | Error::ConnectTimeout { .. })
    }

    /// Whether the session that produced this error can no longer be used
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::SessionClosed { .. } | Error::ShellWriteFailed { .. } | Error::Ssh(_)
        )
    }
}
