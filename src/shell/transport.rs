//! Shell Transport Abstraction
//!
//! A transport opens one interactive shell with a PTY and hands back its
//! byte streams plus a handle for tearing the connection down. The
//! multiplexer only ever talks to these two traits, which is what lets the
//! same dispatch loop drive an SSH shell, a local PTY or a scripted shell
//! in tests.

use async_trait::async_trait;

use super::streams::ShellStreams;
use crate::config::ShellConfig;
use crate::error::Result;
use crate::models::{ConnectTimeouts, ConnectionProperties};

/// PTY parameters requested when the shell is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyOptions {
    /// Terminal type, e.g. `xterm`
    pub term: String,
    /// Columns
    pub cols: u16,
    /// Rows
    pub rows: u16,
    /// Buffer size for each read from the underlying channel
    pub read_chunk_size: usize,
}

impl Default for PtyOptions {
    fn default() -> Self {
        Self::from_config(&ShellConfig::default())
    }
}

impl PtyOptions {
    pub fn from_config(config: &ShellConfig) -> Self {
        Self {
            term: config.term.clone(),
            cols: config.cols,
            rows: config.rows,
            read_chunk_size: config.read_chunk_size,
        }
    }
}

/// Opens interactive shells
///
/// Implementations must apply `timeouts.session` to establishing the
/// connection and `timeouts.channel` to opening the shell channel.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    /// Short name used in log output
    fn name(&self) -> &str;

    /// Open a shell and return its streams plus a teardown handle
    ///
    /// # Errors
    /// Returns a connect-class error (`ConnectFailed`, `AuthenticationFailed`,
    /// `ConnectTimeout`, `ChannelOpenFailed`, PTY errors); nothing is left
    /// open on failure.
    async fn connect(
        &self,
        properties: &ConnectionProperties,
        timeouts: &ConnectTimeouts,
        pty: &PtyOptions,
    ) -> Result<(ShellStreams, Box<dyn TransportHandle>)>;
}

/// Teardown side of an open shell
#[async_trait]
pub trait TransportHandle: Send {
    /// Release the channel and the connection below it.
    ///
    /// Called once, after the shell streams have been drained.
    async fn disconnect(&mut self) -> Result<()>;
}
