//! shellmux - sequential commands over one persistent remote shell
//!
//! This library keeps a single interactive shell (with a PTY) open on a
//! remote host and runs commands through it one at a time. A command ends
//! when the shell prints its prompt again, or when a retry budget derived
//! from the command's timeout is spent. Callers receive the command's
//! output line by line.
//!
//! ## Module Organization
//!
//! - [`shell`] - Session handle, dispatch loop, completion detection,
//!   line assembly and the SSH / local PTY transports
//! - [`policy`] - Sudo allow-list, error keywords and the `RemoteServer`
//!   wrapper used by deployment tooling
//! - [`config`] - Configuration model, TOML/JSON loading and validation
//! - [`models`] - Connection properties, command requests, output lines
//! - [`mod@error`] - Error types and Result aliases
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use shellmux::{ConnectTimeouts, ConnectionProperties, ShellConfig, ShellSession};
//!
//! # async fn run() -> shellmux::Result<()> {
//! let props = ConnectionProperties::new("10.0.0.5", 22, "deploy", "secret");
//! let session =
//!     ShellSession::connect_ssh(&props, &ConnectTimeouts::default(), &ShellConfig::default())
//!         .await?;
//!
//! let lines = session.execute("echo hello", Duration::from_secs(5)).await?;
//! assert_eq!(lines, vec!["hello"]);
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Dispatch task:** one tokio task owns the shell streams and runs
//!   commands in submission order
//! - **Bridge task / threads:** move bytes between the transport (russh
//!   channel or local PTY) and the dispatch task
//! - **Callers:** hand a command to the dispatch task through a
//!   capacity-1 submission channel and read its lines from a capacity-1
//!   result channel
//!
//! Remote output that arrives while no command is running is logged under
//! the `shellmux::remote` target.

#![allow(unexpected_cfgs)]

#[macro_use]
extern crate tracing;

pub mod config;
pub mod error;
pub mod models;
pub mod policy;
pub mod shell;

// Re-exports for core functionality
pub use config::{Config, PolicyConfig, ServerConfig, ShellConfig};
pub use error::{Error, Result};
pub use models::{ConnectTimeouts, ConnectionProperties, OutputLine};
pub use policy::{CommandPolicy, RemoteServer};
pub use shell::{
    CommandOutput, CompletionPatterns, LocalShellConnector, ShellConnector, ShellSession,
    SshConnector,
};

// Convenience re-exports for common types
pub use config::loader::ConfigLoader;

// Version information
/// The current version of shellmux from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The package name from Cargo.toml
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// The package description from Cargo.toml
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
