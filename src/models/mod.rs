//! Core data models for shellmux
//!
//! This module contains the data structures shared between the command
//! multiplexer, its transports and its callers: connection endpoints,
//! per-call command descriptors and the lines flowing back to callers.

pub mod command;
pub mod connection;
pub mod output_line;

// Re-exports for convenience
pub use command::CommandRequest;
pub use connection::{ConnectTimeouts, ConnectionProperties};
pub use output_line::OutputLine;
