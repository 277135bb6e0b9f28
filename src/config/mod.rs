//! Configuration management for shellmux
//!
//! This module holds the configuration model for a shell session: which
//! server to reach, how the multiplexer detects command completion and
//! paces its polling, and the deployment-side command policy. Loading and
//! saving live in [`loader`].

pub mod loader;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::{ConnectTimeouts, ConnectionProperties};
use crate::shell::completion::{DEFAULT_PATTERNS, CompletionPatterns};

/// Main configuration structure for shellmux
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote server configuration
    pub server: ServerConfig,

    /// Shell session and multiplexer tuning
    pub shell: ShellConfig,

    /// Command policy applied above the multiplexer
    pub policy: PolicyConfig,
}

impl Config {
    /// Validate the parts that do not depend on a target server
    pub fn validate(&self) -> Result<()> {
        self.shell.validate()?;
        self.policy.validate()
    }
}

/// Remote server configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or address
    pub host: String,

    /// SSH port
    pub port: u16,

    /// Login user
    pub username: String,

    /// Login password
    pub password: String,

    /// Transport connect timeout in seconds
    pub session_connect_timeout_secs: u64,

    /// Channel open timeout in seconds
    pub channel_connect_timeout_secs: u64,

    /// Directory to change into right after connecting
    pub work_dir: Option<String>,

    /// Prefix allow-listed commands with `sudo`
    pub sudo: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: String::new(),
            session_connect_timeout_secs: 10,
            channel_connect_timeout_secs: 10,
            work_dir: None,
            sudo: false,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("session_connect_timeout_secs", &self.session_connect_timeout_secs)
            .field("channel_connect_timeout_secs", &self.channel_connect_timeout_secs)
            .field("work_dir", &self.work_dir)
            .field("sudo", &self.sudo)
            .finish()
    }
}

impl ServerConfig {
    /// Check that every field needed to connect is present
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(invalid("server.host", "Host cannot be empty"));
        }
        if self.port == 0 {
            return Err(invalid("server.port", "Port must be greater than 0"));
        }
        if self.username.trim().is_empty() {
            return Err(invalid("server.username", "Username cannot be empty"));
        }
        if self.session_connect_timeout_secs == 0 {
            return Err(invalid(
                "server.session_connect_timeout_secs",
                "Session connect timeout must be greater than 0",
            ));
        }
        if self.channel_connect_timeout_secs == 0 {
            return Err(invalid(
                "server.channel_connect_timeout_secs",
                "Channel connect timeout must be greater than 0",
            ));
        }
        if let Some(dir) = &self.work_dir {
            if dir.trim().is_empty() {
                return Err(invalid("server.work_dir", "Work dir cannot be blank"));
            }
        }
        Ok(())
    }

    /// Endpoint and credentials for the transport
    pub fn connection_properties(&self) -> ConnectionProperties {
        ConnectionProperties::new(
            self.host.clone(),
            self.port,
            self.username.clone(),
            self.password.clone(),
        )
    }

    /// Session and channel establishment timeouts
    pub fn connect_timeouts(&self) -> ConnectTimeouts {
        ConnectTimeouts {
            session: Duration::from_secs(self.session_connect_timeout_secs),
            channel: Duration::from_secs(self.channel_connect_timeout_secs),
        }
    }
}

/// Shell session and multiplexer tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Ordered prompt patterns; the first full-line match ends a command
    pub completion_patterns: Vec<String>,

    /// Interval between polls for more output
    pub poll_interval_ms: u64,

    /// Pause after the channel opens so the banner can arrive
    pub settle_delay_ms: u64,

    /// Share of a command's timeout the loop may spend polling.
    /// The rest is headroom so the caller's wait does not race the loop.
    pub budget_ratio: f64,

    /// Polls spent draining the login banner before accepting commands
    pub banner_poll_budget: u32,

    /// Timeout used by the default-timeout `execute` forms
    pub default_timeout_ms: u64,

    /// Read buffer size for the channel bridge
    pub read_chunk_size: usize,

    /// Polls spent draining output after sending `exit`
    pub close_drain_iterations: u32,

    /// Interval between close-time drain polls
    pub close_poll_interval_ms: u64,

    /// Drop the terminal echo of the command from its output
    pub suppress_echo: bool,

    /// Terminal type requested for the PTY
    pub term: String,

    /// PTY width; wide enough that echoed commands do not wrap
    pub cols: u16,

    /// PTY height
    pub rows: u16,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            completion_patterns: DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            poll_interval_ms: 100,
            settle_delay_ms: 200,
            budget_ratio: 0.8,
            banner_poll_budget: 20,
            default_timeout_ms: 5000,
            read_chunk_size: 1024,
            close_drain_iterations: 10,
            close_poll_interval_ms: 10,
            suppress_echo: true,
            term: "xterm".to_string(),
            cols: 512,
            rows: 24,
        }
    }
}

impl ShellConfig {
    /// Validate tuning values and compile-check the patterns
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(invalid(
                "shell.poll_interval_ms",
                "Poll interval must be greater than 0",
            ));
        }
        if !(self.budget_ratio > 0.0 && self.budget_ratio <= 1.0) {
            return Err(invalid(
                "shell.budget_ratio",
                "Budget ratio must be in (0, 1]",
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(invalid(
                "shell.default_timeout_ms",
                "Default timeout must be greater than 0",
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(invalid(
                "shell.read_chunk_size",
                "Read chunk size must be greater than 0",
            ));
        }
        if self.cols == 0 || self.rows == 0 {
            return Err(invalid("shell.cols", "PTY dimensions must be greater than 0"));
        }
        self.compile_patterns().map(|_| ())
    }

    /// Compile `completion_patterns` in order
    pub fn compile_patterns(&self) -> Result<CompletionPatterns> {
        CompletionPatterns::from_patterns(&self.completion_patterns)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn close_poll_interval(&self) -> Duration {
        Duration::from_millis(self.close_poll_interval_ms)
    }
}

/// Command policy applied by the deployment-side wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Command prefixes that get `sudo ` prepended when `server.sudo` is on
    pub sudo_prefixes: Vec<String>,

    /// Output fragments that turn a finished command into an error
    pub error_keywords: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            sudo_prefixes: [
                "./jps.sh",
                "./startup.sh",
                "./shutdown.sh",
                "./clean.sh",
                "cp",
                "mv",
                "rm",
                "chmod",
                "tar",
                "docker",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            error_keywords: ["No such file or directory", "Permission denied", "-bash:"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.error_keywords.iter().any(|k| k.is_empty()) {
            return Err(invalid(
                "policy.error_keywords",
                "Error keywords cannot be empty strings",
            ));
        }
        if self.sudo_prefixes.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid(
                "policy.sudo_prefixes",
                "Sudo prefixes cannot be blank",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> Error {
    Error::ConfigValidationFailed {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
