//! Connection Model
//!
//! Remote endpoint and credentials used to open a transport session.

use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Remote endpoint plus password credentials
///
/// The password is wiped from memory on drop and never shows up in
/// `Debug` output.
#[derive(Clone)]
pub struct ConnectionProperties {
    /// Host name or address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Login user
    pub username: String,
    password: Zeroizing<String>,
}

impl ConnectionProperties {
    /// Create connection properties for password authentication
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// The login password
    pub fn password(&self) -> &str {
        self.password.as_str()
    }

    /// `host:port` address suitable for socket resolution
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProperties")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Timeouts applied while establishing a shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectTimeouts {
    /// Transport connect + authentication
    pub session: Duration,
    /// Channel open + PTY + shell request
    pub channel: Duration,
}

impl Default for ConnectTimeouts {
    fn default() -> Self {
        Self {
            session: Duration::from_secs(10),
            channel: Duration::from_secs(10),
        }
    }
}
