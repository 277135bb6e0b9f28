//! Test Utilities
//!
//! Shared fixtures for the integration and contract tests: a scripted
//! in-memory shell and helpers for opening sessions against it.

#![allow(dead_code)]

pub mod fixture_shell;

pub use fixture_shell::{FixtureLog, FixtureShell, BANNER, ROOT_PROMPT};

use shellmux::config::{Config, ShellConfig};
use shellmux::models::{ConnectTimeouts, ConnectionProperties};
use shellmux::shell::ShellSession;

/// Shell settings with a short settle delay so tests start quickly
pub fn test_shell_config() -> ShellConfig {
    ShellConfig {
        settle_delay_ms: 20,
        banner_poll_budget: 10,
        ..ShellConfig::default()
    }
}

/// Full configuration pointing at the fixture host
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "fixture.local".to_string();
    config.server.username = "test".to_string();
    config.server.password = "fixture-secret".to_string();
    config.shell = test_shell_config();
    config
}

pub fn test_properties() -> ConnectionProperties {
    ConnectionProperties::new("fixture.local", 22, "test", "fixture-secret")
}

/// Open a session on `fixture` with the test settings
pub async fn open_session(fixture: &FixtureShell) -> ShellSession {
    open_session_with(fixture, &test_shell_config()).await
}

pub async fn open_session_with(fixture: &FixtureShell, config: &ShellConfig) -> ShellSession {
    ShellSession::connect(
        fixture,
        &test_properties(),
        &ConnectTimeouts::default(),
        config,
    )
    .await
    .expect("fixture session should open")
}
