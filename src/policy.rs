//! Command Policy
//!
//! Deployment-side rules layered over a [`ShellSession`]: which commands
//! run under `sudo`, and which output fragments turn a finished command
//! into a failure. [`RemoteServer`] bundles a session with those rules and
//! a working directory.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, PolicyConfig};
use crate::error::{Error, Result};
use crate::shell::{ShellConnector, ShellSession, SshConnector};

/// Sudo allow-list and error keywords
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    sudo: bool,
    sudo_prefixes: Vec<String>,
    error_keywords: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default(), false)
    }
}

impl CommandPolicy {
    pub fn from_config(config: &PolicyConfig, sudo: bool) -> Self {
        Self {
            sudo,
            sudo_prefixes: config.sudo_prefixes.clone(),
            error_keywords: config.error_keywords.clone(),
        }
    }

    pub fn sudo_enabled(&self) -> bool {
        self.sudo
    }

    /// Prefix `sudo ` when enabled and the command starts with an
    /// allow-listed prefix. Matching is a plain string prefix.
    pub fn apply_sudo(&self, command: &str) -> String {
        if self.sudo
            && !command.starts_with("sudo ")
            && self
                .sudo_prefixes
                .iter()
                .any(|prefix| command.starts_with(prefix.as_str()))
        {
            format!("sudo {}", command)
        } else {
            command.to_string()
        }
    }

    /// Fail on the first output line containing an error keyword
    pub fn check_output(&self, command: &str, lines: &[String]) -> Result<()> {
        for line in lines {
            if let Some(keyword) = self
                .error_keywords
                .iter()
                .find(|keyword| line.contains(keyword.as_str()))
            {
                return Err(Error::RemoteCommand {
                    command: command.to_string(),
                    keyword: keyword.clone(),
                    line: line.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A configured server: one shell session plus the command policy
pub struct RemoteServer {
    config: Config,
    policy: CommandPolicy,
    session: Option<ShellSession>,
    absolute_work_dir: Option<String>,
    cancel: CancellationToken,
}

impl RemoteServer {
    pub fn new(config: Config) -> Self {
        let policy = CommandPolicy::from_config(&config.policy, config.server.sudo);
        Self {
            config,
            policy,
            session: None,
            absolute_work_dir: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Tie every session this server opens to `cancel`
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Connect over SSH and change into the configured work dir
    pub async fn connect(&mut self) -> Result<()> {
        self.connect_with(&SshConnector::new()).await
    }

    /// Connect through any connector and change into the configured work dir.
    ///
    /// The `cd` runs with the error check on; the absolute path is taken
    /// from the first `pwd` output line that starts with `/`.
    pub async fn connect_with(&mut self, connector: &dyn ShellConnector) -> Result<()> {
        self.config.server.validate()?;
        self.config.validate()?;
        info!("Connecting to server {}", self.config.server.host);

        // Closing one session must not cancel its successor
        let session = ShellSession::connect_with_cancel(
            connector,
            &self.config.server.connection_properties(),
            &self.config.server.connect_timeouts(),
            &self.config.shell,
            self.cancel.child_token(),
        )
        .await?;
        // Replacing an older session closes it
        if let Some(previous) = self.session.replace(session) {
            previous.close().await?;
        }

        if let Some(work_dir) = self.config.server.work_dir.clone() {
            self.execute_cmd(&format!("cd {}", work_dir), self.default_timeout(), false)
                .await?;
            let lines = self.execute_for_results("pwd", self.default_timeout()).await?;
            let absolute = lines
                .into_iter()
                .map(|line| line.trim().to_string())
                .find(|line| line.starts_with('/'))
                .ok_or_else(|| Error::WorkDirUnresolved {
                    work_dir: work_dir.clone(),
                })?;
            info!("Working directory on {}: {}", self.config.server.host, absolute);
            self.absolute_work_dir = Some(absolute);
        }
        Ok(())
    }

    /// Run a command under the policy.
    ///
    /// With `ignore_error` the output is printed and logged but never
    /// inspected; otherwise any error keyword fails the call.
    pub async fn execute_cmd(&self, command: &str, timeout: Duration, ignore_error: bool) -> Result<Vec<String>> {
        let session = self.session()?;
        let command = self.policy.apply_sudo(command);

        let lines = if ignore_error {
            session.execute_and_print(&command, timeout).await?
        } else {
            session.execute(&command, timeout).await?
        };
        debug!("<ssh> {}\n{}", command, lines.join("\n"));

        if !ignore_error {
            self.policy.check_output(&command, &lines)?;
        }
        Ok(lines)
    }

    /// Run a command under the sudo rule and return its lines unchecked
    pub async fn execute_for_results(&self, command: &str, timeout: Duration) -> Result<Vec<String>> {
        let command = self.policy.apply_sudo(command);
        self.session()?.execute(&command, timeout).await
    }

    /// Close the session; safe to call repeatedly or without a connection
    pub async fn close(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            info!("Closing connection to {}", self.config.server.host);
            session.close().await?;
        }
        Ok(())
    }

    pub fn absolute_work_dir(&self) -> Option<&str> {
        self.absolute_work_dir.as_deref()
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_closed())
    }

    pub fn session(&self) -> Result<&ShellSession> {
        self.session.as_ref().ok_or_else(|| Error::NotConnected {
            host: self.config.server.host.clone(),
        })
    }

    fn default_timeout(&self) -> Duration {
        self.config.shell.default_timeout()
    }
}
