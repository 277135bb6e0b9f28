//! Shell Session
//!
//! Caller-facing handle of one persistent shell. Any number of tasks may
//! share a session (`Arc<ShellSession>`); their commands run strictly one
//! after another, in submission order. Each call gets its own result
//! hand-off, and the next call is admitted only once the previous one's
//! output has been terminated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::dispatch::{DispatchLoop, DispatchSettings, DispatchState, REMOTE_LOG_TARGET};
use super::lines::LineAssembler;
use super::ssh::SshConnector;
use super::streams::ShellStreams;
use super::transport::{PtyOptions, ShellConnector, TransportHandle};
use crate::config::ShellConfig;
use crate::error::{Error, Result};
use crate::models::{CommandRequest, ConnectTimeouts, ConnectionProperties, OutputLine};

/// Snapshot of a session for display and logging
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: Uuid,
    /// `user@host:port`
    pub label: String,
    /// Backend that opened the shell
    pub transport: String,
    pub connected_at: DateTime<Utc>,
    pub state: DispatchState,
    pub ready: bool,
    pub closed: bool,
}

/// One persistent interactive shell shared by sequential commands
pub struct ShellSession {
    id: Uuid,
    label: String,
    transport_name: String,
    connected_at: DateTime<Utc>,
    submit_tx: mpsc::Sender<CommandRequest>,
    slots: Arc<Semaphore>,
    ready_rx: watch::Receiver<bool>,
    state_rx: watch::Receiver<DispatchState>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<ShellStreams>>>,
    transport: Mutex<Option<Box<dyn TransportHandle>>>,
    closed: AtomicBool,
    default_timeout: Duration,
    close_drain_iterations: u32,
    close_poll_interval: Duration,
}

impl ShellSession {
    /// Open a shell through `connector` and start its dispatch loop.
    ///
    /// Returns once the login banner has been drained and the session is
    /// ready to accept commands.
    pub async fn connect(
        connector: &dyn ShellConnector,
        properties: &ConnectionProperties,
        timeouts: &ConnectTimeouts,
        config: &ShellConfig,
    ) -> Result<Self> {
        Self::connect_with_cancel(connector, properties, timeouts, config, CancellationToken::new())
            .await
    }

    /// Like [`connect`](Self::connect), with a caller-owned cancellation
    /// token. Cancelling it stops the dispatch loop; pending and in-flight
    /// calls fail with `SessionClosed`.
    pub async fn connect_with_cancel(
        connector: &dyn ShellConnector,
        properties: &ConnectionProperties,
        timeouts: &ConnectTimeouts,
        config: &ShellConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let settings = DispatchSettings::from_config(config)?;
        let label = format!(
            "{}@{}:{}",
            properties.username, properties.host, properties.port
        );

        debug!("Opening shell {} via {}", label, connector.name());
        let (streams, mut transport) = connector
            .connect(properties, timeouts, &PtyOptions::from_config(config))
            .await?;

        let (submit_tx, submit_rx) = mpsc::channel(1);
        let (ready_tx, mut ready_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(DispatchState::Idle);
        let banner_window = settings.banner_window();

        let worker = DispatchLoop::new(
            streams,
            submit_rx,
            settings,
            cancel.clone(),
            ready_tx,
            state_tx,
            label.clone(),
        )
        .spawn();

        // The borrow guard from wait_for must not outlive this statement
        let became_ready = matches!(
            tokio::time::timeout(
                banner_window + timeouts.channel,
                ready_rx.wait_for(|ready| *ready),
            )
            .await,
            Ok(Ok(_))
        );
        if !became_ready {
            cancel.cancel();
            let exit_status = match worker.await {
                Ok(streams) => streams.exit_status(),
                Err(_) => None,
            };
            if let Err(e) = transport.disconnect().await {
                debug!("Disconnect after failed start of {}: {}", label, e);
            }
            return Err(Error::ChannelOpenFailed {
                reason: format!(
                    "shell closed before it became ready (exit-status: {:?})",
                    exit_status
                ),
            });
        }

        info!("Shell session {} established via {}", label, connector.name());

        Ok(Self {
            id: Uuid::new_v4(),
            label,
            transport_name: connector.name().to_string(),
            connected_at: Utc::now(),
            submit_tx,
            slots: Arc::new(Semaphore::new(1)),
            ready_rx,
            state_rx,
            cancel,
            worker: Mutex::new(Some(worker)),
            transport: Mutex::new(Some(transport)),
            closed: AtomicBool::new(false),
            default_timeout: config.default_timeout(),
            close_drain_iterations: config.close_drain_iterations,
            close_poll_interval: config.close_poll_interval(),
        })
    }

    /// Open a shell on a remote host over SSH
    pub async fn connect_ssh(
        properties: &ConnectionProperties,
        timeouts: &ConnectTimeouts,
        config: &ShellConfig,
    ) -> Result<Self> {
        Self::connect(&SshConnector::new(), properties, timeouts, config).await
    }

    /// Submit a command and get a handle on its output stream.
    ///
    /// Waits up to `timeout` for the session to accept the submission. The
    /// output must then be fully read within `timeout` of acceptance.
    pub async fn submit(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let command = command.trim_end_matches(['\r', '\n']);
        if command.trim().is_empty() {
            return Err(Error::EmptyCommand);
        }
        // A second line would run as its own shell command with no owner
        if command.contains(['\r', '\n']) {
            return Err(Error::MultiLineCommand {
                command: command.to_string(),
            });
        }
        if timeout.is_zero() {
            return Err(Error::InvalidTimeout {
                command: command.to_string(),
            });
        }
        if self.is_closed() {
            return Err(Error::SessionClosed { exit_status: None });
        }

        let submit_deadline = Instant::now() + timeout;
        let admission = async {
            let mut ready = self.ready_rx.clone();
            ready
                .wait_for(|ready| *ready)
                .await
                .map_err(|_| Error::SessionClosed { exit_status: None })?;
            let slot = self
                .slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::SessionClosed { exit_status: None })?;
            let (result_tx, result_rx) = mpsc::channel(1);
            self.submit_tx
                .send(CommandRequest::new(command.to_string(), timeout, result_tx, slot))
                .await
                .map_err(|_| Error::SessionClosed { exit_status: None })?;
            Ok::<_, Error>(result_rx)
        };

        let result_rx = tokio::time::timeout_at(submit_deadline, admission)
            .await
            .map_err(|_| Error::CommandTimeout {
                command: command.to_string(),
                duration: timeout,
            })??;

        Ok(CommandOutput {
            command: command.to_string(),
            timeout,
            deadline: Instant::now() + timeout,
            result_rx,
            finished: false,
        })
    }

    /// Run a command and collect its output lines
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<Vec<String>> {
        self.submit(command, timeout).await?.collect().await
    }

    /// Run a command with the session's default timeout
    pub async fn execute_default(&self, command: &str) -> Result<Vec<String>> {
        self.execute(command, self.default_timeout).await
    }

    /// Run a command, handing each line to `on_line` as it arrives.
    ///
    /// Returns the number of lines delivered.
    pub async fn execute_with<F>(&self, command: &str, timeout: Duration, mut on_line: F) -> Result<usize>
    where
        F: FnMut(&str),
    {
        let mut output = self.submit(command, timeout).await?;
        let mut count = 0;
        while let Some(line) = output.next_line().await? {
            on_line(&line);
            count += 1;
        }
        Ok(count)
    }

    /// Run a command and print each line to stdout as it arrives
    pub async fn execute_and_print(&self, command: &str, timeout: Duration) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        self.execute_with(command, timeout, |line| {
            println!("{}", line);
            lines.push(line.to_string());
        })
        .await?;
        Ok(lines)
    }

    /// End the shell and release the connection. Idempotent.
    ///
    /// Stops the dispatch loop, sends `exit`, drains output until a line
    /// contains `logout` or the drain budget is spent, then disconnects.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Shell session {} already closed", self.label);
            return Ok(());
        }
        info!("Closing shell session {}", self.label);
        self.cancel.cancel();

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            match worker.await {
                Ok(mut streams) => self.send_exit(&mut streams).await,
                Err(e) => warn!("Dispatch loop for {} failed: {}", self.label, e),
            }
        }

        let transport = self.transport.lock().await.take();
        if let Some(mut transport) = transport {
            if let Err(e) = transport.disconnect().await {
                warn!("Disconnect from {} failed: {}", self.label, e);
            }
        }
        Ok(())
    }

    async fn send_exit(&self, streams: &mut ShellStreams) {
        if streams.is_closed() {
            return;
        }
        if let Err(e) = streams.write_line("exit") {
            debug!("Could not send exit to {}: {}", self.label, e);
            return;
        }

        let mut assembler = LineAssembler::new();
        for _ in 0..self.close_drain_iterations {
            let deadline = Instant::now() + self.close_poll_interval;
            while let Some(data) = streams.read_until(deadline).await {
                for line in assembler.push(&data) {
                    info!(target: REMOTE_LOG_TARGET, "{}", line);
                    if line.contains("logout") {
                        return;
                    }
                }
            }
            if streams.is_closed() {
                return;
            }
        }
        debug!("No logout seen from {} while closing", self.label);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Current dispatch loop state
    pub fn state(&self) -> DispatchState {
        *self.state_rx.borrow()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            label: self.label.clone(),
            transport: self.transport_name.clone(),
            connected_at: self.connected_at,
            state: self.state(),
            ready: self.is_ready(),
            closed: self.is_closed(),
        }
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Output stream of one submitted command
#[derive(Debug)]
pub struct CommandOutput {
    command: String,
    timeout: Duration,
    deadline: Instant,
    result_rx: mpsc::Receiver<OutputLine>,
    finished: bool,
}

impl CommandOutput {
    /// Next output line, or `None` once the command's output has ended
    ///
    /// # Errors
    /// `CommandTimeout` when the output does not end within the command's
    /// timeout, `SessionClosed` when the shell went away.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }
        let item = tokio::time::timeout_at(self.deadline, self.result_rx.recv()).await;
        match item {
            Ok(Some(OutputLine::Line(line))) => Ok(Some(line)),
            Ok(Some(OutputLine::Sentinel)) => {
                self.finished = true;
                Ok(None)
            }
            Ok(Some(OutputLine::Closed { exit_status })) => {
                self.finished = true;
                Err(Error::SessionClosed { exit_status })
            }
            Ok(None) => {
                self.finished = true;
                Err(Error::SessionClosed { exit_status: None })
            }
            Err(_) => {
                self.finished = true;
                Err(Error::CommandTimeout {
                    command: self.command.clone(),
                    duration: self.timeout,
                })
            }
        }
    }

    /// Read every remaining line
    pub async fn collect(mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}
