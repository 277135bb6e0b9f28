//! Dispatch Loop
//!
//! The single background task that owns the shell streams. It accepts one
//! command at a time from the submission hand-off, writes it to the shell,
//! and routes output lines to that command's caller until a completion
//! pattern matches or the retry budget runs out. Output that arrives while
//! no command owns the shell is logged, never handed to a caller.
//!
//! ```text
//!            ┌──────────── submission ────────────┐
//!            ▼                                    │
//!  Idle ──► Sending ──► Polling ──(prompt | budget)──► Idle
//!   │                      │
//!   └─ stray output ─► DrainingWithoutOwner ──► Idle
//! ```

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::completion::CompletionPatterns;
use super::lines::LineAssembler;
use super::streams::ShellStreams;
use crate::config::ShellConfig;
use crate::error::Result;
use crate::models::{CommandRequest, OutputLine};

/// Log target for remote output that no caller owns
pub const REMOTE_LOG_TARGET: &str = "shellmux::remote";

/// Where the dispatch loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Waiting for a submission
    Idle,
    /// Flushing stale output and writing the command
    Sending,
    /// Collecting output for the in-flight command
    Polling {
        /// Poll iterations left in the retry budget
        remaining: u32,
    },
    /// Reading output with no command in flight (banner, late output)
    DrainingWithoutOwner,
    /// The loop has exited
    Stopped,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchState::Idle => write!(f, "idle"),
            DispatchState::Sending => write!(f, "sending"),
            DispatchState::Polling { remaining } => write!(f, "polling ({} left)", remaining),
            DispatchState::DrainingWithoutOwner => write!(f, "draining"),
            DispatchState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Poll iterations a command may use before it is forced to end:
/// `ceil(ratio * timeout / poll_interval)`, at least one.
pub fn retry_budget(timeout: Duration, poll_interval: Duration, ratio: f64) -> u32 {
    let poll_ms = poll_interval.as_millis().max(1) as f64;
    let iterations = ratio * timeout.as_millis() as f64 / poll_ms;
    // absorb float noise such as 40.000000000000004
    let budget = (iterations - 1e-9).ceil();
    if budget < 1.0 {
        1
    } else if budget >= u32::MAX as f64 {
        u32::MAX
    } else {
        budget as u32
    }
}

/// Tuning the loop runs with, resolved from [`ShellConfig`]
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub patterns: CompletionPatterns,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub budget_ratio: f64,
    pub banner_poll_budget: u32,
    pub suppress_echo: bool,
    /// PTY width; longer echoes come back wrapped
    pub cols: usize,
}

impl DispatchSettings {
    pub fn from_config(config: &ShellConfig) -> Result<Self> {
        Ok(Self {
            patterns: config.compile_patterns()?,
            poll_interval: config.poll_interval(),
            settle_delay: config.settle_delay(),
            budget_ratio: config.budget_ratio,
            banner_poll_budget: config.banner_poll_budget,
            suppress_echo: config.suppress_echo,
            cols: usize::from(config.cols),
        })
    }

    /// Upper bound on how long the banner phase can take
    pub fn banner_window(&self) -> Duration {
        self.settle_delay + self.poll_interval * (self.banner_poll_budget + 1)
    }
}

enum Flow {
    Continue,
    Stop,
}

/// How polling for one command ended
enum Ending {
    Prompt,
    BudgetExhausted,
    ChannelClosed,
    Cancelled,
}

/// Owner of the shell streams
pub(crate) struct DispatchLoop {
    streams: ShellStreams,
    submissions: mpsc::Receiver<CommandRequest>,
    settings: DispatchSettings,
    cancel: CancellationToken,
    ready_tx: watch::Sender<bool>,
    state_tx: watch::Sender<DispatchState>,
    assembler: LineAssembler,
    /// Width of the last prompt seen, where the next echo starts
    prompt_width: usize,
    label: String,
}

impl DispatchLoop {
    pub(crate) fn new(
        streams: ShellStreams,
        submissions: mpsc::Receiver<CommandRequest>,
        settings: DispatchSettings,
        cancel: CancellationToken,
        ready_tx: watch::Sender<bool>,
        state_tx: watch::Sender<DispatchState>,
        label: String,
    ) -> Self {
        Self {
            streams,
            submissions,
            settings,
            cancel,
            ready_tx,
            state_tx,
            assembler: LineAssembler::new(),
            prompt_width: 0,
            label,
        }
    }

    /// Run on the current runtime; the handle yields the streams back
    pub(crate) fn spawn(self) -> JoinHandle<ShellStreams> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> ShellStreams {
        self.drain_banner().await;

        if !self.cancel.is_cancelled() && !self.streams.is_closed() {
            self.ready_tx.send_replace(true);
            debug!("Shell {} ready for commands", self.label);

            loop {
                self.set_state(DispatchState::Idle);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        debug!("Dispatch loop for {} cancelled", self.label);
                        break;
                    }
                    request = self.submissions.recv() => {
                        match request {
                            Some(request) => {
                                if let Flow::Stop = self.run_command(request).await {
                                    break;
                                }
                            }
                            None => {
                                debug!("Submission hand-off for {} dropped", self.label);
                                break;
                            }
                        }
                    }
                    chunk = self.streams.read() => {
                        match chunk {
                            Some(data) => self.drain_without_owner(&data),
                            None => {
                                warn!(
                                    "Shell channel for {} closed while idle (exit-status: {:?})",
                                    self.label,
                                    self.streams.exit_status()
                                );
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.ready_tx.send_replace(false);
        self.set_state(DispatchState::Stopped);
        let stats = self.streams.stats();
        debug!(
            "Dispatch loop for {} exiting ({} bytes read, {} written)",
            self.label, stats.bytes_read, stats.bytes_written
        );
        self.streams
    }

    /// Wait out the settle delay, then read the login banner until a prompt
    /// shows up or the banner budget is spent
    async fn drain_banner(&mut self) {
        self.set_state(DispatchState::DrainingWithoutOwner);

        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.settings.settle_delay) => {}
        }

        let mut saw_prompt = false;
        for _ in 0..self.settings.banner_poll_budget {
            if self.cancel.is_cancelled() || self.streams.is_closed() {
                return;
            }
            let tick_end = Instant::now() + self.settings.poll_interval;
            while let Some(data) = self.streams.read_until(tick_end).await {
                for line in self.assembler.push(&data) {
                    log_unowned(&line);
                }
                if self.tail_is_prompt() {
                    saw_prompt = true;
                    break;
                }
            }
            if saw_prompt {
                break;
            }
        }

        if !saw_prompt {
            warn!(
                "No prompt seen from {} within {} banner polls",
                self.label, self.settings.banner_poll_budget
            );
        }
        if let Some(tail) = self.assembler.take_partial() {
            if saw_prompt {
                self.prompt_width = tail.chars().count();
            }
            trace!(target: REMOTE_LOG_TARGET, "{}", tail);
        }
    }

    /// Output with no command in flight goes to the log
    fn drain_without_owner(&mut self, data: &[u8]) {
        self.set_state(DispatchState::DrainingWithoutOwner);
        for line in self.assembler.push(data) {
            log_unowned(&line);
        }
    }

    async fn run_command(&mut self, request: CommandRequest) -> Flow {
        if request.is_abandoned() {
            debug!("Skipping command {} whose caller already left", request.id);
            return Flow::Continue;
        }

        self.set_state(DispatchState::Sending);
        self.flush_stale(&request);

        let budget = retry_budget(
            request.timeout,
            self.settings.poll_interval,
            self.settings.budget_ratio,
        );
        debug!(
            "Sending command {} '{}' (budget {} polls of {:?})",
            request.id, request.command, budget, self.settings.poll_interval
        );

        if let Err(e) = self.streams.write_line(&request.command) {
            warn!("Command '{}' could not be written: {}", request.command, e);
            request
                .deliver(OutputLine::Closed {
                    exit_status: self.streams.exit_status(),
                })
                .await;
            return Flow::Stop;
        }

        let started = Instant::now();
        let echo_wraps =
            self.prompt_width + request.command.chars().count() >= self.settings.cols;
        let mut delivery = Delivery::new(
            &request,
            self.settings.suppress_echo,
            echo_wraps,
            self.cancel.clone(),
        );
        let ending = self.poll_command(&mut delivery, budget).await;

        match ending {
            Ending::Prompt => {
                if let Some(tail) = self.assembler.take_partial() {
                    trace!("Prompt after '{}': {:?}", request.command, tail);
                    self.prompt_width = tail.chars().count();
                }
                delivery.finish(OutputLine::Sentinel).await;
                debug!(
                    "Command {} completed in {:?} ({} lines)",
                    request.id,
                    started.elapsed(),
                    delivery.delivered
                );
                Flow::Continue
            }
            Ending::BudgetExhausted => {
                if let Some(tail) = self.assembler.take_partial() {
                    delivery.line(tail).await;
                }
                delivery.finish(OutputLine::Sentinel).await;
                debug!(
                    "Command {} ended by retry budget after {:?} ({} lines)",
                    request.id,
                    started.elapsed(),
                    delivery.delivered
                );
                Flow::Continue
            }
            Ending::ChannelClosed => {
                if let Some(tail) = self.assembler.take_partial() {
                    delivery.line(tail).await;
                }
                let exit_status = self.streams.exit_status();
                warn!(
                    "Shell channel for {} closed during '{}' (exit-status: {:?})",
                    self.label, request.command, exit_status
                );
                delivery.finish(OutputLine::Closed { exit_status }).await;
                Flow::Stop
            }
            Ending::Cancelled => {
                debug!("Command {} interrupted by session shutdown", request.id);
                Flow::Stop
            }
        }
    }

    /// Output still queued from an earlier command must not leak into this one
    fn flush_stale(&mut self, request: &CommandRequest) {
        let stale = self.streams.discard_pending();
        if !stale.is_empty() {
            debug!(
                "Discarded {} stale bytes before '{}': {:?}",
                stale.len(),
                request.command,
                String::from_utf8_lossy(&stale)
            );
        }
        if let Some(tail) = self.assembler.take_partial() {
            trace!("Dropped partial line before '{}': {:?}", request.command, tail);
        }
    }

    async fn poll_command(&mut self, delivery: &mut Delivery<'_>, budget: u32) -> Ending {
        for remaining in (0..budget).rev() {
            if self.cancel.is_cancelled() {
                return Ending::Cancelled;
            }
            self.set_state(DispatchState::Polling { remaining });

            let tick_end = Instant::now() + self.settings.poll_interval;
            let mut complete = false;

            while let Some(data) = self.streams.read_until(tick_end).await {
                for line in self.assembler.push(&data) {
                    if complete {
                        log_unowned(&line);
                    } else if self.settings.patterns.is_completion(&line) {
                        complete = true;
                    } else {
                        delivery.line(line).await;
                    }
                }
                if self.cancel.is_cancelled() {
                    return Ending::Cancelled;
                }
                if complete || self.tail_is_prompt() {
                    return Ending::Prompt;
                }
            }

            if self.streams.is_closed() {
                return Ending::ChannelClosed;
            }
        }
        Ending::BudgetExhausted
    }

    fn tail_is_prompt(&self) -> bool {
        self.assembler
            .partial()
            .is_some_and(|tail| self.settings.patterns.is_completion(&tail))
    }

    fn set_state(&self, state: DispatchState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// Result of handing one item to the caller
enum HandOff {
    Taken,
    Refused,
    Cancelled,
}

/// Whether `line` is the terminal echo of `command`.
///
/// An echo that wraps past the PTY width carries `" \r"` at each wrap
/// point, so after cleaning only its last segment is left.
fn is_echo(line: &str, command: &str, wraps: bool) -> bool {
    if line.ends_with(command) {
        return true;
    }
    let segment = line.trim_start();
    wraps && !segment.is_empty() && command.ends_with(segment)
}

/// Per-command routing of lines to the caller
struct Delivery<'a> {
    request: &'a CommandRequest,
    echo_pending: bool,
    echo_wraps: bool,
    abandoned: bool,
    delivered: usize,
    cancel: CancellationToken,
}

impl<'a> Delivery<'a> {
    fn new(
        request: &'a CommandRequest,
        suppress_echo: bool,
        echo_wraps: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request,
            echo_pending: suppress_echo,
            echo_wraps,
            abandoned: false,
            delivered: 0,
            cancel,
        }
    }

    async fn line(&mut self, line: String) {
        // Only the first line can be the terminal echo of the command
        if std::mem::take(&mut self.echo_pending)
            && is_echo(&line, &self.request.command, self.echo_wraps)
        {
            trace!("Echo of '{}' suppressed", self.request.command);
            return;
        }
        if self.abandoned {
            log_unowned(&line);
            return;
        }
        match self.hand_off(OutputLine::Line(line)).await {
            HandOff::Taken => self.delivered += 1,
            HandOff::Refused => {
                warn!(
                    "Caller of '{}' stopped taking output; remaining lines go to the log",
                    self.request.command
                );
                self.abandoned = true;
            }
            HandOff::Cancelled => self.abandoned = true,
        }
    }

    async fn finish(&mut self, marker: OutputLine) {
        if self.abandoned {
            return;
        }
        if let HandOff::Refused = self.hand_off(marker).await {
            debug!("Caller of '{}' gone before end of output", self.request.command);
        }
    }

    /// A slow reader must not hold up shutdown
    async fn hand_off(&self, item: OutputLine) -> HandOff {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => HandOff::Cancelled,
            taken = self.request.deliver(item) => {
                if taken {
                    HandOff::Taken
                } else {
                    HandOff::Refused
                }
            }
        }
    }
}

fn log_unowned(line: &str) {
    info!(target: REMOTE_LOG_TARGET, "{}", line);
}
