//! Command Request Model
//!
//! One caller's unit of work. A request is created per `execute` call,
//! consumed exactly once by the dispatch loop and dropped when its output
//! has been terminated. Dropping it releases the submission slot it holds,
//! which is what admits the next caller.

use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::Instant;
use uuid::Uuid;

use super::OutputLine;

/// A submitted command together with its result hand-off
pub struct CommandRequest {
    /// Identifier used in log output
    pub id: Uuid,
    /// Command text, without trailing newline
    pub command: String,
    /// Caller's timeout; also the per-line hand-off deadline
    pub timeout: Duration,
    /// When the submission was accepted
    pub accepted_at: Instant,
    result_tx: mpsc::Sender<OutputLine>,
    _slot: OwnedSemaphorePermit,
}

impl CommandRequest {
    pub(crate) fn new(
        command: String,
        timeout: Duration,
        result_tx: mpsc::Sender<OutputLine>,
        slot: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
            timeout,
            accepted_at: Instant::now(),
            result_tx,
            _slot: slot,
        }
    }

    /// Hand one item to the submitting caller.
    ///
    /// Waits at most `timeout` for the caller to take the previous item.
    /// Returns `false` when the caller has stopped listening.
    pub(crate) async fn deliver(&self, item: OutputLine) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, self.result_tx.send(item)).await,
            Ok(Ok(()))
        )
    }

    /// Whether the caller dropped its side of the result hand-off
    pub fn is_abandoned(&self) -> bool {
        self.result_tx.is_closed()
    }
}

impl fmt::Debug for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRequest")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("timeout", &self.timeout)
            .finish()
    }
}
