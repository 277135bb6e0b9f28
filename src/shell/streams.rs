//! Shell Streams
//!
//! Every shell backend bridges its blocking or protocol-specific I/O into a
//! pair of channels, so the dispatch loop sees one uniform duplex stream:
//! events coming out of the remote shell and bytes going into it.

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Something the remote side of a shell channel produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Terminal output bytes
    Data(Vec<u8>),
    /// The remote shell reported its exit status
    ExitStatus(u32),
    /// The remote side will send nothing more
    Eof,
}

/// Backend-facing ends of a [`ShellStreams`] pair
#[derive(Debug)]
pub struct ChannelEnds {
    /// Push output and lifecycle events towards the dispatch loop
    pub output_tx: UnboundedSender<StreamEvent>,
    /// Receive bytes the dispatch loop wants written to the shell
    pub input_rx: UnboundedReceiver<Vec<u8>>,
}

/// Loop-facing duplex stream of one shell channel
#[derive(Debug)]
pub struct ShellStreams {
    /// Output and lifecycle events from the shell
    output_rx: UnboundedReceiver<StreamEvent>,
    /// Bytes for the shell's stdin
    input_tx: UnboundedSender<Vec<u8>>,
    /// Set once EOF was seen or the backend dropped its sender
    closed: bool,
    /// Exit status, if the backend reported one
    exit_status: Option<u32>,
    stats: StreamStats,
}

impl ShellStreams {
    /// Create new shell streams from channels
    pub fn from_channels(
        output_rx: UnboundedReceiver<StreamEvent>,
        input_tx: UnboundedSender<Vec<u8>>,
    ) -> Self {
        Self {
            output_rx,
            input_tx,
            closed: false,
            exit_status: None,
            stats: StreamStats::default(),
        }
    }

    /// Create connected streams plus the ends a backend drives
    pub fn channel() -> (Self, ChannelEnds) {
        let (output_tx, output_rx) = unbounded_channel();
        let (input_tx, input_rx) = unbounded_channel();
        (
            Self::from_channels(output_rx, input_tx),
            ChannelEnds {
                output_tx,
                input_rx,
            },
        )
    }

    /// Write raw bytes to the shell
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.input_tx
            .send(data.to_vec())
            .map_err(|_| Error::ShellWriteFailed {
                reason: "shell input closed".to_string(),
            })?;
        self.stats.bytes_written += data.len() as u64;
        self.stats.write_operations += 1;
        Ok(())
    }

    /// Write one line of text followed by a newline
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');
        self.write(&data)
    }

    /// Take output that is already available without waiting
    pub fn try_read_now(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.closed {
                return None;
            }
            match self.output_rx.try_recv() {
                Ok(event) => {
                    if let Some(data) = self.absorb(event) {
                        return Some(data);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    /// Wait for output until `deadline`.
    ///
    /// Returns `None` when the deadline passes or the channel closes; check
    /// [`is_closed`](Self::is_closed) to tell them apart. Cancel safe.
    pub async fn read_until(&mut self, deadline: Instant) -> Option<Vec<u8>> {
        loop {
            if self.closed {
                return None;
            }
            match tokio::time::timeout_at(deadline, self.output_rx.recv()).await {
                Ok(Some(event)) => {
                    if let Some(data) = self.absorb(event) {
                        return Some(data);
                    }
                }
                Ok(None) => {
                    self.closed = true;
                    return None;
                }
                Err(_) => {
                    self.stats.read_timeouts += 1;
                    return None;
                }
            }
        }
    }

    /// Wait for output with no deadline; `None` once the channel closes.
    /// Cancel safe.
    pub async fn read(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.closed {
                return None;
            }
            match self.output_rx.recv().await {
                Some(event) => {
                    if let Some(data) = self.absorb(event) {
                        return Some(data);
                    }
                }
                None => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    /// Drain all output that is already buffered and return it
    pub fn discard_pending(&mut self) -> Vec<u8> {
        let mut discarded = Vec::new();
        while let Some(data) = self.try_read_now() {
            discarded.extend_from_slice(&data);
        }
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    fn absorb(&mut self, event: StreamEvent) -> Option<Vec<u8>> {
        match event {
            StreamEvent::Data(data) => {
                self.stats.bytes_read += data.len() as u64;
                self.stats.read_operations += 1;
                Some(data)
            }
            StreamEvent::ExitStatus(status) => {
                self.exit_status = Some(status);
                None
            }
            StreamEvent::Eof => {
                self.closed = true;
                None
            }
        }
    }
}

/// Stream statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    /// Total bytes read
    pub bytes_read: u64,
    /// Total bytes written
    pub bytes_written: u64,
    /// Number of data chunks read
    pub read_operations: u64,
    /// Number of write operations
    pub write_operations: u64,
    /// Number of deadline-bounded reads that saw no data
    pub read_timeouts: u64,
}

impl StreamStats {
    /// Get read throughput (bytes per operation)
    pub fn read_throughput(&self) -> f64 {
        if self.read_operations == 0 {
            0.0
        } else {
            self.bytes_read as f64 / self.read_operations as f64
        }
    }
}
