//! Local PTY Shell Backend
//!
//! Spawns an interactive shell on this machine inside a pseudoterminal with
//! portable-pty. Blocking PTY reads and writes run on dedicated threads and
//! are bridged into [`ShellStreams`], the same way the SSH backend bridges
//! its channel.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread;

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use super::streams::{ChannelEnds, ShellStreams, StreamEvent};
use super::transport::{PtyOptions, ShellConnector, TransportHandle};
use crate::error::{Error, Result};
use crate::models::{ConnectTimeouts, ConnectionProperties};

/// Spawns a local interactive shell in a PTY
///
/// Connection properties are ignored; the shell runs as the current user.
/// `PS1` is pinned to `"$ "` so the default completion patterns apply.
#[derive(Debug, Clone)]
pub struct LocalShellConnector {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
}

impl Default for LocalShellConnector {
    fn default() -> Self {
        Self::new("/bin/sh").arg("-i")
    }
}

impl LocalShellConnector {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: vec![("PS1".to_string(), "$ ".to_string())],
            working_dir: None,
        }
    }

    /// bash without rc files, so nothing overrides the prompt
    pub fn bash() -> Self {
        Self::new("bash").arg("--norc").arg("--noprofile")
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn spawn(&self, pty: &PtyOptions) -> Result<(ShellStreams, Box<dyn TransportHandle>)> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: pty.rows,
                cols: pty.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::PtyCreationFailed {
                command: self.program.clone(),
                reason: e.to_string(),
            })?;

        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        cmd.env("TERM", &pty.term);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::CommandSpawnFailed {
                command: self.program.clone(),
                reason: e.to_string(),
            })?;
        // The reader only sees EOF once no slave handle is left open here
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::PtyCreationFailed {
                command: self.program.clone(),
                reason: format!("reader clone failed: {}", e),
            })?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::PtyCreationFailed {
                command: self.program.clone(),
                reason: format!("writer take failed: {}", e),
            })?;

        info!(
            "Spawned local shell '{}' (pid {:?})",
            self.program,
            child.process_id()
        );

        let killer = child.clone_killer();
        let (streams, ends) = ShellStreams::channel();
        spawn_io_threads(reader, writer, child, ends, pty.read_chunk_size);

        Ok((
            streams,
            Box::new(LocalTransport {
                killer,
                _master: pair.master,
            }),
        ))
    }
}

#[async_trait]
impl ShellConnector for LocalShellConnector {
    fn name(&self) -> &str {
        "local-pty"
    }

    async fn connect(
        &self,
        _properties: &ConnectionProperties,
        timeouts: &ConnectTimeouts,
        pty: &PtyOptions,
    ) -> Result<(ShellStreams, Box<dyn TransportHandle>)> {
        let connector = self.clone();
        let pty = pty.clone();
        let spawned = tokio::task::spawn_blocking(move || connector.spawn(&pty));

        tokio::time::timeout(timeouts.channel, spawned)
            .await
            .map_err(|_| Error::ConnectTimeout {
                host: "localhost".to_string(),
                port: 0,
                stage: "pty spawn".to_string(),
                duration: timeouts.channel,
            })?
            .map_err(|e| Error::CommandSpawnFailed {
                command: self.program.clone(),
                reason: e.to_string(),
            })?
    }
}

/// Reader thread forwards PTY output and then the exit status; writer
/// thread drains the input channel into the PTY
fn spawn_io_threads(
    mut reader: Box<dyn Read + Send>,
    mut writer: Box<dyn Write + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    ends: ChannelEnds,
    chunk_size: usize,
) {
    let ChannelEnds {
        output_tx,
        mut input_rx,
    } = ends;

    thread::spawn(move || {
        let mut buf = vec![0u8; chunk_size.max(1)];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("PTY read EOF");
                    break;
                }
                Ok(n) => {
                    if output_tx.send(StreamEvent::Data(buf[..n].to_vec())).is_err() {
                        debug!("PTY read: receiver dropped, stopping reader thread");
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // EIO is how Linux reports a hung-up PTY
                    debug!("PTY read ended: {}", e);
                    break;
                }
            }
        }

        match child.wait() {
            Ok(status) => {
                let _ = output_tx.send(StreamEvent::ExitStatus(status.exit_code()));
            }
            Err(e) => debug!("Waiting for local shell failed: {}", e),
        }
        let _ = output_tx.send(StreamEvent::Eof);
        debug!("PTY reader thread exiting");
    });

    thread::spawn(move || {
        while let Some(data) = input_rx.blocking_recv() {
            if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                warn!("PTY write error ({}): {}", e.kind(), e);
                break;
            }
        }
        debug!("PTY writer thread exiting");
    });
}

struct LocalTransport {
    killer: Box<dyn ChildKiller + Send + Sync>,
    _master: Box<dyn MasterPty + Send>,
}

#[async_trait]
impl TransportHandle for LocalTransport {
    async fn disconnect(&mut self) -> Result<()> {
        // Usually already gone after `exit`
        if let Err(e) = self.killer.kill() {
            debug!("Local shell kill: {}", e);
        }
        Ok(())
    }
}
