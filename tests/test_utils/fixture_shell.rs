//! Scripted Fixture Shell
//!
//! An in-memory stand-in for a remote login shell. It prints a banner and
//! a prompt, echoes every input line the way a PTY does, and understands a
//! small command language:
//!
//! | command            | behaviour                                              |
//! |--------------------|--------------------------------------------------------|
//! | `echo TEXT`        | prints TEXT                                            |
//! | `pwd` / `cd DIR`   | tracks a working directory; unknown DIR is an error    |
//! | `sleep MS`         | prints nothing for MS, then the prompt                 |
//! | `late TEXT MS`     | prints nothing, then TEXT and the prompt after MS      |
//! | `stray TEXT MS`    | prompt at once, TEXT after MS with no prompt           |
//! | `silent`           | prints nothing, not even a prompt                      |
//! | `burst N`          | N numbered lines in a single chunk                     |
//! | `chunked TEXT`     | TEXT and the prompt dribbled out a byte at a time      |
//! | `root`             | switches to a `[root@fixture ~]# ` prompt              |
//! | `die`              | hangs up with exit status 1                            |
//! | `exit`             | prints `logout`, hangs up with exit status 0           |
//!
//! Anything else is `-bash: X: command not found`.
//!
//! With [`FixtureShell::wrapping_echo`] the echo is wrapped at the PTY
//! width the way readline does it, with `" \r"` at each wrap point.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shellmux::error::{Error, Result};
use shellmux::models::{ConnectTimeouts, ConnectionProperties};
use shellmux::shell::{
    ChannelEnds, PtyOptions, ShellConnector, ShellStreams, StreamEvent, TransportHandle,
};
use tokio::sync::mpsc::UnboundedSender;

pub const BANNER: &str = "Last login: Mon Oct 19 10:00:00 2026 from 10.0.0.1\r\nWelcome to fixture\r\n";
pub const ROOT_PROMPT: &str = "[root@fixture ~]# ";

const KNOWN_DIRS: [&str; 4] = ["/", "/tmp", "/opt/app", "/home/test"];

/// What the fixture observed, shared with the test
#[derive(Debug, Default)]
pub struct FixtureLog {
    inputs: Mutex<Vec<String>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FixtureLog {
    /// Every command line the shell received, in order
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn count_of(&self, command: &str) -> usize {
        self.inputs().iter().filter(|c| c.as_str() == command).count()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

/// Connector producing fixture shells
#[derive(Debug, Clone)]
pub struct FixtureShell {
    prompt: String,
    echo: bool,
    wrap_echo: bool,
    refuse: bool,
    die_on_login: bool,
    log: Arc<FixtureLog>,
}

impl Default for FixtureShell {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureShell {
    pub fn new() -> Self {
        Self {
            prompt: "$ ".to_string(),
            echo: true,
            wrap_echo: false,
            refuse: false,
            die_on_login: false,
            log: Arc::new(FixtureLog::default()),
        }
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = prompt.to_string();
        self
    }

    /// Turn off the PTY-style input echo
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Wrap the echo at the requested PTY width
    pub fn wrapping_echo(mut self) -> Self {
        self.wrap_echo = true;
        self
    }

    /// Reject every connection attempt
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    /// Hang up right after the banner, before any prompt
    pub fn dying_on_login(mut self) -> Self {
        self.die_on_login = true;
        self
    }

    pub fn log(&self) -> Arc<FixtureLog> {
        self.log.clone()
    }
}

#[async_trait]
impl ShellConnector for FixtureShell {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn connect(
        &self,
        properties: &ConnectionProperties,
        _timeouts: &ConnectTimeouts,
        pty: &PtyOptions,
    ) -> Result<(ShellStreams, Box<dyn TransportHandle>)> {
        if self.refuse {
            return Err(Error::ConnectFailed {
                host: properties.host.clone(),
                port: properties.port,
                reason: "connection refused".to_string(),
            });
        }
        self.log.connects.fetch_add(1, Ordering::SeqCst);

        let (streams, ends) = ShellStreams::channel();
        let script = Script {
            prompt: self.prompt.clone(),
            echo: self.echo,
            wrap_cols: self.wrap_echo.then_some(pty.cols as usize),
            cwd: "/home/test".to_string(),
            log: self.log.clone(),
        };
        tokio::spawn(script.run(ends, self.die_on_login));

        Ok((
            streams,
            Box::new(FixtureTransport {
                log: self.log.clone(),
            }),
        ))
    }
}

struct FixtureTransport {
    log: Arc<FixtureLog>,
}

#[async_trait]
impl TransportHandle for FixtureTransport {
    async fn disconnect(&mut self) -> Result<()> {
        self.log.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

enum Next {
    Prompt,
    NoPrompt,
    HangUp(u32),
}

struct Script {
    prompt: String,
    echo: bool,
    wrap_cols: Option<usize>,
    cwd: String,
    log: Arc<FixtureLog>,
}

impl Script {
    async fn run(mut self, ends: ChannelEnds, die_on_login: bool) {
        let ChannelEnds {
            output_tx,
            mut input_rx,
        } = ends;

        send(&output_tx, BANNER);
        if die_on_login {
            let _ = output_tx.send(StreamEvent::ExitStatus(255));
            let _ = output_tx.send(StreamEvent::Eof);
            return;
        }
        send(&output_tx, &self.prompt);

        let mut pending: Vec<u8> = Vec::new();
        while let Some(data) = input_rx.recv().await {
            pending.extend_from_slice(&data);
            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                self.log.inputs.lock().unwrap().push(line.clone());

                if self.echo {
                    send(&output_tx, &format!("{}\r\n", self.echoed(&line)));
                }
                match self.execute(&line, &output_tx).await {
                    Next::Prompt => send(&output_tx, &self.prompt),
                    Next::NoPrompt => {}
                    Next::HangUp(status) => {
                        let _ = output_tx.send(StreamEvent::ExitStatus(status));
                        let _ = output_tx.send(StreamEvent::Eof);
                        return;
                    }
                }
            }
        }
    }

    /// Input as the terminal shows it after the prompt
    fn echoed(&self, line: &str) -> String {
        let cols = match self.wrap_cols {
            Some(cols) if cols > self.prompt.chars().count() => cols,
            _ => return line.to_string(),
        };
        let mut out = String::new();
        let mut col = self.prompt.chars().count();
        for c in line.chars() {
            if col == cols {
                out.push_str(" \r");
                col = 0;
            }
            out.push(c);
            col += 1;
        }
        out
    }

    async fn execute(&mut self, line: &str, out: &UnboundedSender<StreamEvent>) -> Next {
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line.trim(), ""),
        };

        match command {
            "" => Next::Prompt,
            "echo" => {
                send(out, &format!("{}\r\n", rest));
                Next::Prompt
            }
            "pwd" => {
                send(out, &format!("{}\r\n", self.cwd));
                Next::Prompt
            }
            "cd" => {
                let target = if rest.is_empty() { "/home/test" } else { rest };
                if KNOWN_DIRS.contains(&target) {
                    self.cwd = target.to_string();
                } else {
                    send(out, &format!("-bash: cd: {}: No such file or directory\r\n", target));
                }
                Next::Prompt
            }
            "sleep" => {
                tokio::time::sleep(millis(rest)).await;
                Next::Prompt
            }
            "late" => {
                let (text, delay) = text_and_delay(rest);
                tokio::time::sleep(delay).await;
                send(out, &format!("{}\r\n", text));
                Next::Prompt
            }
            "stray" => {
                let (text, delay) = text_and_delay(rest);
                send(out, &self.prompt);
                let out = out.clone();
                let text = text.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    send(&out, &format!("{}\r\n", text));
                });
                Next::NoPrompt
            }
            "silent" => Next::NoPrompt,
            "burst" => {
                let count: usize = rest.parse().unwrap_or(0);
                let chunk: String = (1..=count).map(|i| format!("line-{}\r\n", i)).collect();
                send(out, &chunk);
                Next::Prompt
            }
            "chunked" => {
                let text = format!("{}\r\n{}", rest, self.prompt);
                for byte in text.bytes() {
                    let _ = out.send(StreamEvent::Data(vec![byte]));
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Next::NoPrompt
            }
            "root" => {
                self.prompt = ROOT_PROMPT.to_string();
                Next::Prompt
            }
            "die" => Next::HangUp(1),
            "exit" => {
                send(out, "logout\r\n");
                Next::HangUp(0)
            }
            other => {
                send(out, &format!("-bash: {}: command not found\r\n", other));
                Next::Prompt
            }
        }
    }
}

fn send(out: &UnboundedSender<StreamEvent>, text: &str) {
    let _ = out.send(StreamEvent::Data(text.as_bytes().to_vec()));
}

fn millis(text: &str) -> Duration {
    Duration::from_millis(text.trim().parse().unwrap_or(0))
}

fn text_and_delay(rest: &str) -> (&str, Duration) {
    match rest.rsplit_once(' ') {
        Some((text, delay)) => (text, millis(delay)),
        None => (rest, Duration::ZERO),
    }
}
