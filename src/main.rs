//! shellmux - run commands one after another over a single remote shell
//!
//! Each positional argument is one command. They are executed in order over
//! one SSH shell session, inside `server.work_dir` when one is configured,
//! with the `[policy]` sudo rule applied. Output is printed as it arrives;
//! with `--check-errors` a command whose output carries a configured error
//! keyword counts as failed.

use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use shellmux::error::Error;
use shellmux::{Config, ConfigLoader, LocalShellConnector, RemoteServer, ShellConnector, SshConnector};

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "shellmux", version, about = "Run commands sequentially over one persistent remote shell")]
struct Cli {
    /// Configuration file (TOML or JSON); default search paths otherwise
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Remote host
    #[arg(long, env = "SHELLMUX_HOST")]
    host: Option<String>,

    /// SSH port
    #[arg(short, long)]
    port: Option<u16>,

    /// Login user
    #[arg(short, long, env = "SHELLMUX_USER")]
    user: Option<String>,

    /// Login password
    #[arg(long, env = "SHELLMUX_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Per-command timeout in milliseconds
    #[arg(short, long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Extra completion pattern, tried after the configured ones
    #[arg(long = "pattern", value_name = "REGEX")]
    patterns: Vec<String>,

    /// Run against a local shell in a PTY instead of SSH
    #[arg(long, action = clap::ArgAction::SetTrue)]
    local: bool,

    /// Stop at the first failing command
    #[arg(long, action = clap::ArgAction::SetTrue)]
    fail_fast: bool,

    /// Fail commands whose output contains a configured error keyword
    #[arg(long, action = clap::ArgAction::SetTrue)]
    check_errors: bool,

    /// Enable debug logging
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    debug: bool,

    /// Commands to run, in order
    #[arg(required = true, value_name = "COMMAND")]
    commands: Vec<String>,
}

impl Cli {
    /// Load the configuration and apply command line overrides
    fn resolve_config(&self) -> anyhow::Result<Config> {
        let mut loader = ConfigLoader::new();
        let mut config = match &self.config {
            Some(path) => loader
                .load_from_path(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => loader.load().context("loading configuration")?,
        };

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(user) = &self.user {
            config.server.username = user.clone();
        }
        if let Some(password) = &self.password {
            config.server.password = password.clone();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.shell.default_timeout_ms = timeout_ms;
        }
        config
            .shell
            .completion_patterns
            .extend(self.patterns.iter().cloned());

        if self.local {
            if config.server.host.is_empty() {
                config.server.host = "localhost".to_string();
            }
            if config.server.username.is_empty() {
                config.server.username = env::var("USER").unwrap_or_else(|_| "local".to_string());
            }
        }

        config.validate().context("invalid configuration")?;
        config.server.validate().context("invalid server configuration")?;
        Ok(config)
    }
}

fn init_logging(debug: bool) {
    let log_level = if debug { "shellmux=debug" } else { "shellmux=info" };
    let env_filter = env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from(env_filter))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run(cli: Cli, cancel: CancellationToken) -> anyhow::Result<usize> {
    let config = cli.resolve_config()?;
    let connector: Box<dyn ShellConnector> = if cli.local {
        Box::new(LocalShellConnector::default())
    } else {
        Box::new(SshConnector::new())
    };

    let host = config.server.host.clone();
    let timeout = config.shell.default_timeout();
    let mut server = RemoteServer::new(config).with_cancel(cancel.clone());
    if let Err(e) = server.connect_with(connector.as_ref()).await {
        // A failed work-dir change leaves an open shell behind
        if let Err(close_err) = server.close().await {
            debug!("Close after failed connect: {}", close_err);
        }
        return Err(anyhow::Error::new(e).context(format!("connecting to {}", host)));
    }
    if let Some(dir) = server.absolute_work_dir() {
        info!("Running in {}", dir);
    }

    let mut failures = 0;
    for command in &cli.commands {
        if cancel.is_cancelled() {
            warn!("Interrupted, skipping remaining commands");
            break;
        }
        debug!("Running '{}'", command);
        match run_command(&server, command, timeout, cli.check_errors).await {
            Ok(count) => debug!("'{}' produced {} lines", command, count),
            Err(e) if e.is_session_fatal() => {
                error!("{}", e);
                failures += 1;
                break;
            }
            Err(e) => {
                error!("{}", e);
                failures += 1;
                if cli.fail_fast {
                    break;
                }
            }
        }
    }

    server.close().await.context("closing session")?;
    Ok(failures)
}

/// Run one command and print its output; returns the line count
async fn run_command(
    server: &RemoteServer,
    command: &str,
    timeout: Duration,
    check_errors: bool,
) -> Result<usize, Error> {
    if !check_errors {
        // Printed while it arrives
        return Ok(server.execute_cmd(command, timeout, true).await?.len());
    }
    let lines = server.execute_cmd(command, timeout, false).await?;
    for line in &lines {
        println!("{}", line);
    }
    Ok(lines.len())
}

/// Process exit status for the outcome of [`run`]
fn exit_code(outcome: &anyhow::Result<usize>) -> i32 {
    match outcome {
        Ok(0) => 0,
        Ok(_) => 1,
        Err(_) => 2,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);
    info!("Starting {} v{}", shellmux::NAME, shellmux::VERSION);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, closing session");
            signal_cancel.cancel();
        }
    });

    let outcome = run(cli, cancel).await;
    match &outcome {
        Ok(0) => {}
        Ok(failures) => error!("{} command(s) failed", failures),
        Err(e) => error!("{:#}", e),
    }
    process::exit(exit_code(&outcome));
}
