//! SSH Shell Backend
//!
//! Opens an interactive shell over SSH with russh: TCP connect and password
//! authentication under the session timeout, then a session channel with a
//! PTY and a shell request under the channel timeout. A bridge task moves
//! bytes between the russh channel and [`ShellStreams`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};

use super::streams::{ChannelEnds, ShellStreams, StreamEvent};
use super::transport::{PtyOptions, ShellConnector, TransportHandle};
use crate::error::{Error, Result};
use crate::models::{ConnectTimeouts, ConnectionProperties};

/// russh client callbacks
pub struct ClientHandler {
    host: String,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // Host keys are accepted unchecked; there is no known_hosts store here.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!("Accepting server host key for {}", self.host);
        Ok(true)
    }
}

/// Connects to a remote shell over SSH with password authentication
#[derive(Debug, Clone)]
pub struct SshConnector {
    /// Interval between SSH keepalive messages
    keepalive_interval: Option<Duration>,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SshConnector {
    pub fn new() -> Self {
        Self {
            keepalive_interval: Some(Duration::from_secs(30)),
        }
    }

    /// Override the keepalive interval; `None` disables keepalives
    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    fn client_config(&self) -> client::Config {
        client::Config {
            inactivity_timeout: None,
            keepalive_interval: self.keepalive_interval,
            ..Default::default()
        }
    }

    /// TCP connect, handshake and password authentication
    async fn open_session(&self, properties: &ConnectionProperties) -> Result<Handle<ClientHandler>> {
        let handler = ClientHandler {
            host: properties.host.clone(),
        };
        let address = properties.address();

        let mut handle = client::connect(Arc::new(self.client_config()), address.as_str(), handler)
            .await
            .map_err(|e| Error::ConnectFailed {
                host: properties.host.clone(),
                port: properties.port,
                reason: e.to_string(),
            })?;

        debug!("Authenticating {}@{}", properties.username, properties.host);
        let auth = handle
            .authenticate_password(properties.username.as_str(), properties.password())
            .await
            .map_err(|e| Error::ConnectFailed {
                host: properties.host.clone(),
                port: properties.port,
                reason: format!("password authentication failed: {}", e),
            })?;

        if !auth.success() {
            return Err(Error::AuthenticationFailed {
                host: properties.host.clone(),
                username: properties.username.clone(),
            });
        }

        Ok(handle)
    }
}

/// Session channel with a PTY and a login shell
async fn open_shell_channel(handle: &Handle<ClientHandler>, pty: &PtyOptions) -> Result<Channel<Msg>> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| Error::ChannelOpenFailed {
            reason: e.to_string(),
        })?;

    channel
        .request_pty(true, &pty.term, u32::from(pty.cols), u32::from(pty.rows), 0, 0, &[])
        .await
        .map_err(|e| Error::ChannelOpenFailed {
            reason: format!("PTY request failed: {}", e),
        })?;

    channel
        .request_shell(true)
        .await
        .map_err(|e| Error::ChannelOpenFailed {
            reason: format!("shell request failed: {}", e),
        })?;

    Ok(channel)
}

#[async_trait]
impl ShellConnector for SshConnector {
    fn name(&self) -> &str {
        "ssh"
    }

    async fn connect(
        &self,
        properties: &ConnectionProperties,
        timeouts: &ConnectTimeouts,
        pty: &PtyOptions,
    ) -> Result<(ShellStreams, Box<dyn TransportHandle>)> {
        info!("Connecting to SSH server at {}", properties.address());

        let handle = tokio::time::timeout(timeouts.session, self.open_session(properties))
            .await
            .map_err(|_| Error::ConnectTimeout {
                host: properties.host.clone(),
                port: properties.port,
                stage: "session".to_string(),
                duration: timeouts.session,
            })??;

        let channel = match tokio::time::timeout(timeouts.channel, open_shell_channel(&handle, pty)).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                disconnect_quietly(&handle).await;
                return Err(e);
            }
            Err(_) => {
                disconnect_quietly(&handle).await;
                return Err(Error::ConnectTimeout {
                    host: properties.host.clone(),
                    port: properties.port,
                    stage: "channel".to_string(),
                    duration: timeouts.channel,
                });
            }
        };

        info!(
            "Shell channel open on {}@{} ({}x{} {})",
            properties.username, properties.host, pty.cols, pty.rows, pty.term
        );

        let (streams, ends) = ShellStreams::channel();
        spawn_bridge(channel, ends, properties.host.clone());

        Ok((
            streams,
            Box::new(SshTransport {
                handle,
                host: properties.host.clone(),
            }),
        ))
    }
}

async fn disconnect_quietly(handle: &Handle<ClientHandler>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "English")
        .await
    {
        debug!("Disconnect after failed channel open: {}", e);
    }
}

/// Move bytes between the russh channel and the stream channels until
/// either side goes away
fn spawn_bridge(mut channel: Channel<Msg>, ends: ChannelEnds, host: String) {
    let ChannelEnds {
        output_tx,
        mut input_rx,
    } = ends;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                input = input_rx.recv() => {
                    match input {
                        Some(data) => {
                            if let Err(e) = channel.data(&data[..]).await {
                                warn!("Write to shell on {} failed: {}", host, e);
                                break;
                            }
                        }
                        None => {
                            debug!("Shell input for {} dropped, closing channel", host);
                            if let Err(e) = channel.close().await {
                                debug!("Channel close on {}: {}", host, e);
                            }
                            break;
                        }
                    }
                }
                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { data }) => {
                            if output_tx.send(StreamEvent::Data(data.to_vec())).is_err() {
                                break;
                            }
                        }
                        // stderr shares the PTY, but some servers still split it
                        Some(ChannelMsg::ExtendedData { data, .. }) => {
                            if output_tx.send(StreamEvent::Data(data.to_vec())).is_err() {
                                break;
                            }
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            debug!("Shell on {} exited with status {}", host, exit_status);
                            let _ = output_tx.send(StreamEvent::ExitStatus(exit_status));
                        }
                        Some(ChannelMsg::Eof) => {
                            trace!("EOF from {}", host);
                        }
                        Some(ChannelMsg::Close) | None => {
                            debug!("Shell channel on {} closed", host);
                            break;
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        let _ = output_tx.send(StreamEvent::Eof);
        debug!("SSH bridge for {} exiting", host);
    });
}

/// Owns the russh connection for the lifetime of the shell
struct SshTransport {
    handle: Handle<ClientHandler>,
    host: String,
}

#[async_trait]
impl TransportHandle for SshTransport {
    async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting from {}", self.host);
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await?;
        Ok(())
    }
}
