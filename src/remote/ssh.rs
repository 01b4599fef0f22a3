//! SSH implementation of the remote shell adapter, built on russh.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{
    RemoteConnection, RemoteFileChannel, RemoteFileWriter, RemoteShellConnector, RemoteStream,
    RemoteTarget, StreamEvent,
};
use crate::error::RelayError;
use crate::pty::PtySize;
use crate::session::Credential;
use crate::Result;

/// Capacity of the per-stream event channel.
const EVENT_CAPACITY: usize = 256;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

fn connect_err(e: impl Display) -> RelayError {
    RelayError::Connect(e.to_string())
}

fn shell_err(e: impl Display) -> RelayError {
    RelayError::ShellOpen(e.to_string())
}

fn transfer_err(e: impl Display) -> RelayError {
    RelayError::Transfer(e.to_string())
}

/// Client-side protocol handler.
///
/// Host keys are accepted without verification.
struct RelayClient;

impl client::Handler for RelayClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Logs in to SSH servers with a password.
pub struct SshConnector {
    config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new() -> Self {
        let config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteShellConnector for SshConnector {
    async fn connect(
        &self,
        target: &RemoteTarget,
        credential: Credential,
    ) -> Result<Box<dyn RemoteConnection>> {
        debug!(host = %target.host, port = target.port, "opening ssh connection");

        let mut handle = client::connect(
            Arc::clone(&self.config),
            (target.host.as_str(), target.port),
            RelayClient,
        )
        .await
        .map_err(connect_err)?;

        let auth = handle
            .authenticate_password(target.username.as_str(), credential.expose())
            .await
            .map_err(connect_err)?;

        if !auth.success() {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(RelayError::Connect("authentication rejected".to_string()));
        }

        debug!(host = %target.host, port = target.port, "ssh login succeeded");
        Ok(Box::new(SshConnection { handle }))
    }
}

/// An authenticated SSH connection.
struct SshConnection {
    handle: Handle<RelayClient>,
}

#[async_trait]
impl RemoteConnection for SshConnection {
    async fn open_shell(
        &mut self,
        term: &str,
        size: PtySize,
    ) -> Result<(Box<dyn RemoteStream>, mpsc::Receiver<StreamEvent>)> {
        let mut channel = self.handle.channel_open_session().await.map_err(shell_err)?;

        channel
            .request_pty(
                false,
                term,
                u32::from(size.cols),
                u32::from(size.rows),
                0,
                0,
                &[],
            )
            .await
            .map_err(shell_err)?;
        channel.request_shell(true).await.map_err(shell_err)?;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Success) => break,
                Some(ChannelMsg::Failure) => {
                    return Err(RelayError::ShellOpen("shell request rejected".to_string()))
                }
                Some(ChannelMsg::Close) | None => {
                    return Err(RelayError::ShellOpen("channel closed".to_string()))
                }
                Some(_) => continue,
            }
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        tokio::spawn(drive_shell(channel, commands_rx, events_tx));

        Ok((
            Box::new(SshStream {
                commands: commands_tx,
            }),
            events_rx,
        ))
    }

    async fn open_file_channel(&mut self) -> Result<Box<dyn RemoteFileChannel>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(transfer_err)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(transfer_err)?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(transfer_err)?;
        Ok(Box::new(SftpChannel { sftp }))
    }

    async fn close(&mut self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| RelayError::StreamIo(e.to_string()))
    }
}

enum StreamCommand {
    Write(Vec<u8>),
    Resize(PtySize),
    Close,
}

/// Handle to a shell channel owned by [`drive_shell`].
struct SshStream {
    commands: mpsc::UnboundedSender<StreamCommand>,
}

impl SshStream {
    fn send(&self, command: StreamCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RelayError::StreamIo("shell stream closed".to_string()))
    }
}

#[async_trait]
impl RemoteStream for SshStream {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.send(StreamCommand::Write(data.to_vec()))
    }

    async fn resize(&mut self, size: PtySize) -> Result<()> {
        self.send(StreamCommand::Resize(size))
    }

    async fn close(&mut self) -> Result<()> {
        self.send(StreamCommand::Close)
    }
}

/// Owns the shell channel: applies queued commands and turns channel
/// messages into [`StreamEvent`]s until either side closes.
async fn drive_shell(
    mut channel: Channel<Msg>,
    mut commands: mpsc::UnboundedReceiver<StreamCommand>,
    events: mpsc::Sender<StreamEvent>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(StreamCommand::Write(data)) => {
                    if let Err(e) = channel.data(&data[..]).await {
                        let _ = events.send(StreamEvent::Error(e.to_string())).await;
                    }
                }
                Some(StreamCommand::Resize(size)) => {
                    if let Err(e) = channel
                        .window_change(u32::from(size.cols), u32::from(size.rows), 0, 0)
                        .await
                    {
                        debug!("window change failed: {}", e);
                    }
                }
                Some(StreamCommand::Close) | None => {
                    let _ = channel.eof().await;
                    let _ = channel.close().await;
                    debug!("shell channel closed locally");
                    break;
                }
            },
            message = channel.wait() => match message {
                Some(ChannelMsg::Data { ref data }) => {
                    trace!("shell channel: {} bytes", data.len());
                    if events.send(StreamEvent::Data(data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    if events.send(StreamEvent::Data(data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(exit_status, "remote shell exited");
                }
                Some(ChannelMsg::Close) | None => {
                    debug!("shell channel closed by remote");
                    let _ = events.send(StreamEvent::Closed).await;
                    break;
                }
                Some(_) => {}
            },
        }
    }
}

/// SFTP session used for uploads.
struct SftpChannel {
    sftp: SftpSession,
}

#[async_trait]
impl RemoteFileChannel for SftpChannel {
    async fn create(&mut self, path: &str) -> Result<RemoteFileWriter> {
        let file = self.sftp.create(path).await.map_err(transfer_err)?;
        Ok(Box::pin(file))
    }

    async fn close(&mut self) -> Result<()> {
        if let Err(e) = self.sftp.close().await {
            warn!("sftp close failed: {}", e);
            return Err(transfer_err(e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_connector_config() {
        let connector = SshConnector::new();
        assert_eq!(connector.config.inactivity_timeout, None);
        assert_eq!(connector.config.keepalive_interval, Some(KEEPALIVE_INTERVAL));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_failure() {
        // Bind then drop a listener to get a local port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = SshConnector::new();
        let target = RemoteTarget::new("127.0.0.1", port, "nobody");
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            connector.connect(&target, Credential::new("x")),
        )
        .await
        .unwrap();

        match result {
            Err(e) => assert!(e.is_connect_failure(), "unexpected error: {e}"),
            Ok(_) => panic!("connect to a closed port should fail"),
        }
    }
}
