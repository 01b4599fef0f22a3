//! Remote shell adapter.
//!
//! The multiplexer talks to remote hosts only through these traits:
//!
//! - [`RemoteShellConnector`] logs in and yields a [`RemoteConnection`]
//! - a connection opens an interactive [`RemoteStream`] or a
//!   [`RemoteFileChannel`] for uploads
//! - a stream reports output, errors and closure as [`StreamEvent`]s on the
//!   channel returned next to it
//!
//! [`SshConnector`] is the SSH implementation.

mod ssh;

pub use ssh::SshConnector;

use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use crate::pty::PtySize;
use crate::session::Credential;
use crate::Result;

/// Writer for a file being created on the remote host.
pub type RemoteFileWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Where and as whom to log in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl RemoteTarget {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }

    /// The password prompt shown while capturing the credential.
    pub fn password_prompt(&self) -> String {
        format!("{}@{}'s password: ", self.username, self.host)
    }
}

/// Event produced by an open shell stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Output bytes, in the order the remote produced them.
    Data(Vec<u8>),
    /// The stream hit an error. It may still be open.
    Error(String),
    /// The remote side closed the stream.
    Closed,
}

/// Establishes authenticated remote connections.
#[async_trait]
pub trait RemoteShellConnector: Send + Sync {
    async fn connect(
        &self,
        target: &RemoteTarget,
        credential: Credential,
    ) -> Result<Box<dyn RemoteConnection>>;
}

/// An authenticated connection to a remote host.
#[async_trait]
pub trait RemoteConnection: Send {
    /// Open an interactive shell on a terminal of type `term`.
    async fn open_shell(
        &mut self,
        term: &str,
        size: PtySize,
    ) -> Result<(Box<dyn RemoteStream>, mpsc::Receiver<StreamEvent>)>;

    /// Open a file-transfer channel.
    async fn open_file_channel(&mut self) -> Result<Box<dyn RemoteFileChannel>>;

    async fn close(&mut self) -> Result<()>;
}

/// The interactive shell stream of a connection.
#[async_trait]
pub trait RemoteStream: Send {
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    async fn resize(&mut self, size: PtySize) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// File-transfer sub-channel of a connection.
#[async_trait]
pub trait RemoteFileChannel: Send {
    /// Create (or truncate) `path` and return a writer for its contents.
    ///
    /// The file is complete once the writer has been shut down.
    async fn create(&mut self, path: &str) -> Result<RemoteFileWriter>;

    async fn close(&mut self) -> Result<()>;
}
