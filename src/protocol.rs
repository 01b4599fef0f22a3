//! Messages exchanged with a client over its transport connection.
//!
//! Frames are JSON objects tagged by a kebab-case `type` field.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events queued per client before output producers wait for it.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Outbound half of a client connection.
///
/// Bounded: a client that stops reading stalls the pumps feeding it.
pub type ClientSink = mpsc::Sender<ServerEvent>;

/// Create the outbound queue for one client.
pub fn client_channel() -> (ClientSink, mpsc::Receiver<ServerEvent>) {
    mpsc::channel(CLIENT_QUEUE_CAPACITY)
}

/// Message sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Start a password login to a remote host.
    RemoteShellOpen {
        host: String,
        port: u16,
        username: String,
        #[serde(default)]
        cols: Option<u16>,
        #[serde(default)]
        rows: Option<u16>,
    },
    /// Raw keystrokes for the remote side.
    RemoteInput { data: String },
    RemoteResize { cols: u16, rows: u16 },
    LocalTerminalOpen {
        #[serde(default)]
        cols: Option<u16>,
        #[serde(default)]
        rows: Option<u16>,
    },
    LocalInput { data: String },
    LocalResize { cols: u16, rows: u16 },
    Ping,
}

/// Message sent to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    RemoteOutput { text: String },
    RemoteError { message: String },
    /// The remote shell ended; a new login may be requested.
    RemoteClosed,
    LocalOutput { text: String },
    LocalExit { code: Option<i32> },
    LocalError { message: String },
    /// The client sent a frame that could not be handled.
    Error { code: String, message: String },
    Pong,
}

impl ServerEvent {
    pub fn remote_output(text: impl Into<String>) -> Self {
        Self::RemoteOutput { text: text.into() }
    }

    pub fn remote_error(message: impl ToString) -> Self {
        Self::RemoteError {
            message: message.to_string(),
        }
    }

    pub fn local_error(message: impl ToString) -> Self {
        Self::LocalError {
            message: message.to_string(),
        }
    }

    pub fn parse_error(message: impl ToString) -> Self {
        Self::Error {
            code: "PARSE_ERROR".to_string(),
            message: message.to_string(),
        }
    }
}
