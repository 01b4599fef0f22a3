//! Error types for shell-relay.

use std::time::Duration;

use thiserror::Error;

use crate::session::RemoteShellState;

/// Main error type for shell-relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    /// No session is registered for the given connection.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A session is already registered for the given connection.
    #[error("session already exists: {0}")]
    SessionExists(String),

    /// Invalid remote-shell state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: RemoteShellState,
        to: RemoteShellState,
    },

    /// The remote host could not be reached or rejected the login.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The remote host did not complete the login in time.
    #[error("connection timed out after {}s", .0.as_secs())]
    ConnectTimeout(Duration),

    /// Logged in, but the interactive shell could not be opened.
    #[error("failed to open shell: {0}")]
    ShellOpen(String),

    /// An established shell stream reported a failure.
    #[error("stream error: {0}")]
    StreamIo(String),

    /// Local terminals cannot be spawned on this host.
    #[error("local terminal unavailable: {0}")]
    LocalSpawnUnavailable(String),

    /// PTY-related error.
    #[error("PTY error: {0}")]
    Pty(String),

    /// File transfer to the remote host failed.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The upload request is malformed.
    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// The other end of an internal channel is gone.
    #[error("channel closed")]
    ChannelClosed,
}

impl RelayError {
    /// Whether the error belongs to the connect-failure class, after which
    /// a fresh remote-shell request may be issued.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::ConnectTimeout(_))
    }
}

/// Convenience Result type for shell-relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
