//! # shell-relay
//!
//! WebSocket relay that gives each browser client an SSH shell and a local
//! terminal over a single socket.
//!
//! Every client connection owns at most one remote shell and at most one
//! local terminal. The [`Multiplexer`] keeps that per-connection state,
//! collects the password keystroke by keystroke before connecting, and
//! releases every remote and local resource when the client goes away.
//!
//! ## Features
//!
//! - **Remote shells**: SSH password login through `russh`, behind the
//!   [`RemoteShellConnector`](remote::RemoteShellConnector) trait
//! - **Local terminals**: Unix PTY and Windows ConPTY through [`NativePty`]
//! - **Uploads**: multipart uploads staged on disk, then sent over SFTP
//! - **Async I/O**: tokio throughout, axum for HTTP and WebSocket
//!
//! ## Quick Start
//!
//! ```no_run
//! use shell_relay::api::{serve_with_state, AppState};
//! use shell_relay::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     shell_relay::logging::try_init().ok();
//!
//!     let config = Config::default();
//!     let state = AppState::from_config(&config)?;
//!     serve_with_state(config.to_server_config()?, state).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod mux;
pub mod protocol;
pub mod pty;
pub mod remote;
pub mod session;
pub mod upload;

// Re-export commonly used types
pub use error::{RelayError, Result};
pub use mux::{Multiplexer, MuxSettings, SessionSnapshot};
pub use protocol::{
    client_channel, ClientMessage, ClientSink, ServerEvent, CLIENT_QUEUE_CAPACITY,
};
pub use pty::{LocalEvent, LocalTerminal, LocalTerminalSpawner, NativePty, PtySize};
pub use remote::{RemoteShellConnector, RemoteTarget, SshConnector, StreamEvent};
pub use session::{
    ConnectionId, Credential, LocalTerminalState, RemoteShellState, Session, SessionRegistry,
};
pub use upload::{StagingArea, UploadDispatcher};
