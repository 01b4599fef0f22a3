//! Session management module.
//!
//! This module provides the per-connection [`Session`] with its remote-shell
//! state machine and credential capture, and the [`SessionRegistry`] that
//! maps connections to sessions.

mod credential;
mod id;
mod state;
mod store;

pub use credential::{Credential, CredentialBuffer, CredentialInput};
pub use id::ConnectionId;
pub use state::{LocalTerminalState, RemoteShellState};
pub use store::{
    LocalHandles, RemoteHandles, Session, SessionRegistry, SharedSession, CONNECTED_BANNER,
    CONNECTING_TEXT,
};
