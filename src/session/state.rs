//! Remote-shell and local-terminal state machines.

/// Lifecycle of the remote-shell side of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteShellState {
    /// No remote shell requested.
    #[default]
    None,
    /// Prompt sent; keystrokes are collected as the password.
    AwaitingCredential,
    /// Password captured; the adapter is logging in.
    Connecting,
    /// Interactive shell is open and receives keystrokes.
    ShellActive,
    /// The last login attempt failed.
    Error,
}

impl RemoteShellState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - None -> AwaitingCredential
    /// - Error -> AwaitingCredential (retry after a failed login)
    /// - AwaitingCredential -> Connecting
    /// - Connecting -> ShellActive
    /// - Connecting -> Error
    /// - any state except None -> None (adapter closed)
    pub fn can_transition_to(&self, target: RemoteShellState) -> bool {
        use RemoteShellState::*;
        matches!(
            (*self, target),
            (None, AwaitingCredential)
                | (Error, AwaitingCredential)
                | (AwaitingCredential, Connecting)
                | (Connecting, ShellActive)
                | (Connecting, Error)
                | (AwaitingCredential, None)
                | (Connecting, None)
                | (ShellActive, None)
                | (Error, None)
        )
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns `Ok(())` if the transition is valid, or an error otherwise.
    pub fn transition_to(&mut self, target: RemoteShellState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::RelayError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Whether a new remote-shell request is accepted in this state.
    pub fn accepts_open_request(&self) -> bool {
        matches!(self, RemoteShellState::None | RemoteShellState::Error)
    }

    /// Whether raw input is forwarded to the shell stream.
    pub fn forwards_input(&self) -> bool {
        matches!(self, RemoteShellState::ShellActive)
    }

    /// Stable lowercase name, as reported by the HTTP API.
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteShellState::None => "none",
            RemoteShellState::AwaitingCredential => "awaiting_credential",
            RemoteShellState::Connecting => "connecting",
            RemoteShellState::ShellActive => "shell_active",
            RemoteShellState::Error => "error",
        }
    }
}

/// Lifecycle of the local-terminal side of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalTerminalState {
    #[default]
    Absent,
    Active,
}

impl LocalTerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalTerminalState::Absent => "absent",
            LocalTerminalState::Active => "active",
        }
    }
}
