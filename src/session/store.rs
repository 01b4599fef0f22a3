//! Per-connection session state and the session registry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;

use super::{
    ConnectionId, Credential, CredentialBuffer, CredentialInput, LocalTerminalState,
    RemoteShellState,
};
use crate::error::RelayError;
use crate::protocol::{ClientSink, ServerEvent};
use crate::pty::{LocalTerminal, PtySize};
use crate::remote::{RemoteConnection, RemoteStream, RemoteTarget};
use crate::Result;

/// Echoed once the password has been captured.
pub const CONNECTING_TEXT: &str = "Connecting...\r\n";

/// Shown when the interactive shell is ready.
pub const CONNECTED_BANNER: &str = "\r\n\x1b[32mConnected to server\x1b[0m\r\n";

/// A session shared between the connection's event sources.
///
/// The async mutex serializes every event for one connection.
pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

/// Remote-side handles released together when the remote shell ends.
#[derive(Default)]
pub struct RemoteHandles {
    pub connect_task: Option<AbortHandle>,
    pub connection: Option<Box<dyn RemoteConnection>>,
    pub stream: Option<Box<dyn RemoteStream>>,
    pub pump: Option<AbortHandle>,
}

/// Local-side handles released together when the local terminal ends.
#[derive(Default)]
pub struct LocalHandles {
    pub terminal: Option<Box<dyn LocalTerminal>>,
    pub pump: Option<AbortHandle>,
}

/// State owned by one client connection.
///
/// Invariants kept by the methods below:
/// - the credential buffer exists only while awaiting the credential
/// - the shell stream exists only while the shell is active
/// - at most one remote connection and one local terminal are held
pub struct Session {
    id: ConnectionId,
    client: ClientSink,
    remote_state: RemoteShellState,
    credential: Option<CredentialBuffer>,
    target: Option<RemoteTarget>,
    shell_size: PtySize,
    attempt: u64,
    remote: RemoteHandles,
    local: LocalHandles,
    local_generation: u64,
    closed: bool,
    created_at: Instant,
    last_activity: Instant,
}

impl Session {
    /// Create an empty session for a freshly opened connection.
    pub fn new(id: ConnectionId, client: ClientSink) -> Self {
        let now = Instant::now();
        Self {
            id,
            client,
            remote_state: RemoteShellState::None,
            credential: None,
            target: None,
            shell_size: PtySize::default(),
            attempt: 0,
            remote: RemoteHandles::default(),
            local: LocalHandles::default(),
            local_generation: 0,
            closed: false,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_state(&self) -> RemoteShellState {
        self.remote_state
    }

    /// Generation of the current remote-connect attempt.
    pub fn remote_attempt(&self) -> u64 {
        self.attempt
    }

    pub fn local_state(&self) -> LocalTerminalState {
        if self.local.terminal.is_some() {
            LocalTerminalState::Active
        } else {
            LocalTerminalState::Absent
        }
    }

    pub fn has_local_terminal(&self) -> bool {
        self.local.terminal.is_some()
    }

    pub fn has_connection(&self) -> bool {
        self.remote.connection.is_some()
    }

    pub fn has_stream(&self) -> bool {
        self.remote.stream.is_some()
    }

    /// Target of the current or last remote-shell request.
    pub fn target(&self) -> Option<&RemoteTarget> {
        self.target.as_ref()
    }

    /// Terminal size requested for the remote shell.
    pub fn shell_size(&self) -> PtySize {
        self.shell_size
    }

    /// Whether the session has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether a remote callback tagged with `attempt` still applies.
    pub fn is_current_attempt(&self, attempt: u64) -> bool {
        !self.closed && self.attempt == attempt
    }

    /// Whether a local-terminal callback tagged with `generation` still applies.
    pub fn is_current_local(&self, generation: u64) -> bool {
        !self.closed && self.local_generation == generation && self.local.terminal.is_some()
    }

    /// Send an event to the client, waiting while its queue is full.
    /// Resolves to false once the client is gone.
    ///
    /// The returned future does not borrow the session.
    pub fn send(&self, event: ServerEvent) -> impl Future<Output = bool> + Send + 'static {
        let client = self.client.clone();
        async move { client.send(event).await.is_ok() }
    }

    /// Handle for sending after the session lock is released.
    pub fn client(&self) -> ClientSink {
        self.client.clone()
    }

    /// Update the last activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Get the idle duration since last activity.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Time since the connection opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Start credential entry for `target` and send the password prompt.
    ///
    /// Returns false, changing nothing, unless the remote side is idle or
    /// its last login failed.
    pub async fn begin_credential_entry(&mut self, target: RemoteTarget, size: PtySize) -> bool {
        if self.closed || !self.remote_state.accepts_open_request() {
            return false;
        }
        if self
            .remote_state
            .transition_to(RemoteShellState::AwaitingCredential)
            .is_err()
        {
            return false;
        }

        self.attempt += 1;
        self.credential = Some(CredentialBuffer::new());
        self.shell_size = size;
        let prompt = target.password_prompt();
        self.target = Some(target);
        self.send(ServerEvent::remote_output(prompt)).await;
        true
    }

    /// Feed a raw input chunk while awaiting the credential.
    ///
    /// On Enter the buffer is discarded, the session moves to `Connecting`,
    /// the connecting line is echoed and the login parameters are returned.
    pub async fn feed_credential(&mut self, chunk: &str) -> Option<(RemoteTarget, Credential)> {
        if self.remote_state != RemoteShellState::AwaitingCredential {
            return None;
        }
        let buffer = self.credential.as_mut()?;
        let credential = match buffer.feed(chunk) {
            CredentialInput::Pending => return None,
            CredentialInput::Complete(credential) => credential,
        };

        self.credential = None;
        let target = self.target.clone()?;
        self.remote_state
            .transition_to(RemoteShellState::Connecting)
            .ok()?;
        self.send(ServerEvent::remote_output(CONNECTING_TEXT)).await;
        Some((target, credential))
    }

    pub(crate) fn set_connect_task(&mut self, task: AbortHandle) {
        self.remote.connect_task = Some(task);
    }

    /// Forget the connect task without aborting it.
    pub(crate) fn clear_connect_task(&mut self) {
        self.remote.connect_task = None;
    }

    /// Store the connection returned by a successful login.
    ///
    /// Hands the connection back if one is already held.
    pub(crate) fn attach_connection(
        &mut self,
        connection: Box<dyn RemoteConnection>,
    ) -> std::result::Result<(), Box<dyn RemoteConnection>> {
        if self.remote.connection.is_some() {
            return Err(connection);
        }
        self.remote.connection = Some(connection);
        Ok(())
    }

    /// Install the shell stream and announce the connected shell.
    pub(crate) async fn activate_shell(
        &mut self,
        stream: Box<dyn RemoteStream>,
        pump: AbortHandle,
    ) -> Result<()> {
        self.remote_state.transition_to(RemoteShellState::ShellActive)?;
        self.remote.stream = Some(stream);
        self.remote.pump = Some(pump);
        self.send(ServerEvent::remote_output(CONNECTED_BANNER)).await;
        Ok(())
    }

    /// Record a failed login and report it to the client.
    pub(crate) async fn fail_connect(&mut self, error: &RelayError) -> Result<()> {
        self.remote_state.transition_to(RemoteShellState::Error)?;
        self.remote.connect_task = None;
        self.send(ServerEvent::remote_error(error)).await;
        Ok(())
    }

    /// Take every remote handle and return the remote side to `None`.
    pub(crate) fn take_remote(&mut self) -> RemoteHandles {
        self.credential = None;
        if self.remote_state != RemoteShellState::None {
            self.remote_state = RemoteShellState::None;
        }
        std::mem::take(&mut self.remote)
    }

    pub(crate) fn stream_mut(&mut self) -> Option<&mut Box<dyn RemoteStream>> {
        self.remote.stream.as_mut()
    }

    /// Reserve the generation for the next local terminal.
    pub(crate) fn next_local_generation(&mut self) -> u64 {
        self.local_generation += 1;
        self.local_generation
    }

    pub(crate) fn attach_local(&mut self, terminal: Box<dyn LocalTerminal>, pump: AbortHandle) {
        self.local.terminal = Some(terminal);
        self.local.pump = Some(pump);
    }

    pub(crate) fn take_local(&mut self) -> LocalHandles {
        std::mem::take(&mut self.local)
    }

    pub(crate) fn local_mut(&mut self) -> Option<&mut Box<dyn LocalTerminal>> {
        self.local.terminal.as_mut()
    }

    /// Mark the session as torn down. Later callbacks become no-ops.
    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_state", &self.remote_state)
            .field("attempt", &self.attempt)
            .field("target", &self.target)
            .field("has_connection", &self.remote.connection.is_some())
            .field("has_stream", &self.remote.stream.is_some())
            .field("local", &self.local_state())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Thread-safe registry of live sessions, keyed by connection.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, SharedSession>>,
}

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session. Fails if its connection is already registered.
    pub fn insert(&self, session: Session) -> Result<SharedSession> {
        let id = session.id();
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| RelayError::LockPoisoned)?;

        if sessions.contains_key(&id) {
            return Err(RelayError::SessionExists(id.to_string()));
        }

        let shared = Arc::new(tokio::sync::Mutex::new(session));
        sessions.insert(id, Arc::clone(&shared));
        Ok(shared)
    }

    pub fn get(&self, id: &ConnectionId) -> Result<Option<SharedSession>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| RelayError::LockPoisoned)?;
        Ok(sessions.get(id).cloned())
    }

    /// Check if a session exists.
    pub fn contains(&self, id: &ConnectionId) -> Result<bool> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| RelayError::LockPoisoned)?;
        Ok(sessions.contains_key(id))
    }

    /// Remove a session from the registry.
    ///
    /// Returns the removed session, or None if it didn't exist.
    pub fn remove(&self, id: &ConnectionId) -> Result<Option<SharedSession>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| RelayError::LockPoisoned)?;
        Ok(sessions.remove(id))
    }

    /// Get the number of sessions in the registry.
    pub fn count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// List all connection IDs.
    pub fn list_ids(&self) -> Result<Vec<ConnectionId>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| RelayError::LockPoisoned)?;
        Ok(sessions.keys().copied().collect())
    }

    /// Snapshot of every registered session handle.
    pub fn entries(&self) -> Result<Vec<SharedSession>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| RelayError::LockPoisoned)?;
        Ok(sessions.values().cloned().collect())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
