//! Routing core: registry, dispatch and teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::protocol::{ClientMessage, ClientSink, ServerEvent};
use crate::pty::{default_shell, LocalEvent, LocalTerminalSpawner, PtySize};
use crate::remote::{RemoteConnection, RemoteShellConnector, RemoteTarget, StreamEvent};
use crate::session::{
    ConnectionId, Credential, LocalHandles, LocalTerminalState, RemoteHandles, RemoteShellState,
    Session, SessionRegistry, SharedSession,
};
use crate::Result;

/// Default bound on the remote login and shell open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every session.
#[derive(Debug, Clone)]
pub struct MuxSettings {
    /// Bound on the remote login, and separately on opening the shell.
    pub connect_timeout: Duration,
    /// Terminal type requested for remote shells.
    pub term: String,
    /// Shell for local terminals. `None` uses the platform default.
    pub local_shell: Option<String>,
    /// Size used when a client does not send one.
    pub default_size: PtySize,
}

impl Default for MuxSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            term: "xterm-256color".to_string(),
            local_shell: None,
            default_size: PtySize::default(),
        }
    }
}

/// Point-in-time view of one session, free of secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: ConnectionId,
    pub remote_state: RemoteShellState,
    pub local_state: LocalTerminalState,
    pub target: Option<RemoteTarget>,
    pub idle: Duration,
    pub age: Duration,
}

impl SessionSnapshot {
    fn of(session: &Session) -> Self {
        Self {
            id: session.id(),
            remote_state: session.remote_state(),
            local_state: session.local_state(),
            target: session.target().cloned(),
            idle: session.idle_duration(),
            age: session.age(),
        }
    }
}

struct Inner {
    registry: SessionRegistry,
    connector: Arc<dyn RemoteShellConnector>,
    spawner: Arc<dyn LocalTerminalSpawner>,
    settings: MuxSettings,
}

/// Routes every event of every connection to its session.
///
/// Cloning is cheap; clones share the registry.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

impl Multiplexer {
    pub fn new(
        connector: Arc<dyn RemoteShellConnector>,
        spawner: Arc<dyn LocalTerminalSpawner>,
        settings: MuxSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: SessionRegistry::new(),
                connector,
                spawner,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &MuxSettings {
        &self.inner.settings
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.registry.count()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.registry.contains(&id).unwrap_or(false)
    }

    fn session(&self, id: ConnectionId) -> Result<SharedSession> {
        self.inner
            .registry
            .get(&id)?
            .ok_or_else(|| RelayError::SessionNotFound(id.to_string()))
    }

    /// Session lookup for adapter callbacks, which never fail.
    fn lookup(&self, id: ConnectionId) -> Option<SharedSession> {
        self.inner.registry.get(&id).ok().flatten()
    }

    /// Register an empty session for a newly opened connection.
    pub fn open_connection(&self, id: ConnectionId, client: ClientSink) -> Result<()> {
        self.inner.registry.insert(Session::new(id, client))?;
        debug!(connection = %id, "session opened");
        Ok(())
    }

    /// Handle one message from the client.
    pub async fn dispatch(&self, id: ConnectionId, message: ClientMessage) -> Result<()> {
        let fallback = self.inner.settings.default_size;
        match message {
            ClientMessage::RemoteShellOpen {
                host,
                port,
                username,
                cols,
                rows,
            } => {
                let target = RemoteTarget::new(host, port, username);
                let size = PtySize::or_default(cols, rows, fallback);
                self.request_remote_shell(id, target, size).await
            }
            ClientMessage::RemoteInput { data } => self.remote_input(id, &data).await,
            ClientMessage::RemoteResize { cols, rows } => {
                self.remote_resize(id, PtySize::new(rows, cols)).await
            }
            ClientMessage::LocalTerminalOpen { cols, rows } => {
                let size = PtySize::or_default(cols, rows, fallback);
                self.request_local_terminal(id, size).await
            }
            ClientMessage::LocalInput { data } => self.local_input(id, &data).await,
            ClientMessage::LocalResize { cols, rows } => {
                self.local_resize(id, PtySize::new(rows, cols)).await
            }
            ClientMessage::Ping => {
                let shared = self.session(id)?;
                let client = {
                    let mut session = shared.lock().await;
                    session.touch();
                    session.client()
                };
                let _ = client.send(ServerEvent::Pong).await;
                Ok(())
            }
        }
    }

    /// Start credential entry for a remote shell.
    ///
    /// Ignored while a login or shell is already in progress.
    pub async fn request_remote_shell(
        &self,
        id: ConnectionId,
        target: RemoteTarget,
        size: PtySize,
    ) -> Result<()> {
        let shared = self.session(id)?;
        let mut session = shared.lock().await;
        session.touch();

        let host = target.host.clone();
        let port = target.port;
        if session.begin_credential_entry(target, size).await {
            info!(connection = %id, host = %host, port, "remote shell requested");
        } else {
            debug!(
                connection = %id,
                state = ?session.remote_state(),
                "remote shell request ignored"
            );
        }
        Ok(())
    }

    /// Raw keystrokes for the remote side.
    ///
    /// Collected as the password while awaiting the credential, written to
    /// the shell while it is active, dropped otherwise.
    pub async fn remote_input(&self, id: ConnectionId, data: &str) -> Result<()> {
        let shared = self.session(id)?;
        let mut session = shared.lock().await;
        session.touch();

        match session.remote_state() {
            RemoteShellState::AwaitingCredential => {
                if let Some((target, credential)) = session.feed_credential(data).await {
                    self.start_connect(&mut session, target, credential);
                }
            }
            RemoteShellState::ShellActive => {
                if let Some(stream) = session.stream_mut() {
                    if let Err(e) = stream.write(data.as_bytes()).await {
                        debug!(connection = %id, "shell write failed: {}", e);
                        session.send(ServerEvent::remote_error(e)).await;
                    }
                }
            }
            RemoteShellState::None | RemoteShellState::Connecting | RemoteShellState::Error => {}
        }
        Ok(())
    }

    /// Spawn the login for the session's current attempt.
    fn start_connect(&self, session: &mut Session, target: RemoteTarget, credential: Credential) {
        let id = session.id();
        let attempt = session.remote_attempt();
        let connector = Arc::clone(&self.inner.connector);
        let limit = self.inner.settings.connect_timeout;
        let mux = self.clone();

        info!(connection = %id, host = %target.host, port = target.port, "connecting");

        // Only the login is abortable. A connection that made it out is handed
        // to its own task, which either adopts it or closes it.
        let task = tokio::spawn(async move {
            match tokio::time::timeout(limit, connector.connect(&target, credential)).await {
                Ok(Ok(connection)) => {
                    tokio::spawn(async move { mux.adapter_ready(id, attempt, connection).await });
                }
                Ok(Err(e)) => mux.connect_failed(id, attempt, e).await,
                Err(_) => {
                    mux.connect_failed(id, attempt, RelayError::ConnectTimeout(limit))
                        .await
                }
            }
        });
        session.set_connect_task(task.abort_handle());
    }

    /// The login for `attempt` succeeded: open the interactive shell.
    ///
    /// A connection that no longer belongs to a live, connecting session is
    /// closed and otherwise ignored.
    pub async fn adapter_ready(
        &self,
        id: ConnectionId,
        attempt: u64,
        mut connection: Box<dyn RemoteConnection>,
    ) {
        let Some(shared) = self.lookup(id) else {
            debug!(connection = %id, "connection ready after session closed");
            close_orphan(connection).await;
            return;
        };

        let size = {
            let mut session = shared.lock().await;
            if !awaits_connection(&session, attempt) {
                drop(session);
                debug!(connection = %id, attempt, "stale connection ignored");
                close_orphan(connection).await;
                return;
            }
            // From here on teardown leaves this connection to us.
            session.clear_connect_task();
            session.shell_size()
        };

        let limit = self.inner.settings.connect_timeout;
        let opened = tokio::time::timeout(
            limit,
            connection.open_shell(&self.inner.settings.term, size),
        )
        .await;

        let mut session = shared.lock().await;
        if !awaits_connection(&session, attempt) {
            drop(session);
            debug!(connection = %id, attempt, "session gone while opening shell");
            if let Ok(Ok((mut stream, _events))) = opened {
                let _ = stream.close().await;
            }
            close_orphan(connection).await;
            return;
        }

        if let Err(duplicate) = session.attach_connection(connection) {
            close_orphan(duplicate).await;
            return;
        }

        match opened {
            Ok(Ok((stream, events))) => {
                let pump = tokio::spawn(pump_remote(self.clone(), id, attempt, events));
                match session.activate_shell(stream, pump.abort_handle()).await {
                    Ok(()) => info!(connection = %id, "remote shell active"),
                    Err(e) => {
                        warn!(connection = %id, "could not activate shell: {}", e);
                        pump.abort();
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(connection = %id, "failed to open shell: {}", e);
                session.send(ServerEvent::remote_error(e)).await;
            }
            Err(_) => {
                let e = RelayError::ShellOpen(format!("timed out after {}s", limit.as_secs()));
                warn!(connection = %id, "{}", e);
                session.send(ServerEvent::remote_error(e)).await;
            }
        }
    }

    /// The login for `attempt` failed or timed out.
    pub async fn connect_failed(&self, id: ConnectionId, attempt: u64, error: RelayError) {
        let Some(shared) = self.lookup(id) else {
            return;
        };
        let mut session = shared.lock().await;
        if !session.is_current_attempt(attempt)
            || session.remote_state() != RemoteShellState::Connecting
        {
            debug!(connection = %id, attempt, "stale connect failure ignored");
            return;
        }

        warn!(connection = %id, "remote connect failed: {}", error);
        if let Err(e) = session.fail_connect(&error).await {
            debug!(connection = %id, "connect failure not recorded: {}", e);
        }
    }

    /// Output from the shell of `attempt`.
    ///
    /// Waits, without holding the session, while the client queue is full.
    pub async fn adapter_data(&self, id: ConnectionId, attempt: u64, data: &[u8]) {
        let Some(shared) = self.lookup(id) else {
            return;
        };
        let client = {
            let session = shared.lock().await;
            if !session.is_current_attempt(attempt) || !session.remote_state().forwards_input() {
                return;
            }
            session.client()
        };
        let _ = client
            .send(ServerEvent::remote_output(String::from_utf8_lossy(data)))
            .await;
    }

    /// The shell stream reported an error. The shell stays open.
    pub async fn adapter_error(&self, id: ConnectionId, attempt: u64, message: String) {
        let Some(shared) = self.lookup(id) else {
            return;
        };
        let session = shared.lock().await;
        if !session.is_current_attempt(attempt) || session.remote_state() == RemoteShellState::None
        {
            return;
        }
        warn!(connection = %id, "remote stream error: {}", message);
        session.send(ServerEvent::remote_error(message)).await;
    }

    /// The remote side ended the shell of `attempt`.
    ///
    /// Runs on the stream pump, so the pump is left to finish on its own.
    pub async fn adapter_closed(&self, id: ConnectionId, attempt: u64) {
        let Some(shared) = self.lookup(id) else {
            return;
        };
        let mut session = shared.lock().await;
        if !session.is_current_attempt(attempt) || session.remote_state() == RemoteShellState::None
        {
            return;
        }

        let handles = session.take_remote();
        release_remote(id, handles, false).await;
        session.send(ServerEvent::RemoteClosed).await;
        info!(connection = %id, "remote shell closed");
    }

    /// Resize the remote shell. Dropped unless the shell is active.
    pub async fn remote_resize(&self, id: ConnectionId, size: PtySize) -> Result<()> {
        let shared = self.session(id)?;
        let mut session = shared.lock().await;
        if !session.remote_state().forwards_input() {
            debug!(connection = %id, "resize before shell active dropped");
            return Ok(());
        }
        if let Some(stream) = session.stream_mut() {
            if let Err(e) = stream.resize(size).await {
                debug!(connection = %id, "remote resize failed: {}", e);
            }
        }
        Ok(())
    }

    /// Spawn a local terminal unless one is already running.
    pub async fn request_local_terminal(&self, id: ConnectionId, size: PtySize) -> Result<()> {
        let shared = self.session(id)?;
        let mut session = shared.lock().await;
        session.touch();

        if session.has_local_terminal() {
            debug!(connection = %id, "local terminal already active; request ignored");
            return Ok(());
        }

        let shell = self
            .inner
            .settings
            .local_shell
            .clone()
            .unwrap_or_else(default_shell);

        match self.inner.spawner.spawn(&shell, size) {
            Ok((terminal, events)) => {
                let generation = session.next_local_generation();
                let pid = terminal.pid();
                let pump = tokio::spawn(pump_local(self.clone(), id, generation, events));
                session.attach_local(terminal, pump.abort_handle());
                info!(connection = %id, shell = %shell, ?pid, "local terminal started");
            }
            Err(e) => {
                warn!(connection = %id, "local terminal unavailable: {}", e);
                session.send(ServerEvent::local_error(e)).await;
            }
        }
        Ok(())
    }

    /// Keystrokes for the local terminal. No-op without one.
    pub async fn local_input(&self, id: ConnectionId, data: &str) -> Result<()> {
        let shared = self.session(id)?;
        let mut session = shared.lock().await;
        session.touch();
        if let Some(terminal) = session.local_mut() {
            if let Err(e) = terminal.write(data.as_bytes()) {
                debug!(connection = %id, "local write failed: {}", e);
            }
        }
        Ok(())
    }

    pub async fn local_resize(&self, id: ConnectionId, size: PtySize) -> Result<()> {
        let shared = self.session(id)?;
        let mut session = shared.lock().await;
        if let Some(terminal) = session.local_mut() {
            if let Err(e) = terminal.resize(size) {
                debug!(connection = %id, "local resize failed: {}", e);
            }
        }
        Ok(())
    }

    /// Output from local terminal `generation`.
    pub async fn local_data(&self, id: ConnectionId, generation: u64, data: &[u8]) {
        let Some(shared) = self.lookup(id) else {
            return;
        };
        let client = {
            let session = shared.lock().await;
            if !session.is_current_local(generation) {
                return;
            }
            session.client()
        };
        let _ = client
            .send(ServerEvent::LocalOutput {
                text: String::from_utf8_lossy(data).into_owned(),
            })
            .await;
    }

    /// Local terminal `generation` exited.
    pub async fn local_exited(&self, id: ConnectionId, generation: u64, code: Option<i32>) {
        let Some(shared) = self.lookup(id) else {
            return;
        };
        let mut session = shared.lock().await;
        if !session.is_current_local(generation) {
            return;
        }

        // The process is gone and the pump is the caller, so nothing to kill
        // or abort.
        let _ = session.take_local();
        session.send(ServerEvent::LocalExit { code }).await;
        info!(connection = %id, ?code, "local terminal exited");
    }

    /// Tear down the session of a closed connection.
    ///
    /// The session leaves the registry first. Every handle it owns then gets
    /// exactly one close or kill; failures are logged and skipped. Safe to
    /// call for unknown or already closed connections.
    pub async fn close_connection(&self, id: ConnectionId) -> Result<()> {
        let Some(shared) = self.inner.registry.remove(&id)? else {
            debug!(connection = %id, "close for unknown session");
            return Ok(());
        };

        let (remote, local) = {
            let mut session = shared.lock().await;
            session.mark_closed();
            (session.take_remote(), session.take_local())
        };

        release_remote(id, remote, true).await;
        release_local(id, local);
        info!(connection = %id, "session closed");
        Ok(())
    }

    /// Close every remaining session.
    pub async fn close_all(&self) {
        let ids = match self.inner.registry.list_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!("cannot list sessions: {}", e);
                return;
            }
        };
        if !ids.is_empty() {
            info!(count = ids.len(), "closing remaining sessions");
        }
        for id in ids {
            if let Err(e) = self.close_connection(id).await {
                warn!(connection = %id, "close failed: {}", e);
            }
        }
    }

    pub async fn snapshot(&self, id: ConnectionId) -> Option<SessionSnapshot> {
        let shared = self.lookup(id)?;
        let session = shared.lock().await;
        Some(SessionSnapshot::of(&session))
    }

    /// Snapshots of all live sessions, ordered by connection.
    pub async fn sessions(&self) -> Result<Vec<SessionSnapshot>> {
        let mut snapshots = Vec::new();
        for shared in self.inner.registry.entries()? {
            let session = shared.lock().await;
            if !session.is_closed() {
                snapshots.push(SessionSnapshot::of(&session));
            }
        }
        snapshots.sort_by_key(|s| s.id.as_u64());
        Ok(snapshots)
    }
}

/// Whether a ready connection for `attempt` should be adopted.
fn awaits_connection(session: &Session, attempt: u64) -> bool {
    session.is_current_attempt(attempt)
        && session.remote_state() == RemoteShellState::Connecting
        && !session.has_connection()
}

async fn close_orphan(mut connection: Box<dyn RemoteConnection>) {
    if let Err(e) = connection.close().await {
        debug!("orphaned connection close failed: {}", e);
    }
}

async fn release_remote(id: ConnectionId, handles: RemoteHandles, abort_pump: bool) {
    let RemoteHandles {
        connect_task,
        connection,
        stream,
        pump,
    } = handles;

    if let Some(task) = connect_task {
        task.abort();
    }
    if let Some(pump) = pump {
        if abort_pump {
            pump.abort();
        }
    }
    if let Some(mut stream) = stream {
        if let Err(e) = stream.close().await {
            debug!(connection = %id, "stream close failed: {}", e);
        }
    }
    if let Some(mut connection) = connection {
        if let Err(e) = connection.close().await {
            debug!(connection = %id, "connection close failed: {}", e);
        }
    }
}

fn release_local(id: ConnectionId, handles: LocalHandles) {
    if let Some(pump) = handles.pump {
        pump.abort();
    }
    if let Some(mut terminal) = handles.terminal {
        if let Err(e) = terminal.kill() {
            debug!(connection = %id, "local terminal kill failed: {}", e);
        }
    }
}

/// Forward shell stream events into the multiplexer.
async fn pump_remote(
    mux: Multiplexer,
    id: ConnectionId,
    attempt: u64,
    mut events: mpsc::Receiver<StreamEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Data(data) => mux.adapter_data(id, attempt, &data).await,
            StreamEvent::Error(message) => mux.adapter_error(id, attempt, message).await,
            StreamEvent::Closed => break,
        }
    }
    mux.adapter_closed(id, attempt).await;
}

/// Forward local terminal events into the multiplexer.
async fn pump_local(
    mux: Multiplexer,
    id: ConnectionId,
    generation: u64,
    mut events: mpsc::Receiver<LocalEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LocalEvent::Data(data) => mux.local_data(id, generation, &data).await,
            LocalEvent::Exit(code) => {
                mux.local_exited(id, generation, code).await;
                return;
            }
        }
    }
    mux.local_exited(id, generation, None).await;
}
