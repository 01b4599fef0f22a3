//! Recording adapters shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shell_relay::mux::{Multiplexer, MuxSettings};
use shell_relay::pty::{LocalEvent, LocalTerminal, LocalTerminalSpawner, PtySize};
use shell_relay::remote::{
    RemoteConnection, RemoteFileChannel, RemoteFileWriter, RemoteShellConnector, RemoteStream,
    RemoteTarget, StreamEvent,
};
use shell_relay::{
    client_channel, ConnectionId, Credential, RelayError, RemoteShellState, ServerEvent,
};
use tokio::sync::{mpsc, Notify};

/// Every adapter call, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect {
        host: String,
        port: u16,
        username: String,
        credential: String,
    },
    OpenShell {
        term: String,
        size: PtySize,
    },
    Write(Vec<u8>),
    Resize(PtySize),
    StreamClose,
    ConnectionClose,
    OpenFileChannel,
    Create(String),
    FileChannelClose,
    Spawn(String),
    LocalWrite(Vec<u8>),
    LocalResize(PtySize),
    Kill,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub fn count(log: &CallLog, call: &Call) -> usize {
    log.lock().unwrap().iter().filter(|c| *c == call).count()
}

/// How the mock connector answers a login.
#[derive(Clone)]
pub enum ConnectBehavior {
    Succeed,
    Fail,
    /// Never answers.
    Hang,
    /// Succeeds once the gate is notified.
    Gated(Arc<Notify>),
}

/// Connector whose connections and streams record into one log.
pub struct MockConnector {
    pub calls: CallLog,
    behavior: Mutex<ConnectBehavior>,
    shell_fails: bool,
    resize_fails: bool,
    /// Connections handed out by successful logins.
    pub logins: Arc<AtomicUsize>,
    /// Sender feeding the most recently opened shell stream.
    pub stream_events: Arc<Mutex<Option<mpsc::Sender<StreamEvent>>>>,
}

impl MockConnector {
    pub fn new(behavior: ConnectBehavior) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            behavior: Mutex::new(behavior),
            shell_fails: false,
            resize_fails: false,
            logins: Arc::new(AtomicUsize::new(0)),
            stream_events: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_failing_shell(mut self) -> Self {
        self.shell_fails = true;
        self
    }

    /// Shell streams whose resize always errors.
    pub fn with_failing_resize(mut self) -> Self {
        self.resize_fails = true;
        self
    }

    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn connection(&self) -> MockConnection {
        MockConnection {
            calls: Arc::clone(&self.calls),
            shell_fails: self.shell_fails,
            resize_fails: self.resize_fails,
            stream_events: Arc::clone(&self.stream_events),
        }
    }

    pub fn stream_sender(&self) -> mpsc::Sender<StreamEvent> {
        self.stream_events
            .lock()
            .unwrap()
            .clone()
            .expect("no shell stream opened")
    }
}

#[async_trait]
impl RemoteShellConnector for MockConnector {
    async fn connect(
        &self,
        target: &RemoteTarget,
        credential: Credential,
    ) -> shell_relay::Result<Box<dyn RemoteConnection>> {
        self.calls.lock().unwrap().push(Call::Connect {
            host: target.host.clone(),
            port: target.port,
            username: target.username.clone(),
            credential: credential.expose().to_string(),
        });

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            ConnectBehavior::Succeed => {}
            ConnectBehavior::Fail => {
                return Err(RelayError::Connect("connection refused".into()));
            }
            ConnectBehavior::Hang => std::future::pending::<()>().await,
            ConnectBehavior::Gated(gate) => gate.notified().await,
        }
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.connection()))
    }
}

pub struct MockConnection {
    calls: CallLog,
    shell_fails: bool,
    resize_fails: bool,
    stream_events: Arc<Mutex<Option<mpsc::Sender<StreamEvent>>>>,
}

#[async_trait]
impl RemoteConnection for MockConnection {
    async fn open_shell(
        &mut self,
        term: &str,
        size: PtySize,
    ) -> shell_relay::Result<(Box<dyn RemoteStream>, mpsc::Receiver<StreamEvent>)> {
        self.calls.lock().unwrap().push(Call::OpenShell {
            term: term.to_string(),
            size,
        });
        if self.shell_fails {
            return Err(RelayError::ShellOpen("administratively prohibited".into()));
        }

        let (tx, rx) = mpsc::channel(16);
        *self.stream_events.lock().unwrap() = Some(tx);
        Ok((
            Box::new(MockStream {
                calls: Arc::clone(&self.calls),
                resize_fails: self.resize_fails,
            }),
            rx,
        ))
    }

    async fn open_file_channel(&mut self) -> shell_relay::Result<Box<dyn RemoteFileChannel>> {
        self.calls.lock().unwrap().push(Call::OpenFileChannel);
        Ok(Box::new(MockFileChannel {
            calls: Arc::clone(&self.calls),
        }))
    }

    async fn close(&mut self) -> shell_relay::Result<()> {
        self.calls.lock().unwrap().push(Call::ConnectionClose);
        Ok(())
    }
}

pub struct MockStream {
    calls: CallLog,
    resize_fails: bool,
}

#[async_trait]
impl RemoteStream for MockStream {
    async fn write(&mut self, data: &[u8]) -> shell_relay::Result<()> {
        self.calls.lock().unwrap().push(Call::Write(data.to_vec()));
        Ok(())
    }

    async fn resize(&mut self, size: PtySize) -> shell_relay::Result<()> {
        self.calls.lock().unwrap().push(Call::Resize(size));
        if self.resize_fails {
            return Err(RelayError::StreamIo("window change rejected".into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> shell_relay::Result<()> {
        self.calls.lock().unwrap().push(Call::StreamClose);
        Err(RelayError::StreamIo("already closed".into()))
    }
}

pub struct MockFileChannel {
    calls: CallLog,
}

#[async_trait]
impl RemoteFileChannel for MockFileChannel {
    async fn create(&mut self, path: &str) -> shell_relay::Result<RemoteFileWriter> {
        self.calls.lock().unwrap().push(Call::Create(path.to_string()));
        Ok(Box::pin(tokio::io::sink()))
    }

    async fn close(&mut self) -> shell_relay::Result<()> {
        self.calls.lock().unwrap().push(Call::FileChannelClose);
        Ok(())
    }
}

/// Spawner handing out recording terminals.
pub struct MockSpawner {
    pub calls: CallLog,
    unavailable: bool,
    resize_fails: bool,
    pub local_events: Arc<Mutex<Option<mpsc::Sender<LocalEvent>>>>,
}

impl MockSpawner {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            unavailable: false,
            resize_fails: false,
            local_events: Arc::new(Mutex::new(None)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new()
        }
    }

    /// Terminals whose resize always errors.
    pub fn with_failing_resize(mut self) -> Self {
        self.resize_fails = true;
        self
    }

    pub fn event_sender(&self) -> mpsc::Sender<LocalEvent> {
        self.local_events
            .lock()
            .unwrap()
            .clone()
            .expect("no local terminal spawned")
    }
}

impl LocalTerminalSpawner for MockSpawner {
    fn spawn(
        &self,
        shell: &str,
        _size: PtySize,
    ) -> shell_relay::Result<(Box<dyn LocalTerminal>, mpsc::Receiver<LocalEvent>)> {
        self.calls.lock().unwrap().push(Call::Spawn(shell.to_string()));
        if self.unavailable {
            return Err(RelayError::LocalSpawnUnavailable("no pty on this host".into()));
        }

        let (tx, rx) = mpsc::channel(16);
        *self.local_events.lock().unwrap() = Some(tx);
        Ok((
            Box::new(MockTerminal {
                calls: Arc::clone(&self.calls),
                resize_fails: self.resize_fails,
            }),
            rx,
        ))
    }
}

pub struct MockTerminal {
    calls: CallLog,
    resize_fails: bool,
}

impl LocalTerminal for MockTerminal {
    fn write(&mut self, data: &[u8]) -> shell_relay::Result<()> {
        self.calls.lock().unwrap().push(Call::LocalWrite(data.to_vec()));
        Ok(())
    }

    fn resize(&mut self, size: PtySize) -> shell_relay::Result<()> {
        self.calls.lock().unwrap().push(Call::LocalResize(size));
        if self.resize_fails {
            return Err(RelayError::Pty("TIOCSWINSZ failed".into()));
        }
        Ok(())
    }

    fn kill(&mut self) -> shell_relay::Result<()> {
        self.calls.lock().unwrap().push(Call::Kill);
        Err(RelayError::Pty("no such process".into()))
    }

    fn pid(&self) -> Option<u32> {
        Some(4242)
    }
}

pub fn settings() -> MuxSettings {
    MuxSettings {
        connect_timeout: Duration::from_secs(5),
        local_shell: Some("/bin/mock-sh".to_string()),
        ..MuxSettings::default()
    }
}

pub struct Harness {
    pub mux: Multiplexer,
    pub connector: Arc<MockConnector>,
    pub spawner: Arc<MockSpawner>,
}

impl Harness {
    pub fn new(connector: MockConnector) -> Self {
        Self::with(connector, MockSpawner::new(), settings())
    }

    pub fn with(connector: MockConnector, spawner: MockSpawner, settings: MuxSettings) -> Self {
        let connector = Arc::new(connector);
        let spawner = Arc::new(spawner);
        let mux = Multiplexer::new(connector.clone(), spawner.clone(), settings);
        Self {
            mux,
            connector,
            spawner,
        }
    }

    pub fn open(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let id = ConnectionId::new();
        let (tx, rx) = client_channel();
        self.mux.open_connection(id, tx).unwrap();
        (id, rx)
    }

    pub async fn remote_state(&self, id: ConnectionId) -> Option<RemoteShellState> {
        self.mux.snapshot(id).await.map(|s| s.remote_state)
    }

    /// Poll until the session reaches `state`.
    pub async fn wait_for(&self, id: ConnectionId, state: RemoteShellState) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while self.remote_state(id).await != Some(state) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "session never reached {:?}",
                state
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Everything already queued for the client.
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait for the next client event.
pub async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("client channel closed")
}

/// Give spawned pumps a moment to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}
