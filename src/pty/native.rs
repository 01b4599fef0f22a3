//! Native local terminals using portable-pty.

use std::sync::Mutex;
use std::time::Duration;

use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize as NativePtySize,
    PtySystem,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{AsyncPtyReader, AsyncPtyWriter, LocalEvent, LocalTerminal, LocalTerminalSpawner, PtySize};
use crate::error::RelayError;
use crate::Result;

/// Capacity of the per-terminal event channel.
const EVENT_CAPACITY: usize = 256;

/// How long to wait for trailing output after the shell exits.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Get the default shell for the current platform.
///
/// Unix: `$SHELL`, else `/bin/sh`. Windows: `%COMSPEC%`, else `powershell.exe`.
pub fn default_shell() -> String {
    #[cfg(unix)]
    {
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
    #[cfg(windows)]
    {
        std::env::var("COMSPEC")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "powershell.exe".to_string())
    }
}

fn native_size(size: PtySize) -> NativePtySize {
    NativePtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Wrapper around the native PTY system.
pub struct NativePty {
    pty_system: Mutex<Box<dyn PtySystem + Send>>,
}

impl NativePty {
    /// Create a new NativePty instance.
    pub fn new() -> Self {
        Self {
            pty_system: Mutex::new(native_pty_system()),
        }
    }
}

impl Default for NativePty {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTerminalSpawner for NativePty {
    /// Spawn a shell process in a new PTY.
    ///
    /// Output is pumped by a blocking reader thread. A supervisor task waits
    /// for the child, lets the reader drain briefly and then reports
    /// [`LocalEvent::Exit`], so the exit always follows the final output.
    fn spawn(
        &self,
        shell: &str,
        size: PtySize,
    ) -> Result<(Box<dyn LocalTerminal>, mpsc::Receiver<LocalEvent>)> {
        let pair = self
            .pty_system
            .lock()
            .map_err(|_| RelayError::LockPoisoned)?
            .openpty(native_size(size))
            .map_err(|e| RelayError::LocalSpawnUnavailable(e.to_string()))?;

        // Environment is inherited from the relay process.
        let cmd = CommandBuilder::new(shell);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| RelayError::LocalSpawnUnavailable(e.to_string()))?;
        drop(pair.slave);

        let pid = child.process_id();

        let io = pair
            .master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, pair.master.take_writer()?)));
        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                // The shell is already running and nothing else owns it.
                abandon_child(child.as_mut());
                return Err(RelayError::Pty(e.to_string()));
            }
        };
        let killer = child.clone_killer();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        tokio::spawn(AsyncPtyWriter::new(writer, input_rx).run());

        let reader_task = tokio::spawn(AsyncPtyReader::new(reader, event_tx.clone()).run());
        tokio::spawn(async move {
            let status = tokio::task::spawn_blocking(move || child.wait()).await;
            let code = match status {
                Ok(Ok(status)) => i32::try_from(status.exit_code()).ok(),
                Ok(Err(e)) => {
                    warn!("local terminal wait failed: {}", e);
                    None
                }
                Err(e) => {
                    warn!("local terminal wait task failed: {}", e);
                    None
                }
            };
            let _ = tokio::time::timeout(DRAIN_GRACE, reader_task).await;
            debug!(?code, "local terminal exited");
            let _ = event_tx.send(LocalEvent::Exit(code)).await;
        });

        debug!(shell, ?pid, "local terminal spawned");

        let terminal = NativeTerminal {
            input: input_tx,
            master: pair.master,
            killer,
            pid,
        };
        Ok((Box::new(terminal), event_rx))
    }
}

/// Kill and reap a child whose terminal could not be wired up.
fn abandon_child(child: &mut dyn Child) {
    if let Err(e) = child.kill() {
        debug!("kill of abandoned shell failed: {}", e);
    }
    if let Err(e) = child.wait() {
        warn!("abandoned shell not reaped: {}", e);
    }
}

/// A shell running on a native PTY.
struct NativeTerminal {
    input: mpsc::UnboundedSender<Vec<u8>>,
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl LocalTerminal for NativeTerminal {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.input
            .send(data.to_vec())
            .map_err(|_| RelayError::ChannelClosed)
    }

    fn resize(&mut self, size: PtySize) -> Result<()> {
        self.master
            .resize(native_size(size))
            .map_err(|e| RelayError::Pty(e.to_string()))
    }

    fn kill(&mut self) -> Result<()> {
        self.killer.kill().map_err(RelayError::Io)
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}
