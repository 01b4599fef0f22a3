//! Local terminal abstraction layer.
//!
//! [`LocalTerminalSpawner`] starts a shell on a pseudo-terminal and hands
//! back a [`LocalTerminal`] handle plus a channel of [`LocalEvent`]s.
//! [`NativePty`] implements it with Unix PTYs and Windows ConPTY.

mod async_adapter;
mod native;

pub use async_adapter::{AsyncPtyReader, AsyncPtyWriter};
pub use native::{default_shell, NativePty};

use tokio::sync::mpsc;

/// Size of a terminal in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Build a size from optional client-supplied dimensions, filling gaps
    /// from `fallback`.
    pub fn or_default(cols: Option<u16>, rows: Option<u16>, fallback: PtySize) -> Self {
        Self {
            rows: rows.filter(|r| *r > 0).unwrap_or(fallback.rows),
            cols: cols.filter(|c| *c > 0).unwrap_or(fallback.cols),
        }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Event produced by a running local terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    /// Output read from the terminal, in arrival order.
    Data(Vec<u8>),
    /// The shell process exited. `None` when the code is unknown.
    Exit(Option<i32>),
}

/// Handle to a spawned local terminal.
///
/// All operations are quick and non-blocking; output and exit are reported
/// through the event channel returned by [`LocalTerminalSpawner::spawn`].
pub trait LocalTerminal: Send {
    /// Queue keystrokes for the terminal.
    fn write(&mut self, data: &[u8]) -> crate::Result<()>;

    fn resize(&mut self, size: PtySize) -> crate::Result<()>;

    /// Terminate the shell process.
    fn kill(&mut self) -> crate::Result<()>;

    fn pid(&self) -> Option<u32>;
}

/// Starts local terminals.
pub trait LocalTerminalSpawner: Send + Sync {
    /// Spawn `shell` on a new terminal of the given size.
    fn spawn(
        &self,
        shell: &str,
        size: PtySize,
    ) -> crate::Result<(Box<dyn LocalTerminal>, mpsc::Receiver<LocalEvent>)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_size_default() {
        let size = PtySize::default();
        assert_eq!(size.rows, 24);
        assert_eq!(size.cols, 80);
    }

    #[test]
    fn test_pty_size_new() {
        let size = PtySize::new(40, 120);
        assert_eq!(size.rows, 40);
        assert_eq!(size.cols, 120);
    }

    #[test]
    fn test_or_default_fills_missing() {
        let fallback = PtySize::default();
        assert_eq!(
            PtySize::or_default(Some(120), None, fallback),
            PtySize::new(24, 120)
        );
        assert_eq!(PtySize::or_default(None, None, fallback), fallback);
        assert_eq!(
            PtySize::or_default(Some(0), Some(0), fallback),
            fallback
        );
    }
}
