//! Async adapters for PTY I/O.
//!
//! These adapters move blocking PTY reads and writes onto blocking threads
//! and talk to the rest of the relay through channels, so the tokio runtime
//! never blocks on a terminal.

use std::io::{Read, Write};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use super::LocalEvent;

/// Async reader for PTY output.
///
/// Runs in a blocking thread and sends output chunks through a channel.
pub struct AsyncPtyReader<R: Read + Send + 'static> {
    reader: R,
    tx: mpsc::Sender<LocalEvent>,
    buffer_size: usize,
}

impl<R: Read + Send + 'static> AsyncPtyReader<R> {
    /// Create a new AsyncPtyReader.
    ///
    /// # Arguments
    ///
    /// * `reader` - The PTY reader (blocking).
    /// * `tx` - Channel sender for output events.
    pub fn new(reader: R, tx: mpsc::Sender<LocalEvent>) -> Self {
        Self {
            reader,
            tx,
            buffer_size: 4096,
        }
    }

    /// Create with custom buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Run the reader loop in a blocking thread.
    ///
    /// Returns when the PTY is closed (read returns 0 or EIO), the channel
    /// is closed, or an unrecoverable error occurs.
    pub async fn run(self) {
        let buffer_size = self.buffer_size;
        let mut reader = self.reader;
        let tx = self.tx;

        let result = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; buffer_size];

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("PTY reader: EOF");
                        break;
                    }
                    Ok(n) => {
                        trace!("PTY reader: read {} bytes", n);
                        if tx.blocking_send(LocalEvent::Data(buf[..n].to_vec())).is_err() {
                            debug!("PTY reader: channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        // EIO on Unix means the PTY slave side is gone
                        #[cfg(unix)]
                        if e.raw_os_error() == Some(libc::EIO) {
                            debug!("PTY reader: PTY closed (EIO)");
                            break;
                        }

                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            debug!("PTY reader: broken pipe");
                            break;
                        }

                        error!("PTY reader error: {}", e);
                        break;
                    }
                }
            }
        })
        .await;

        if let Err(e) = result {
            error!("PTY reader task panicked: {}", e);
        }
    }
}

/// Async writer for PTY input.
///
/// Receives data through a channel and writes to the PTY in a blocking thread.
pub struct AsyncPtyWriter<W: Write + Send + 'static> {
    writer: W,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl<W: Write + Send + 'static> AsyncPtyWriter<W> {
    /// Create a new AsyncPtyWriter.
    ///
    /// # Arguments
    ///
    /// * `writer` - The PTY writer (blocking).
    /// * `rx` - Channel receiver for input data.
    pub fn new(writer: W, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { writer, rx }
    }

    /// Run the writer loop in a blocking thread.
    ///
    /// Returns when the channel is closed (all senders dropped) or an
    /// unrecoverable error occurs.
    pub async fn run(self) {
        let mut writer = self.writer;
        let mut rx = self.rx;

        let result = tokio::task::spawn_blocking(move || {
            while let Some(data) = rx.blocking_recv() {
                trace!("PTY writer: writing {} bytes", data.len());
                if let Err(e) = writer.write_all(&data) {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        debug!("PTY writer: broken pipe");
                        break;
                    }
                    error!("PTY writer error: {}", e);
                    break;
                }
                if let Err(e) = writer.flush() {
                    error!("PTY writer flush error: {}", e);
                    break;
                }
            }
            debug!("PTY writer: channel closed");
        })
        .await;

        if let Err(e) = result {
            error!("PTY writer task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Writer that appends into a shared buffer.
    #[derive(Clone, Default)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_async_reader_basic() {
        let data = b"Hello, World!\nTest line 2\n";
        let cursor = Cursor::new(data.to_vec());

        let (tx, mut rx) = mpsc::channel(32);
        let reader = AsyncPtyReader::new(cursor, tx);
        let handle = tokio::spawn(reader.run());

        let mut received = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
        {
            if let LocalEvent::Data(chunk) = event {
                received.extend(chunk);
            }
        }

        let _ = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn test_async_reader_small_buffer_keeps_order() {
        let data = b"0123456789abcdef".to_vec();
        let (tx, mut rx) = mpsc::channel(32);
        let reader = AsyncPtyReader::new(Cursor::new(data.clone()), tx).with_buffer_size(3);
        tokio::spawn(reader.run());

        let mut received = Vec::new();
        while let Some(LocalEvent::Data(chunk)) = rx.recv().await {
            assert!(chunk.len() <= 3);
            received.extend(chunk);
        }
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn test_async_reader_empty() {
        let (tx, mut rx) = mpsc::channel(32);
        let reader = AsyncPtyReader::new(Cursor::new(Vec::new()), tx);
        let handle = tokio::spawn(reader.run());

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_ok());
        assert!(result.unwrap().is_none());

        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_reader_channel_closed() {
        let (tx, rx) = mpsc::channel(1);
        let reader = AsyncPtyReader::new(Cursor::new(b"unread".to_vec()), tx);
        drop(rx);

        let handle = tokio::spawn(reader.run());
        let result = tokio::time::timeout(Duration::from_millis(500), handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_async_writer_writes_in_order() {
        let sink = SharedWriter::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = AsyncPtyWriter::new(sink.clone(), rx);

        tx.send(b"Hello".to_vec()).unwrap();
        tx.send(b", World!".to_vec()).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), writer.run())
            .await
            .unwrap();
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"Hello, World!");
    }
}
