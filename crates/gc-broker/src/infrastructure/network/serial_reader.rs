//! FramedReader: turns an inbound serial byte stream into delimited messages.
//!
//! One reader task runs per serial connection whose two-way mode is enabled.
//! It pulls bytes one at a time (through a `BufReader`, so not one syscall per
//! byte) into a [`FrameScanner`] and sends each completed message on the
//! feedback channel as a [`SerialFrame`].
//!
//! # Stream end and errors
//!
//! - **End of stream** – logged, the partial message is discarded, and the
//!   reader waits [`EOF_BACKOFF`] before reading again.  The connection set's
//!   health check is what eventually replaces a dead socket.
//! - **I/O error** – the reader logs it and exits.
//! - **Feedback receiver dropped** – nobody is listening any more, the reader
//!   exits.

use std::time::Duration;

use gc_core::{Delimiter, FrameScanner, TargetPort};
use tokio::{
    io::{AsyncRead, AsyncReadExt, BufReader},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// Pause after end-of-stream before the next read attempt.
pub const EOF_BACKOFF: Duration = Duration::from_secs(1);

/// One complete inbound message, delimiter included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialFrame {
    pub port: TargetPort,
    pub bytes: Vec<u8>,
}

/// Handle to a running reader task.
///
/// Dropping the handle stops the reader.
#[derive(Debug)]
pub struct FramedReader {
    port: TargetPort,
    task: Option<JoinHandle<()>>,
}

impl FramedReader {
    /// Spawns a reader task for `port` on the current tokio runtime.
    pub fn spawn<R>(
        port: TargetPort,
        reader: R,
        delimiter: Delimiter,
        feedback: mpsc::Sender<SerialFrame>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::spawn_with_backoff(port, reader, delimiter, feedback, EOF_BACKOFF)
    }

    /// Like [`spawn`](Self::spawn) with a custom end-of-stream back-off.
    pub fn spawn_with_backoff<R>(
        port: TargetPort,
        reader: R,
        delimiter: Delimiter,
        feedback: mpsc::Sender<SerialFrame>,
        eof_backoff: Duration,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        info!("starting {port} reader, delimiter {:02X?}", delimiter.as_bytes());
        let task = tokio::spawn(read_loop(port, reader, delimiter, feedback, eof_backoff));
        Self {
            port,
            task: Some(task),
        }
    }

    pub fn port(&self) -> TargetPort {
        self.port
    }

    /// Returns `true` while the reader task has not finished.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancels the reader task.  Calling it again does nothing.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("stopping {} reader", self.port);
            task.abort();
        }
    }
}

impl Drop for FramedReader {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn read_loop<R>(
    port: TargetPort,
    reader: R,
    delimiter: Delimiter,
    feedback: mpsc::Sender<SerialFrame>,
    eof_backoff: Duration,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut scanner = FrameScanner::new(delimiter);
    let mut at_eof = false;

    loop {
        match reader.read_u8().await {
            Ok(byte) => {
                at_eof = false;
                if let Some(bytes) = scanner.push(byte) {
                    debug!("{port} received {} byte message", bytes.len());
                    if feedback.send(SerialFrame { port, bytes }).await.is_err() {
                        debug!("{port} feedback receiver closed; reader exiting");
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                if !at_eof {
                    warn!(
                        "{port} reached end of stream; discarding {} buffered bytes",
                        scanner.pending().len()
                    );
                    at_eof = true;
                }
                scanner.reset();
                tokio::time::sleep(eof_backoff).await;
            }
            Err(e) => {
                error!("{port} read error, reader exiting: {e}");
                return;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn crlf() -> Delimiter {
        Delimiter::new(b"\r\n".to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_reader_emits_frames_in_order() {
        // Arrange
        let stream = tokio_test::io::Builder::new()
            .read(b"PWR=1\r\nVOL")
            .read(b"=20\r\n")
            .build();
        let (tx, mut rx) = mpsc::channel(8);

        // Act
        let mut reader = FramedReader::spawn(TargetPort::Serial1, stream, crlf(), tx);
        let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        reader.stop();

        // Assert
        assert_eq!(first.port, TargetPort::Serial1);
        assert_eq!(first.bytes, b"PWR=1\r\n".to_vec());
        assert_eq!(second.bytes, b"VOL=20\r\n".to_vec());
    }

    #[tokio::test]
    async fn test_reader_handles_delimiter_split_across_reads() {
        let stream = tokio_test::io::Builder::new()
            .read(b"OK\r")
            .wait(Duration::from_millis(20))
            .read(b"\n")
            .build();
        let (tx, mut rx) = mpsc::channel(8);

        let _reader = FramedReader::spawn(TargetPort::Serial2, stream, crlf(), tx);
        let frame = timeout(WAIT, rx.recv()).await.unwrap().unwrap();

        assert_eq!(frame.port, TargetPort::Serial2);
        assert_eq!(frame.bytes, b"OK\r\n".to_vec());
    }

    #[tokio::test]
    async fn test_partial_message_is_not_emitted_at_end_of_stream() {
        // Arrange – the peer sends half a message and closes
        let (mut device, local) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(8);
        let mut reader = FramedReader::spawn_with_backoff(
            TargetPort::Serial1,
            local,
            crlf(),
            tx,
            Duration::from_millis(10),
        );

        // Act
        device.write_all(b"PARTIAL").await.unwrap();
        drop(device);

        // Assert – nothing arrives and the reader keeps running
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
        assert!(reader.is_running());
        reader.stop();
    }

    #[tokio::test]
    async fn test_read_error_terminates_reader() {
        let stream = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let (tx, _rx) = mpsc::channel(8);

        let reader = FramedReader::spawn(TargetPort::Serial1, stream, crlf(), tx);
        timeout(WAIT, async {
            while reader.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(!reader.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (_device, local) = tokio::io::duplex(64);
        let (tx, _rx) = mpsc::channel(8);
        let mut reader = FramedReader::spawn(TargetPort::Serial1, local, crlf(), tx);

        reader.stop();
        reader.stop();

        assert!(!reader.is_running());
    }
}
