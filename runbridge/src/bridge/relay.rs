//! Input relay from the peer to the subprocess's stdin.

use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{ChannelError, StreamError};

/// Messages arriving from the peer, one line of input each.
///
/// The stream ending, or yielding an error, means the peer disconnected.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// Build an inbound stream fed by an mpsc sender.
///
/// Dropping every sender reads as a disconnect.
pub fn inbound_channel(capacity: usize) -> (mpsc::Sender<String>, InboundStream) {
    let (tx, rx) = mpsc::channel(capacity);
    let inbound = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|line| (Ok::<_, ChannelError>(line), rx))
    });
    (tx, Box::pin(inbound))
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The subprocess's stdin behind its single write lock.
///
/// Closing replaces the writer with `None`; later writes fail with
/// [`StreamError::InputClosed`] instead of vanishing.
#[derive(Clone)]
pub struct InputHandle {
    inner: Arc<Mutex<Option<BoxedWriter>>>,
}

impl InputHandle {
    /// Wrap the write end of the subprocess's stdin.
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(writer)))),
        }
    }

    /// Write `line` followed by a newline, then flush.
    pub async fn write_line(&self, line: &str) -> Result<(), StreamError> {
        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(StreamError::InputClosed)?;

        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');

        writer
            .write_all(&data)
            .await
            .map_err(|source| StreamError::Write { source })?;
        writer
            .flush()
            .await
            .map_err(|source| StreamError::Write { source })
    }

    /// Close stdin. Returns `false` if it was already closed.
    pub async fn close(&self) -> bool {
        let writer = self.inner.lock().await.take();
        match writer {
            Some(mut writer) => {
                if let Err(e) = writer.shutdown().await {
                    debug!("stdin shutdown: {}", e);
                }
                true
            }
            None => false,
        }
    }

    /// Check if stdin has been closed.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

impl std::fmt::Debug for InputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputHandle").finish_non_exhaustive()
    }
}

/// Why the relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The done signal fired.
    Done,
    /// The peer went away; a kill was requested.
    Disconnected,
}

/// Task forwarding inbound messages to stdin.
pub struct InputRelay {
    session_id: String,
    inbound: InboundStream,
    input: InputHandle,
    done: CancellationToken,
    kill: CancellationToken,
    forwarded: usize,
}

impl InputRelay {
    /// Create a relay.
    ///
    /// `done` stops the relay; `kill` is raised when the peer disconnects.
    pub fn new(
        session_id: impl Into<String>,
        inbound: InboundStream,
        input: InputHandle,
        done: CancellationToken,
        kill: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            inbound,
            input,
            done,
            kill,
            forwarded: 0,
        }
    }

    /// Relay until the done signal fires or the peer disconnects.
    ///
    /// The input lock is only taken once a message has been read, never
    /// while waiting on the peer.
    pub async fn run(mut self) -> RelayExit {
        loop {
            let next = tokio::select! {
                biased;
                () = self.done.cancelled() => {
                    debug!(
                        "session {}: relay stopping after {} lines",
                        self.session_id, self.forwarded
                    );
                    return RelayExit::Done;
                }
                next = self.inbound.next() => next,
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => return self.disconnected(e),
                None => return self.disconnected(ChannelError::Disconnected),
            };

            // A write blocked on a full pipe holds the input lock; give it up
            // as soon as the program is gone.
            let written = tokio::select! {
                biased;
                () = self.done.cancelled() => {
                    debug!(
                        "session {}: relay abandoned a pending write after {} lines",
                        self.session_id, self.forwarded
                    );
                    return RelayExit::Done;
                }
                written = self.input.write_line(&line) => written,
            };

            match written {
                Ok(()) => {
                    self.forwarded += 1;
                    trace!("session {}: forwarded {} bytes", self.session_id, line.len());
                }
                Err(e) => warn!("session {}: input dropped: {}", self.session_id, e),
            }
        }
    }

    fn disconnected(self, reason: ChannelError) -> RelayExit {
        info!("session {}: {}; requesting kill", self.session_id, reason);
        self.kill.cancel();
        RelayExit::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_write_line_appends_newline() {
        let (writer, mut reader) = tokio::io::duplex(64);
        let input = InputHandle::new(writer);
        input.write_line("  hello world ").await.unwrap();

        let mut buf = [0u8; 15];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"  hello world \n");
    }

    #[tokio::test]
    async fn test_write_after_close_is_reported() {
        let (writer, _reader) = tokio::io::duplex(64);
        let input = InputHandle::new(writer);
        assert!(input.close().await);
        assert!(!input.close().await);
        assert!(input.is_closed().await);
        assert!(matches!(
            input.write_line("late").await,
            Err(StreamError::InputClosed)
        ));
    }

    #[tokio::test]
    async fn test_relay_forwards_until_done() {
        let (writer, mut reader) = tokio::io::duplex(64);
        let (tx, inbound) = inbound_channel(4);
        let done = CancellationToken::new();
        let kill = CancellationToken::new();
        let relay = InputRelay::new(
            "t",
            inbound,
            InputHandle::new(writer),
            done.clone(),
            kill.clone(),
        );
        let task = tokio::spawn(relay.run());

        tx.send("42".into()).await.unwrap();
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"42\n");

        done.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, RelayExit::Done);
        assert!(!kill.is_cancelled());
    }

    #[tokio::test]
    async fn test_disconnect_requests_kill() {
        let (writer, _reader) = tokio::io::duplex(64);
        let input = InputHandle::new(writer);
        let (tx, inbound) = inbound_channel(4);
        let kill = CancellationToken::new();
        let relay = InputRelay::new(
            "t",
            inbound,
            input.clone(),
            CancellationToken::new(),
            kill.clone(),
        );

        drop(tx);
        assert_eq!(relay.run().await, RelayExit::Disconnected);
        assert!(kill.is_cancelled());
        assert!(!input.is_closed().await);
    }

    #[tokio::test]
    async fn test_receive_error_is_disconnect() {
        let (writer, _reader) = tokio::io::duplex(64);
        let error = ChannelError::Receive("reset by peer".into());
        let inbound: InboundStream = Box::pin(stream::iter(vec![Err::<String, _>(error)]));
        let kill = CancellationToken::new();
        let relay = InputRelay::new(
            "t",
            inbound,
            InputHandle::new(writer),
            CancellationToken::new(),
            kill.clone(),
        );

        assert_eq!(relay.run().await, RelayExit::Disconnected);
        assert!(kill.is_cancelled());
    }

    #[tokio::test]
    async fn test_done_wins_over_pending_input() {
        let (writer, _reader) = tokio::io::duplex(64);
        let (tx, inbound) = inbound_channel(4);
        tx.send("ignored".into()).await.unwrap();
        let done = CancellationToken::new();
        done.cancel();
        let relay = InputRelay::new(
            "t",
            inbound,
            InputHandle::new(writer),
            done,
            CancellationToken::new(),
        );

        assert_eq!(relay.run().await, RelayExit::Done);
    }

    #[tokio::test]
    async fn test_done_releases_blocked_write() {
        // Nobody reads the pipe, so the write stalls once 16 bytes are queued
        let (writer, _reader) = tokio::io::duplex(16);
        let input = InputHandle::new(writer);
        let (tx, inbound) = inbound_channel(4);
        let done = CancellationToken::new();
        let relay = InputRelay::new(
            "t",
            inbound,
            input.clone(),
            done.clone(),
            CancellationToken::new(),
        );
        let task = tokio::spawn(relay.run());

        tx.send("x".repeat(4096)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        done.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, RelayExit::Done);

        // The lock is free again, so closing does not wait on the stalled write
        let closed = tokio::time::timeout(Duration::from_secs(1), input.close()).await;
        assert_eq!(closed.ok(), Some(true));
    }
}
