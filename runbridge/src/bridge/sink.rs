//! Outbound frames and the serialized sink every producer writes through.
//!
//! The sink is the sending half of a bounded channel. Exactly one writer
//! (the gateway's socket task) drains the other half, so frames from
//! different producers never interleave mid-frame.

use std::fmt;

use tokio::sync::mpsc;

use super::outcome::Outcome;
use crate::error::ChannelError;

/// Sentinel sent right after a frame classified as a prompt.
pub const AWAITING_INPUT: &str = "WAITING_FOR_INPUT";

/// Prefix tagging stderr lines for display.
pub const STDERR_PREFIX: &str = "Error: ";

/// A single outbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A stdout line or flushed prompt, verbatim.
    Stdout(String),

    /// A stderr line, rendered with [`STDERR_PREFIX`].
    Stderr(String),

    /// The preceding stdout frame looks like a prompt.
    AwaitingInput,

    /// The final frame of a session.
    Terminal(Outcome),
}

/// Which producer a frame is attributable to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    Stdout,
    Stderr,
    Control,
}

impl Frame {
    /// The producer of this frame.
    ///
    /// The sentinel is a control frame even though the stdout drain emits it.
    pub fn origin(&self) -> FrameOrigin {
        match self {
            Self::Stdout(_) => FrameOrigin::Stdout,
            Self::Stderr(_) => FrameOrigin::Stderr,
            Self::AwaitingInput | Self::Terminal(_) => FrameOrigin::Control,
        }
    }

    /// Whether this frame ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout(line) => f.write_str(line),
            Self::Stderr(line) => write!(f, "{}{}", STDERR_PREFIX, line),
            Self::AwaitingInput => f.write_str(AWAITING_INPUT),
            Self::Terminal(outcome) => write!(f, "{}", outcome),
        }
    }
}

/// Cloneable handle to the single outbound writer.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Frame>,
}

impl FrameSink {
    /// Create a sink and the receiver its single writer consumes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a frame, waiting for room if the writer is behind.
    pub async fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        self.tx.send(frame).await.map_err(|_| ChannelError::Closed)
    }

    /// Queue two frames back to back, with no other producer's frame between
    /// them.
    pub async fn send_pair(&self, first: Frame, second: Frame) -> Result<(), ChannelError> {
        if self.tx.max_capacity() < 2 {
            self.send(first).await?;
            return self.send(second).await;
        }

        let mut permits = self
            .tx
            .reserve_many(2)
            .await
            .map_err(|_| ChannelError::Closed)?;
        for frame in [first, second] {
            if let Some(permit) = permits.next() {
                permit.send(frame);
            }
        }
        Ok(())
    }

    /// Check if the writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_text() {
        assert_eq!(Frame::Stdout("Name: ".into()).to_string(), "Name: ");
        assert_eq!(Frame::Stderr("boom".into()).to_string(), "Error: boom");
        assert_eq!(Frame::AwaitingInput.to_string(), "WAITING_FOR_INPUT");
        assert_eq!(
            Frame::Terminal(Outcome::Completed).to_string(),
            "EXECUTION_COMPLETE"
        );
    }

    #[test]
    fn test_frame_origin() {
        assert_eq!(Frame::Stdout(String::new()).origin(), FrameOrigin::Stdout);
        assert_eq!(Frame::Stderr(String::new()).origin(), FrameOrigin::Stderr);
        assert_eq!(Frame::AwaitingInput.origin(), FrameOrigin::Control);
        assert!(Frame::Terminal(Outcome::Disconnected).is_terminal());
        assert!(!Frame::AwaitingInput.is_terminal());
    }

    #[tokio::test]
    async fn test_send_preserves_order() {
        let (sink, mut rx) = FrameSink::channel(4);
        sink.send(Frame::Stdout("a".into())).await.unwrap();
        sink.clone().send(Frame::Stdout("b".into())).await.unwrap();
        assert_eq!(rx.recv().await, Some(Frame::Stdout("a".into())));
        assert_eq!(rx.recv().await, Some(Frame::Stdout("b".into())));
    }

    #[tokio::test]
    async fn test_pair_not_split_by_waiting_sender() {
        let (sink, mut rx) = FrameSink::channel(2);
        sink.send(Frame::Stderr("a".into())).await.unwrap();

        let pair = tokio::spawn({
            let sink = sink.clone();
            async move {
                sink.send_pair(Frame::Stdout("Name: ".into()), Frame::AwaitingInput)
                    .await
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let single = tokio::spawn({
            let sink = sink.clone();
            async move { sink.send(Frame::Stderr("b".into())).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut frames = Vec::new();
        for _ in 0..4 {
            frames.push(rx.recv().await.unwrap().to_string());
        }
        assert_eq!(frames, ["Error: a", "Name: ", "WAITING_FOR_INPUT", "Error: b"]);
        pair.await.unwrap().unwrap();
        single.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_send_after_writer_gone() {
        let (sink, rx) = FrameSink::channel(4);
        drop(rx);
        assert!(sink.is_closed());
        assert!(matches!(
            sink.send(Frame::AwaitingInput).await,
            Err(ChannelError::Closed)
        ));
    }
}
