//! Drain task turning one subprocess output stream into frames.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::buffer::LineBuffer;
use super::patterns::PromptDetector;
use crate::bridge::{BridgeConfig, Frame, FrameSink};
use crate::error::{ChannelError, StreamError};

/// Which subprocess output stream a drain task owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output; prompt detection applies.
    Stdout,
    /// Standard error; lines are tagged, never treated as prompts.
    Stderr,
}

impl StreamKind {
    fn frame(self, text: String) -> Frame {
        match self {
            Self::Stdout => Frame::Stdout(text),
            Self::Stderr => Frame::Stderr(text),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Configuration for drain task behavior.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// How long a prompt candidate must stay unchanged before it is reported.
    pub quiescence: Duration,

    /// Size of each read from the stream.
    pub read_chunk_size: usize,

    /// Unterminated bytes at which the tail is flushed without a sentinel.
    pub max_pending_bytes: usize,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl From<&BridgeConfig> for DrainConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            quiescence: config.quiescence,
            read_chunk_size: config.read_chunk_size,
            max_pending_bytes: config.max_pending_bytes,
        }
    }
}

/// What a drain task produced before its stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    /// The stream drained.
    pub kind: StreamKind,
    /// Completed lines emitted.
    pub lines: usize,
    /// `WAITING_FOR_INPUT` sentinels emitted.
    pub prompts: usize,
}

/// Single reader for one output stream.
///
/// Completed lines and partial-line prompt detection are both derived from
/// this one read loop; nothing else may read the stream.
pub struct StreamDrain<R> {
    session_id: String,
    kind: StreamKind,
    reader: R,
    buffer: LineBuffer,
    sink: FrameSink,
    detector: Arc<dyn PromptDetector>,
    config: DrainConfig,
    summary: DrainSummary,
    sink_closed: bool,
}

impl<R> StreamDrain<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a drain task for `reader`.
    pub fn new(
        session_id: impl Into<String>,
        kind: StreamKind,
        reader: R,
        sink: FrameSink,
        detector: Arc<dyn PromptDetector>,
        config: DrainConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            reader,
            buffer: LineBuffer::new(config.max_pending_bytes),
            sink,
            detector,
            config,
            summary: DrainSummary {
                kind,
                lines: 0,
                prompts: 0,
            },
            sink_closed: false,
        }
    }

    /// Read until end-of-data, emitting frames as output arrives.
    ///
    /// Read errors end the stream; they are logged, not returned.
    pub async fn run(mut self) -> DrainSummary {
        let mut chunk = vec![0u8; self.config.read_chunk_size.max(1)];

        loop {
            let read = if self.prompt_pending() {
                match tokio::time::timeout(self.config.quiescence, self.reader.read(&mut chunk))
                    .await
                {
                    Ok(read) => read,
                    Err(_) => {
                        self.flush_prompt().await;
                        continue;
                    }
                }
            } else {
                self.reader.read(&mut chunk).await
            };

            match read {
                Ok(0) => break,
                Ok(n) => {
                    trace!(
                        "session {}: {} chunk of {} bytes",
                        self.session_id, self.kind, n
                    );
                    self.buffer.extend(&chunk[..n]);
                    self.emit_lines().await;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    let err = StreamError::Read {
                        stream: self.kind,
                        source,
                    };
                    warn!("session {}: {}; treating as end of stream", self.session_id, err);
                    break;
                }
            }
        }

        self.finish().await;
        debug!(
            "session {}: {} drained ({} lines, {} prompts)",
            self.session_id, self.kind, self.summary.lines, self.summary.prompts
        );
        self.summary
    }

    /// Whether the stdout tail currently looks like a prompt.
    fn prompt_pending(&self) -> bool {
        self.kind == StreamKind::Stdout
            && !self.buffer.is_empty()
            && self.detector.is_awaiting_input(&self.buffer.tail())
    }

    async fn emit_lines(&mut self) {
        while let Some(line) = self.buffer.next_line() {
            self.summary.lines += 1;
            self.emit(self.kind.frame(line)).await;
        }

        if self.buffer.is_overfull() {
            if let Some(tail) = self.buffer.take_complete() {
                debug!(
                    "session {}: {} tail exceeded {} bytes, flushing",
                    self.session_id, self.kind, self.config.max_pending_bytes
                );
                self.emit(self.kind.frame(tail)).await;
            }
        }
    }

    /// Flush the tail followed by the awaiting-input sentinel.
    async fn flush_prompt(&mut self) {
        if let Some(tail) = self.buffer.take_tail() {
            debug!("session {}: prompt detected: {:?}", self.session_id, tail);
            self.summary.prompts += 1;
            let sent = self.sink.send_pair(Frame::Stdout(tail), Frame::AwaitingInput).await;
            self.note_send(sent);
        }
    }

    /// Flush whatever is left once the stream ended.
    async fn finish(&mut self) {
        match self.kind {
            // Ended mid-prompt or killed while writing one
            StreamKind::Stdout => self.flush_prompt().await,
            StreamKind::Stderr => {
                if let Some(tail) = self.buffer.take_tail() {
                    self.emit(Frame::Stderr(tail)).await;
                }
            }
        }
    }

    /// Send a frame; once the peer is gone, keep draining and discard.
    async fn emit(&mut self, frame: Frame) {
        let sent = self.sink.send(frame).await;
        self.note_send(sent);
    }

    fn note_send(&mut self, sent: Result<(), ChannelError>) {
        if sent.is_err() && !self.sink_closed {
            self.sink_closed = true;
            debug!(
                "session {}: outbound closed, discarding further {} output",
                self.session_id, self.kind
            );
        }
    }
}
