//! Line buffer that separates completed lines from the unterminated tail.
//!
//! Output arrives in arbitrary chunks. Completed lines are handed out as soon
//! as their newline arrives; whatever follows the last newline stays pending
//! so the prompt detector can look at it.

use std::borrow::Cow;

use bytes::BytesMut;

/// Buffer for accumulating raw output from one stream.
#[derive(Debug)]
pub struct LineBuffer {
    /// Raw bytes not yet handed out.
    buffer: BytesMut,

    /// Prefix of `buffer` already known to contain no newline.
    scanned: usize,

    /// Pending bytes at which the tail is considered overfull.
    max_pending: usize,
}

impl LineBuffer {
    /// Create a new line buffer.
    ///
    /// # Arguments
    ///
    /// * `max_pending` - Size at which an unterminated tail should be flushed
    ///   regardless of content.
    pub fn new(max_pending: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scanned: 0,
            max_pending,
        }
    }

    /// Append raw output.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next completed line with its `\n` or `\r\n` stripped.
    pub fn next_line(&mut self) -> Option<String> {
        match memchr::memchr(b'\n', &self.buffer[self.scanned..]) {
            Some(offset) => {
                let end = self.scanned + offset;
                let raw = self.buffer.split_to(end + 1);
                self.scanned = 0;

                let mut line = &raw[..end];
                if let [rest @ .., b'\r'] = line {
                    line = rest;
                }
                Some(String::from_utf8_lossy(line).into_owned())
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    /// The pending bytes as a string (lossy UTF-8 conversion).
    ///
    /// Once `next_line` has returned `None` this is exactly the text since the
    /// last newline.
    pub fn tail(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    /// Take the pending bytes and reset, or `None` if nothing is pending.
    pub fn take_tail(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = self.buffer.split();
        self.scanned = 0;
        Some(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Take the pending bytes up to the last complete UTF-8 character.
    ///
    /// A multi-byte character cut off at the end stays pending until its
    /// remaining bytes arrive.
    pub fn take_complete(&mut self) -> Option<String> {
        let end = self.buffer.len() - incomplete_suffix(&self.buffer);
        if end == 0 {
            return None;
        }
        let raw = self.buffer.split_to(end);
        self.scanned = self.buffer.len();
        Some(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Whether the pending bytes reached `max_pending`.
    pub fn is_overfull(&self) -> bool {
        self.buffer.len() >= self.max_pending
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Length of a truncated UTF-8 sequence at the end of `bytes`, if any.
fn incomplete_suffix(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let width = match bytes[i] {
            0x80..=0xBF => continue,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if i + width > bytes.len() {
            bytes.len() - i
        } else {
            0
        };
    }
    0
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}
