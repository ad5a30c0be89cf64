//! Bridge configuration.

use std::time::Duration;

/// Per-session limits and tuning.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Wall-clock budget for the program; exceeding it forces termination.
    pub timeout: Duration,

    /// How long a prompt candidate must sit unchanged before it is reported.
    pub quiescence: Duration,

    /// How long drain and relay tasks get to finish once the process is gone.
    pub drain_grace: Duration,

    /// How long to wait for the process to exit after a kill.
    pub kill_grace: Duration,

    /// Size of each read from an output stream.
    pub read_chunk_size: usize,

    /// Unterminated output at which the tail is flushed without a newline.
    pub max_pending_bytes: usize,

    /// Frames buffered between producers and the socket writer.
    pub outbound_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            quiescence: Duration::from_millis(50),
            drain_grace: Duration::from_secs(5),
            kill_grace: Duration::from_secs(5),
            read_chunk_size: 4096,
            max_pending_bytes: 64 * 1024,
            outbound_capacity: 256,
        }
    }
}
