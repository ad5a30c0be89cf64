//! Error types for runbridge.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::channel::StreamKind;

/// Main error type for runbridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Staging or starting the subprocess failed
    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    /// Subprocess stream errors
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Peer channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Bridge configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised before the subprocess is running.
///
/// These are the only errors fatal to a session before any I/O begins.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// Failed to write a staged file
    #[error("failed to write {}: {source}", path.display())]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to copy a staged file into the execution environment
    #[error("failed to copy {what} into the execution environment: {detail}")]
    Copy { what: String, detail: String },

    /// Failed to start the command
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The child was started without one of its piped streams
    #[error("subprocess {0} was not captured")]
    MissingPipe(&'static str),
}

/// Errors on the subprocess's stdin/stdout/stderr after start.
///
/// Logged and treated as the end of that stream; never aborts sibling streams.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Reading an output stream failed
    #[error("read from {stream} failed: {source}")]
    Read {
        stream: StreamKind,
        #[source]
        source: io::Error,
    },

    /// Writing to stdin failed
    #[error("write to stdin failed: {source}")]
    Write {
        #[source]
        source: io::Error,
    },

    /// Input arrived after stdin was closed
    #[error("stdin already closed")]
    InputClosed,
}

/// Errors on the peer's message channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The peer went away
    #[error("peer disconnected")]
    Disconnected,

    /// Receiving from the peer failed
    #[error("receive failed: {0}")]
    Receive(String),

    /// The outbound sink has no reader left
    #[error("outbound channel closed")]
    Closed,
}

/// Invalid bridge configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A setting is out of range
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Result type alias using runbridge's Error.
pub type Result<T> = std::result::Result<T, Error>;
