//! # runbridge
//!
//! Bridges a bidirectional message channel (a WebSocket) to the standard
//! streams of a program running in an isolated environment.
//!
//! Output is relayed line by line as it is produced. Unterminated output that
//! looks like a prompt is flushed after a short quiet period and followed by a
//! `WAITING_FOR_INPUT` sentinel, so a remote user can interact with programs
//! that block on `input()` without a trailing newline.
//!
//! ## Features
//!
//! - One session per connection, with a wall-clock deadline and forced kill
//! - Partial-line prompt detection (heuristic or regex)
//! - Pluggable provisioning (Docker container or local host)
//! - Guaranteed single terminal frame and idempotent cleanup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use runbridge::bridge::{Bridge, FrameSink, inbound_channel};
//! use runbridge::provision::{LocalConfig, LocalProvisioner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), runbridge::Error> {
//!     let bridge = Bridge::builder(LocalProvisioner::new(LocalConfig::default())).build()?;
//!
//!     let (sink, mut frames) = FrameSink::channel(64);
//!     let (input, inbound) = inbound_channel(8);
//!     let source = "name = input('Name: ')\nprint('hi', name)";
//!     let run = tokio::spawn({
//!         let bridge = bridge.clone();
//!         async move { bridge.run(source, inbound, sink).await }
//!     });
//!
//!     while let Some(frame) = frames.recv().await {
//!         println!("{}", frame);
//!         if frame.to_string() == "WAITING_FOR_INPUT" {
//!             let _ = input.send("Ada".to_string()).await;
//!         }
//!     }
//!     let _ = run.await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod channel;
pub mod error;
pub mod gateway;
pub mod provision;

// Re-export main types for convenience
pub use bridge::{Bridge, BridgeBuilder, BridgeConfig, Frame, FrameSink, Outcome};
pub use error::Error;
pub use provision::{DockerProvisioner, LocalProvisioner, Provisioner};
