//! Session orchestration.
//!
//! A [`Bridge`] runs one submitted program per call, streaming its output
//! into a [`FrameSink`] and feeding it lines from an [`InboundStream`]. Each
//! call gets its own [`Session`]; bridges are cheap to clone and share.

mod builder;
pub mod config;
mod controller;
mod outcome;
mod relay;
mod sink;

pub use builder::BridgeBuilder;
pub use config::BridgeConfig;
pub use controller::{Session, SessionState};
pub use outcome::Outcome;
pub use relay::{InboundStream, InputHandle, InputRelay, RelayExit, inbound_channel};
pub use sink::{AWAITING_INPUT, Frame, FrameOrigin, FrameSink, STDERR_PREFIX};

use std::sync::Arc;

use crate::channel::PromptDetector;
use crate::provision::Provisioner;

/// Runs submitted programs and bridges their standard streams.
#[derive(Clone)]
pub struct Bridge {
    config: BridgeConfig,
    provisioner: Arc<dyn Provisioner>,
    detector: Arc<dyn PromptDetector>,
}

impl Bridge {
    /// Start building a bridge around `provisioner`.
    pub fn builder(provisioner: impl Provisioner + 'static) -> BridgeBuilder {
        BridgeBuilder::new(provisioner)
    }

    /// Get the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Create a session writing to `sink`, without starting it.
    pub fn session(&self, sink: FrameSink) -> Session {
        Session::new(self.config.clone(), self.detector.clone(), sink)
    }

    /// Run `source` to completion.
    ///
    /// Every frame goes to `sink`; the last one is always
    /// [`Frame::Terminal`] carrying the returned outcome. Returns once the
    /// program is gone, its output drained and its staged files released.
    pub async fn run(&self, source: &str, inbound: InboundStream, sink: FrameSink) -> Outcome {
        let session = self.session(sink);
        session.run(self.provisioner.as_ref(), source, inbound).await
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge").field("config", &self.config).finish_non_exhaustive()
    }
}
