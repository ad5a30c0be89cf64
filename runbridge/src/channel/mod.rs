//! Channel layer for subprocess output.
//!
//! This module turns raw output streams into line frames, including
//! partial-line prompt detection.

mod buffer;
mod drain;
mod patterns;

pub use buffer::LineBuffer;
pub use drain::{DrainConfig, DrainSummary, StreamDrain, StreamKind};
pub use patterns::{HeuristicPrompt, PromptDetector, compile_prompt_pattern};
