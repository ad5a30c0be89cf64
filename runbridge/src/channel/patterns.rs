//! Prompt detection on unterminated output.
//!
//! Detection is a heuristic, not a protocol. A `?` in the middle of a
//! sentence is reported as a prompt, and a prompt without `:` or `?` is not.
//! Clients rely on the sentinel firing for exactly these trigger characters,
//! so they stay fixed.

use regex::Regex;

/// Trait for prompt detection - heuristic by default, swappable for a
/// stricter matcher.
pub trait PromptDetector: Send + Sync {
    /// Decide whether `tail` (text since the last newline) looks like the
    /// process is blocked waiting for input.
    fn is_awaiting_input(&self, tail: &str) -> bool;
}

/// The default detector.
///
/// A tail is a candidate when it ends with `": "` or contains `'?'`, and
/// never when it contains a newline.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicPrompt;

impl PromptDetector for HeuristicPrompt {
    fn is_awaiting_input(&self, tail: &str) -> bool {
        if tail.is_empty() || tail.contains('\n') {
            return false;
        }
        tail.ends_with(": ") || tail.contains('?')
    }
}

/// Regex-based detection for callers that know their program's prompts.
impl PromptDetector for Regex {
    fn is_awaiting_input(&self, tail: &str) -> bool {
        !tail.is_empty() && !tail.contains('\n') && self.is_match(tail)
    }
}

/// Compile a prompt pattern string into a regex.
///
/// Anchors to the end of the tail (allowing trailing whitespace) unless the
/// pattern already ends with `$`.
pub fn compile_prompt_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = if pattern.ends_with('$') {
        pattern.to_string()
    } else {
        format!("{}\\s*$", pattern)
    };

    Regex::new(&pattern)
}
