//! How a session ended.

use std::fmt;
use std::time::Duration;

/// Terminal result of a session, sent to the peer as the final frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The program exited with a success status.
    Completed,

    /// The program exited with a failure status (not a system fault).
    ProcessFailed(String),

    /// The deadline elapsed and the program was killed.
    TimedOut(Duration),

    /// The peer disconnected and the program was killed.
    Disconnected,

    /// Staging or starting the program failed; nothing ran.
    LaunchFailed(String),
}

impl Outcome {
    /// Check if the program ran and finished successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if the program was forcibly stopped.
    pub fn was_forced(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::Disconnected)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("EXECUTION_COMPLETE"),
            Self::ProcessFailed(status) => write!(f, "Execution finished with error: {}", status),
            Self::TimedOut(after) => write!(f, "Error: execution timed out after {:?}", after),
            Self::Disconnected => f.write_str("Error: client disconnected"),
            Self::LaunchFailed(reason) => write!(f, "Error: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_text() {
        assert_eq!(Outcome::Completed.to_string(), "EXECUTION_COMPLETE");
        assert_eq!(
            Outcome::ProcessFailed("exit status: 1".into()).to_string(),
            "Execution finished with error: exit status: 1"
        );
        assert_eq!(
            Outcome::TimedOut(Duration::from_secs(30)).to_string(),
            "Error: execution timed out after 30s"
        );
        assert!(Outcome::LaunchFailed("no such container".into())
            .to_string()
            .starts_with("Error: "));
    }

    #[test]
    fn test_timeout_distinct_from_completion() {
        let timed_out = Outcome::TimedOut(Duration::from_millis(300));
        assert!(!timed_out.is_success());
        assert!(timed_out.was_forced());
        assert_ne!(timed_out.to_string(), Outcome::Completed.to_string());
    }
}
