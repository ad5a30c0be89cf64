//! Builder for creating bridges.

use std::sync::Arc;
use std::time::Duration;

use super::Bridge;
use super::config::BridgeConfig;
use crate::channel::{HeuristicPrompt, PromptDetector, compile_prompt_pattern};
use crate::error::{ConfigError, Result};
use crate::provision::Provisioner;

/// Builder for constructing a [`Bridge`].
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use runbridge::bridge::BridgeBuilder;
/// use runbridge::provision::{DockerConfig, DockerProvisioner};
///
/// # fn example() -> Result<(), runbridge::Error> {
/// let bridge = BridgeBuilder::new(DockerProvisioner::new(DockerConfig::default()))
///     .timeout(Duration::from_secs(10))
///     .prompt_pattern(r">>> ")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct BridgeBuilder {
    provisioner: Arc<dyn Provisioner>,
    config: BridgeConfig,
    detector: Option<Arc<dyn PromptDetector>>,
    prompt_pattern: Option<String>,
}

impl BridgeBuilder {
    /// Create a builder running programs through `provisioner`.
    pub fn new(provisioner: impl Provisioner + 'static) -> Self {
        Self::with_provisioner(Arc::new(provisioner))
    }

    /// Create a builder from a shared provisioner.
    pub fn with_provisioner(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            config: BridgeConfig::default(),
            detector: None,
            prompt_pattern: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the wall-clock budget per program (default: 30s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the prompt quiescence window (default: 50ms).
    pub fn quiescence(mut self, quiescence: Duration) -> Self {
        self.config.quiescence = quiescence;
        self
    }

    /// Set how long output may keep draining after the program is gone.
    pub fn drain_grace(mut self, grace: Duration) -> Self {
        self.config.drain_grace = grace;
        self
    }

    /// Set how long to wait for a killed program to exit.
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.config.kill_grace = grace;
        self
    }

    /// Set the read size for output streams.
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    /// Set the unterminated output limit.
    pub fn max_pending_bytes(mut self, limit: usize) -> Self {
        self.config.max_pending_bytes = limit;
        self
    }

    /// Set the outbound frame queue size.
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    /// Use a custom prompt detector.
    pub fn detector(mut self, detector: impl PromptDetector + 'static) -> Self {
        self.detector = Some(Arc::new(detector));
        self.prompt_pattern = None;
        self
    }

    /// Detect prompts with a regex matched against the output tail.
    pub fn prompt_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.prompt_pattern = Some(pattern.into());
        self.detector = None;
        self
    }

    /// Build the bridge.
    pub fn build(self) -> Result<Bridge> {
        validate(&self.config)?;

        let detector: Arc<dyn PromptDetector> = match (self.detector, self.prompt_pattern) {
            (Some(detector), _) => detector,
            (None, Some(pattern)) => {
                let regex = compile_prompt_pattern(&pattern).map_err(|e| ConfigError::Invalid {
                    message: format!("bad prompt pattern {:?}: {}", pattern, e),
                })?;
                Arc::new(regex)
            }
            (None, None) => Arc::new(HeuristicPrompt),
        };

        Ok(Bridge {
            config: self.config,
            provisioner: self.provisioner,
            detector,
        })
    }
}

fn validate(config: &BridgeConfig) -> std::result::Result<(), ConfigError> {
    let durations = [
        ("timeout", config.timeout),
        ("quiescence", config.quiescence),
        ("drain_grace", config.drain_grace),
        ("kill_grace", config.kill_grace),
    ];
    for (name, value) in durations {
        if value.is_zero() {
            return Err(ConfigError::Invalid {
                message: format!("{} must be non-zero", name),
            });
        }
    }

    let sizes = [
        ("read_chunk_size", config.read_chunk_size),
        ("max_pending_bytes", config.max_pending_bytes),
        ("outbound_capacity", config.outbound_capacity),
    ];
    for (name, value) in sizes {
        if value == 0 {
            return Err(ConfigError::Invalid {
                message: format!("{} must be non-zero", name),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::provision::{LocalConfig, LocalProvisioner};

    fn builder() -> BridgeBuilder {
        BridgeBuilder::new(LocalProvisioner::new(LocalConfig::default()))
    }

    #[test]
    fn test_defaults() {
        let bridge = builder().build().unwrap();
        assert_eq!(bridge.config().timeout, Duration::from_secs(30));
        assert_eq!(bridge.config().quiescence, Duration::from_millis(50));
        assert!(bridge.detector.is_awaiting_input("Name: "));
    }

    #[test]
    fn test_rejects_zero_values() {
        let err = builder().timeout(Duration::ZERO).build().err().unwrap();
        assert!(matches!(err, Error::Config(ConfigError::Invalid { .. })));
        assert!(err.to_string().contains("timeout"));

        let err = builder().outbound_capacity(0).build().err().unwrap();
        assert!(err.to_string().contains("outbound_capacity"));
    }

    #[test]
    fn test_prompt_pattern() {
        let bridge = builder().prompt_pattern(r">>> ").build().unwrap();
        assert!(bridge.detector.is_awaiting_input(">>> "));
        assert!(!bridge.detector.is_awaiting_input("Name: "));

        let err = builder().prompt_pattern("(").build().err().unwrap();
        assert!(err.to_string().contains("bad prompt pattern"));
    }
}
