//! Host-local provisioner.

use async_trait::async_trait;
use log::debug;

use super::config::LocalConfig;
use super::{Launch, LaunchCommand, Provisioner, StagedResources, write_staged};
use crate::error::LaunchError;

/// Writes the source into a staging directory and runs it with a local
/// interpreter.
#[derive(Debug, Clone)]
pub struct LocalProvisioner {
    config: LocalConfig,
}

impl LocalProvisioner {
    /// Create a new local provisioner.
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &LocalConfig {
        &self.config
    }
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn stage(&self, session_id: &str, source: &str) -> Result<Launch, LaunchError> {
        let path = self
            .config
            .staging_dir
            .join(format!("run-{}.{}", session_id, self.config.extension));

        let mut staged = StagedResources::new();
        write_staged(&path, source, &mut staged).await?;
        debug!("session {}: staged {}", session_id, path.display());

        let command = LaunchCommand::new(&self.config.interpreter)
            .args(self.config.args.iter().cloned())
            .arg(path.to_string_lossy());

        Ok(Launch { command, staged })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stage_writes_script() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = LocalProvisioner::new(
            LocalConfig::new("sh")
                .with_staging_dir(dir.path())
                .with_extension("sh"),
        );

        let mut launch = provisioner.stage("abc", "echo hi\n").await.unwrap();
        let script = dir.path().join("run-abc.sh");
        assert_eq!(std::fs::read_to_string(&script).unwrap(), "echo hi\n");
        assert_eq!(launch.command.program, "sh");
        assert_eq!(launch.command.args, [script.to_string_lossy().into_owned()]);
        assert_eq!(launch.staged.files(), [script.clone()]);

        launch.staged.release().await;
        assert!(!script.exists());
    }

    #[tokio::test]
    async fn test_default_runs_unbuffered_python() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner =
            LocalProvisioner::new(LocalConfig::default().with_staging_dir(dir.path()));
        let launch = provisioner.stage("s1", "print('x')").await.unwrap();
        assert_eq!(launch.command.program, "python3");
        assert_eq!(launch.command.args[0], "-u");
        assert!(launch.command.args[1].ends_with("run-s1.py"));
    }
}
