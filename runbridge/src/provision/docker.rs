//! Docker provisioner: stage into a running container and `docker exec` it.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info};
use tokio::process::Command;

use super::config::DockerConfig;
use super::{Launch, LaunchCommand, Provisioner, StagedResources, write_staged};
use crate::error::LaunchError;

/// Stages the source and a flush-on-print wrapper into a container.
///
/// Files are named per session, so concurrent sessions sharing one container
/// never overwrite each other's scripts. The interpreter started inside the
/// container outlives a killed `docker exec` client; releasing the staged
/// resources kills it by its per-session wrapper path.
#[derive(Debug, Clone)]
pub struct DockerProvisioner {
    config: DockerConfig,
}

impl DockerProvisioner {
    /// Create a new Docker provisioner.
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &DockerConfig {
        &self.config
    }

    fn remote_path(&self, name: &str) -> String {
        format!("{}/{}", self.config.remote_dir.trim_end_matches('/'), name)
    }

    /// Copy a host file into the container with `docker cp`.
    async fn copy_in(&self, what: &str, host: &Path, remote: &str) -> Result<(), LaunchError> {
        let output = Command::new(&self.config.docker_bin)
            .arg("cp")
            .arg(host)
            .arg(format!("{}:{}", self.config.container, remote))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| LaunchError::Copy {
                what: what.to_string(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LaunchError::Copy {
                what: what.to_string(),
                detail: if stderr.trim().is_empty() {
                    output.status.to_string()
                } else {
                    stderr.trim().to_string()
                },
            });
        }

        debug!("copied {} to {}:{}", host.display(), self.config.container, remote);
        Ok(())
    }

    async fn stage_into(
        &self,
        session_id: &str,
        source: &str,
        staged: &mut StagedResources,
    ) -> Result<LaunchCommand, LaunchError> {
        let host_script = self.config.host_dir.join(format!("python-{}.py", session_id));
        let host_wrapper = self
            .config
            .host_dir
            .join(format!("python-wrapper-{}.py", session_id));
        let remote_script = self.remote_path(&format!("script-{}.py", session_id));
        let remote_wrapper = self.remote_path(&format!("wrapper-{}.py", session_id));

        write_staged(&host_script, source, staged).await?;
        write_staged(&host_wrapper, &wrapper_source(&remote_script), staged).await?;

        self.copy_in("script", &host_script, &remote_script).await?;
        staged.track_remote(&self.config.docker_bin, &self.config.container, &remote_script);
        self.copy_in("wrapper", &host_wrapper, &remote_wrapper).await?;
        staged.track_remote(&self.config.docker_bin, &self.config.container, &remote_wrapper);
        staged.track_remote_process(
            &self.config.docker_bin,
            &self.config.container,
            &remote_wrapper,
        );

        Ok(LaunchCommand::new(&self.config.docker_bin)
            .args(["exec", "-i"])
            .arg(&self.config.container)
            .arg(&self.config.interpreter)
            .args(self.config.interpreter_args.iter().cloned())
            .arg(remote_wrapper))
    }
}

#[async_trait]
impl Provisioner for DockerProvisioner {
    async fn stage(&self, session_id: &str, source: &str) -> Result<Launch, LaunchError> {
        let mut staged = StagedResources::new();
        match self.stage_into(session_id, source, &mut staged).await {
            Ok(command) => {
                info!(
                    "session {}: staged into container {}",
                    session_id, self.config.container
                );
                Ok(Launch { command, staged })
            }
            Err(e) => {
                staged.release().await;
                Err(e)
            }
        }
    }
}

/// Python entry point that forces `print` to flush, then runs the script as
/// `__main__`.
fn wrapper_source(script_path: &str) -> String {
    let path = python_string_literal(script_path);
    format!(
        r#"import builtins

_print = builtins.print


def _flushing_print(*args, **kwargs):
    kwargs.setdefault("flush", True)
    _print(*args, **kwargs)


builtins.print = _flushing_print

with open({path}) as _f:
    _code = compile(_f.read(), {path}, "exec")

exec(_code, {{"__name__": "__main__", "__builtins__": builtins}})
"#
    )
}

fn python_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_runs_staged_script() {
        let wrapper = wrapper_source("/tmp/script-abc.py");
        assert!(wrapper.contains(r#"with open("/tmp/script-abc.py") as _f:"#));
        assert!(wrapper.contains(r#"kwargs.setdefault("flush", True)"#));
        assert!(wrapper.contains(r#"{"__name__": "__main__", "__builtins__": builtins}"#));
    }

    #[test]
    fn test_python_string_literal_escapes() {
        assert_eq!(python_string_literal(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn test_remote_path_joins() {
        let provisioner = DockerProvisioner::new(DockerConfig {
            remote_dir: "/sandbox/".into(),
            ..DockerConfig::default()
        });
        assert_eq!(provisioner.remote_path("x.py"), "/sandbox/x.py");
    }

    #[tokio::test]
    async fn test_copy_failure_cleans_host_files() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = DockerProvisioner::new(DockerConfig {
            docker_bin: "/nonexistent/docker".into(),
            host_dir: dir.path().to_path_buf(),
            ..DockerConfig::default()
        });

        let err = provisioner.stage("s1", "print(1)").await.unwrap_err();
        assert!(matches!(err, LaunchError::Copy { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_exec_command_shape() {
        // `true` accepts any arguments, standing in for a docker CLI
        let dir = tempfile::tempdir().unwrap();
        let provisioner = DockerProvisioner::new(DockerConfig {
            docker_bin: "true".into(),
            container: "runner".into(),
            host_dir: dir.path().to_path_buf(),
            ..DockerConfig::default()
        });

        let mut launch = provisioner.stage("s2", "print(1)").await.unwrap();
        assert_eq!(launch.command.program, "true");
        assert_eq!(
            launch.command.args,
            ["exec", "-i", "runner", "python3", "-u", "/tmp/wrapper-s2.py"]
        );
        assert_eq!(launch.staged.files().len(), 2);
        launch.staged.release().await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
