//! Execution environment provisioning.
//!
//! A provisioner takes submitted source text, makes it runnable somewhere
//! isolated, and hands back the command to launch plus the staged resources
//! to clean up afterwards. Isolation and the identity of the runtime are
//! entirely its concern.

pub mod config;
mod docker;
mod local;

pub use config::{DockerConfig, LocalConfig};
pub use docker::DockerProvisioner;
pub use local::LocalProvisioner;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;

use crate::error::LaunchError;

/// Stages source text into a launchable command.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Stage `source` for the session `session_id`.
    ///
    /// Resources created before a failure are released before the error is
    /// returned.
    async fn stage(&self, session_id: &str, source: &str) -> Result<Launch, LaunchError>;
}

/// A staged program, ready to start.
#[derive(Debug)]
pub struct Launch {
    /// The command to run.
    pub command: LaunchCommand,

    /// What to release once the session ends.
    pub staged: StagedResources,
}

/// A command line to spawn with piped stdin, stdout and stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Program to execute.
    pub program: String,

    /// Arguments, in order.
    pub args: Vec<String>,

    /// Extra environment variables.
    pub env: Vec<(String, String)>,

    /// Working directory, if not inherited.
    pub current_dir: Option<PathBuf>,
}

impl LaunchCommand {
    /// Create a command with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Build the process command with all three streams piped.
    ///
    /// The child is killed if its handle is dropped. On unix it leads a new
    /// process group, so it can be killed together with its descendants.
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// What a session left inside a container.
///
/// Killing the local `docker exec` client does not stop the process it
/// started, so that is killed by command line with `pkill` before the files
/// are removed with `rm`.
#[derive(Debug, Clone)]
struct RemoteFiles {
    docker_bin: String,
    container: String,
    paths: Vec<String>,
    processes: Vec<String>,
}

impl RemoteFiles {
    async fn exec(&self, args: &[&str], extra: &[String]) -> std::io::Result<std::process::Output> {
        Command::new(&self.docker_bin)
            .arg("exec")
            .arg(&self.container)
            .args(args)
            .args(extra)
            .stdin(Stdio::null())
            .output()
            .await
    }

    async fn kill_processes(&self) {
        for pattern in &self.processes {
            match self.exec(&["pkill", "-KILL", "-f"], std::slice::from_ref(pattern)).await {
                // pkill exits 1 when nothing matched
                Ok(output) if matches!(output.status.code(), Some(0) | Some(1)) => {
                    debug!("killed leftover {} in {}", pattern, self.container)
                }
                Ok(output) => warn!(
                    "failed to kill {} in {}: {}",
                    pattern,
                    self.container,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(e) => warn!("failed to run {}: {}", self.docker_bin, e),
            }
        }
    }

    async fn remove_files(&self) {
        if self.paths.is_empty() {
            return;
        }
        match self.exec(&["rm", "-f"], &self.paths).await {
            Ok(output) if output.status.success() => {
                debug!("removed {} staged files from {}", self.paths.len(), self.container)
            }
            Ok(output) => warn!(
                "failed to remove staged files from {}: {}",
                self.container,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("failed to run {}: {}", self.docker_bin, e),
        }
    }
}

/// Resources a provisioner created for one session.
///
/// [`release`](Self::release) removes them once. Host files still present
/// when the value is dropped are removed synchronously.
#[derive(Debug, Default)]
pub struct StagedResources {
    files: Vec<PathBuf>,
    remote: Option<RemoteFiles>,
    released: bool,
}

impl StagedResources {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a host file.
    pub fn track_file(&mut self, path: impl Into<PathBuf>) {
        self.files.push(path.into());
    }

    /// Track a file copied into `container`.
    pub fn track_remote(
        &mut self,
        docker_bin: impl Into<String>,
        container: impl Into<String>,
        path: impl Into<String>,
    ) {
        self.remote_mut(docker_bin, container).paths.push(path.into());
    }

    /// Track a process in `container` to kill on release, by command line.
    pub fn track_remote_process(
        &mut self,
        docker_bin: impl Into<String>,
        container: impl Into<String>,
        pattern: impl Into<String>,
    ) {
        self.remote_mut(docker_bin, container)
            .processes
            .push(pattern.into());
    }

    fn remote_mut(
        &mut self,
        docker_bin: impl Into<String>,
        container: impl Into<String>,
    ) -> &mut RemoteFiles {
        self.remote.get_or_insert_with(|| RemoteFiles {
            docker_bin: docker_bin.into(),
            container: container.into(),
            paths: Vec::new(),
            processes: Vec::new(),
        })
    }

    /// Host files being tracked.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Check if the resources were already released.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Remove everything tracked.
    ///
    /// Returns `false` without doing anything if already released.
    pub async fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        for path in self.files.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("removed staged file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove staged file {}: {}", path.display(), e),
            }
        }

        if let Some(remote) = self.remote.take() {
            remote.kill_processes().await;
            remote.remove_files().await;
        }

        true
    }
}

impl Drop for StagedResources {
    fn drop(&mut self) {
        for path in &self.files {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove staged file {}: {}", path.display(), e);
                }
            }
        }
        if let Some(ref remote) = self.remote {
            warn!(
                "{} staged files left in {} (dropped before release)",
                remote.paths.len(),
                remote.container
            );
        }
    }
}

/// Write a staged file and track it.
pub(crate) async fn write_staged(
    path: &Path,
    contents: &str,
    staged: &mut StagedResources,
) -> Result<(), LaunchError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| LaunchError::Stage {
            path: path.to_path_buf(),
            source,
        })?;
    staged.track_file(path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_command_display() {
        let cmd = LaunchCommand::new("python3")
            .arg("-u")
            .args(["a.py", "b"])
            .env("PYTHONIOENCODING", "utf-8");
        assert_eq!(cmd.to_string(), "python3 -u a.py b");
        assert_eq!(cmd.env, [("PYTHONIOENCODING".to_string(), "utf-8".to_string())]);
    }

    #[tokio::test]
    async fn test_release_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.py");
        let mut staged = StagedResources::new();
        write_staged(&path, "print(1)", &mut staged).await.unwrap();
        assert!(path.exists());

        assert!(staged.release().await);
        assert!(!path.exists());
        assert!(staged.is_released());
        assert!(!staged.release().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_release_kills_remote_process_first() {
        use std::os::unix::fs::PermissionsExt;

        // A script standing in for the docker CLI records each call
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        let docker = dir.path().join("docker");
        std::fs::write(&docker, format!("#!/bin/sh\necho \"$*\" >> {}\n", log.display()))
            .unwrap();
        std::fs::set_permissions(&docker, std::fs::Permissions::from_mode(0o755)).unwrap();

        let docker_bin = docker.to_string_lossy().into_owned();
        let mut staged = StagedResources::new();
        staged.track_remote(&docker_bin, "runner", "/tmp/wrapper-s1.py");
        staged.track_remote_process(&docker_bin, "runner", "/tmp/wrapper-s1.py");
        assert!(staged.release().await);

        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(
            calls.lines().collect::<Vec<_>>(),
            [
                "exec runner pkill -KILL -f /tmp/wrapper-s1.py",
                "exec runner rm -f /tmp/wrapper-s1.py",
            ]
        );
    }

    #[tokio::test]
    async fn test_drop_removes_unreleased_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leftover.py");
        {
            let mut staged = StagedResources::new();
            write_staged(&path, "", &mut staged).await.unwrap();
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stage_error_names_path() {
        let mut staged = StagedResources::new();
        let err = write_staged(Path::new("/nonexistent-dir/x.py"), "", &mut staged)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent-dir/x.py"));
        assert!(staged.files().is_empty());
    }
}
