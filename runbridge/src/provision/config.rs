//! Provisioner configuration.

use std::path::PathBuf;

/// Configuration for running code inside an existing Docker container.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Docker CLI to invoke.
    pub docker_bin: String,

    /// Name of the running container to execute in.
    pub container: String,

    /// Interpreter inside the container.
    pub interpreter: String,

    /// Interpreter arguments placed before the script path.
    pub interpreter_args: Vec<String>,

    /// Directory inside the container receiving staged files.
    pub remote_dir: String,

    /// Host directory for temporary files before they are copied in.
    pub host_dir: PathBuf,
}

impl DockerConfig {
    /// Configuration for `container` with the default Python runtime.
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            ..Self::default()
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            container: "online_compiler-python-runner-1".to_string(),
            interpreter: "python3".to_string(),
            interpreter_args: vec!["-u".to_string()],
            remote_dir: "/tmp".to_string(),
            host_dir: std::env::temp_dir(),
        }
    }
}

/// Configuration for running code directly on the host.
///
/// No isolation is applied; intended for development and tests.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Interpreter to invoke.
    pub interpreter: String,

    /// Interpreter arguments placed before the script path.
    pub args: Vec<String>,

    /// Directory receiving staged scripts.
    pub staging_dir: PathBuf,

    /// Extension given to staged scripts.
    pub extension: String,
}

impl LocalConfig {
    /// Configuration for `interpreter` with no extra arguments.
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            args: Vec::new(),
            staging_dir: std::env::temp_dir(),
            extension: "py".to_string(),
        }
    }

    /// Set the interpreter arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the staging directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Set the script extension (without the dot).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self::new("python3").with_args(["-u"])
    }
}
