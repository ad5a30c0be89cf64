//! runbridge server.
//!
//! Run with:
//!   cargo run -- --provisioner local --interpreter python3
//!
//! Then connect a WebSocket client to ws://localhost:7711/run, send the
//! program source as the first message and input lines after that.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::info;
use runbridge::bridge::Bridge;
use runbridge::gateway::{self, AppState};
use runbridge::provision::{DockerConfig, DockerProvisioner, LocalConfig, LocalProvisioner};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProvisionerKind {
    /// `docker exec` into a running container
    Docker,
    /// Run directly on this host (no isolation)
    Local,
}

#[derive(Debug, Parser)]
#[command(version, about = "Bridge WebSocket sessions to interactive programs")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:7711", env = "RUNBRIDGE_BIND")]
    bind: SocketAddr,

    /// WebSocket route
    #[arg(long, default_value = "/run", env = "RUNBRIDGE_ROUTE")]
    route: String,

    /// Where submitted programs run
    #[arg(long, value_enum, default_value = "docker", env = "RUNBRIDGE_PROVISIONER")]
    provisioner: ProvisionerKind,

    /// Container to execute in (docker provisioner)
    #[arg(long, default_value = "online_compiler-python-runner-1", env = "RUNBRIDGE_CONTAINER")]
    container: String,

    /// Docker CLI binary
    #[arg(long, default_value = "docker")]
    docker_bin: String,

    /// Interpreter for submitted source
    #[arg(long, default_value = "python3", env = "RUNBRIDGE_INTERPRETER")]
    interpreter: String,

    /// Interpreter argument placed before the script (repeatable)
    #[arg(long = "interpreter-arg", default_value = "-u", allow_hyphen_values = true)]
    interpreter_args: Vec<String>,

    /// Host directory for staged files
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Execution budget per program, in seconds
    #[arg(long, default_value_t = 30, env = "RUNBRIDGE_TIMEOUT_SECS")]
    timeout_secs: u64,

    /// Prompt quiescence window, in milliseconds
    #[arg(long, default_value_t = 50)]
    quiescence_ms: u64,

    /// Regex for prompts, replacing the built-in heuristic
    #[arg(long)]
    prompt_pattern: Option<String>,
}

fn build_bridge(args: &Args) -> Result<Bridge, runbridge::Error> {
    let builder = match args.provisioner {
        ProvisionerKind::Docker => {
            let mut config = DockerConfig::new(&args.container);
            config.docker_bin = args.docker_bin.clone();
            config.interpreter = args.interpreter.clone();
            config.interpreter_args = args.interpreter_args.clone();
            if let Some(ref dir) = args.staging_dir {
                config.host_dir = dir.clone();
            }
            Bridge::builder(DockerProvisioner::new(config))
        }
        ProvisionerKind::Local => {
            let mut config = LocalConfig::new(&args.interpreter)
                .with_args(args.interpreter_args.iter().cloned());
            if let Some(ref dir) = args.staging_dir {
                config = config.with_staging_dir(dir);
            }
            Bridge::builder(LocalProvisioner::new(config))
        }
    };

    let builder = builder
        .timeout(Duration::from_secs(args.timeout_secs))
        .quiescence(Duration::from_millis(args.quiescence_ms));
    let builder = match args.prompt_pattern {
        Some(ref pattern) => builder.prompt_pattern(pattern),
        None => builder,
    };
    builder.build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bridge = build_bridge(&args)?;
    info!(
        "runbridge: {:?} provisioner, timeout {:?}",
        args.provisioner,
        bridge.config().timeout
    );

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    gateway::serve(listener, AppState::new(bridge, args.route)).await?;

    Ok(())
}
