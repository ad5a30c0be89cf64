//! Session controller: owns the subprocess and drives one session from
//! provisioning to teardown.

use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};
#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::config::BridgeConfig;
use super::outcome::Outcome;
use super::relay::{InboundStream, InputHandle, InputRelay};
use super::sink::{Frame, FrameSink};
use crate::channel::{DrainConfig, PromptDetector, StreamDrain, StreamKind};
use crate::error::LaunchError;
use crate::provision::{Launch, Provisioner, StagedResources};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Staging the source and starting the program.
    Provisioning,
    /// Program running; drain and relay tasks active; deadline armed.
    Running,
    /// Program gone; waiting for output to be flushed.
    Draining,
    /// Terminal frame sent and resources released.
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// A started child with its three pipes taken out.
struct Spawned {
    child: Child,
    input: InputHandle,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

/// What ended the running state.
enum Exit {
    Natural(std::io::Result<std::process::ExitStatus>),
    Deadline,
    KillRequested,
}

/// One bridged lifetime, from connection accept to full teardown.
pub struct Session {
    id: String,
    config: BridgeConfig,
    detector: Arc<dyn PromptDetector>,
    sink: FrameSink,
    state: SessionState,
    input: Option<InputHandle>,
    staged: Option<StagedResources>,
    /// Process group led by the child, once spawned.
    process_group: Option<u32>,
    /// One-shot signal telling the relay to stop.
    done: CancellationToken,
    /// Raised by the relay when the peer disconnects.
    kill: CancellationToken,
    terminal_sent: bool,
    torn_down: bool,
}

impl Session {
    /// Create a session writing frames to `sink`.
    pub fn new(config: BridgeConfig, detector: Arc<dyn PromptDetector>, sink: FrameSink) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            detector,
            sink,
            state: SessionState::Provisioning,
            input: None,
            staged: None,
            process_group: None,
            done: CancellationToken::new(),
            kill: CancellationToken::new(),
            terminal_sent: false,
            torn_down: false,
        }
    }

    /// The session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A handle on the done signal. Already cancelled once the program is gone.
    pub fn done_signal(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Run the session to completion.
    ///
    /// Always sends exactly one terminal frame and releases staged resources,
    /// whichever way the session ends.
    pub async fn run(
        mut self,
        provisioner: &dyn Provisioner,
        source: &str,
        inbound: InboundStream,
    ) -> Outcome {
        let outcome = match self.launch(provisioner, source).await {
            Ok(spawned) => self.supervise(spawned, inbound).await,
            Err(e) => {
                error!("session {}: launch failed: {}", self.id, e);
                Outcome::LaunchFailed(e.to_string())
            }
        };

        self.terminate(&outcome).await;
        info!("session {}: finished: {}", self.id, outcome);
        outcome
    }

    fn transition(&mut self, next: SessionState) {
        debug!("session {}: {} -> {}", self.id, self.state, next);
        self.state = next;
    }

    async fn launch(
        &mut self,
        provisioner: &dyn Provisioner,
        source: &str,
    ) -> Result<Spawned, LaunchError> {
        self.transition(SessionState::Provisioning);

        let Launch { command, staged } = provisioner.stage(&self.id, source).await?;
        self.staged = Some(staged);

        info!("session {}: launching {}", self.id, command);
        let mut child = command
            .to_command()
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: command.program.clone(),
                source,
            })?;
        self.process_group = child.id();

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        match pipes {
            (Some(stdin), Some(stdout), Some(stderr)) => Ok(Spawned {
                child,
                input: InputHandle::new(stdin),
                stdout,
                stderr,
            }),
            (stdin, stdout, _) => {
                if let Err(e) = child.kill().await {
                    warn!("session {}: failed to kill half-started child: {}", self.id, e);
                }
                let missing = if stdin.is_none() {
                    "stdin"
                } else if stdout.is_none() {
                    "stdout"
                } else {
                    "stderr"
                };
                Err(LaunchError::MissingPipe(missing))
            }
        }
    }

    /// Run the program until it exits or is killed, then drain its output.
    async fn supervise(&mut self, spawned: Spawned, inbound: InboundStream) -> Outcome {
        let Spawned {
            mut child,
            input,
            stdout,
            stderr,
        } = spawned;
        self.input = Some(input.clone());

        let drain_config = DrainConfig::from(&self.config);
        let stdout_task = tokio::spawn(
            StreamDrain::new(
                &self.id,
                StreamKind::Stdout,
                stdout,
                self.sink.clone(),
                self.detector.clone(),
                drain_config.clone(),
            )
            .run(),
        );
        let stderr_task = tokio::spawn(
            StreamDrain::new(
                &self.id,
                StreamKind::Stderr,
                stderr,
                self.sink.clone(),
                self.detector.clone(),
                drain_config,
            )
            .run(),
        );
        let relay_task = tokio::spawn(
            InputRelay::new(
                &self.id,
                inbound,
                input.clone(),
                self.done.clone(),
                self.kill.clone(),
            )
            .run(),
        );

        self.transition(SessionState::Running);
        let deadline = Instant::now() + self.config.timeout;

        // A natural exit observed first always wins
        let exit = tokio::select! {
            biased;
            status = child.wait() => Exit::Natural(status),
            () = tokio::time::sleep_until(deadline) => Exit::Deadline,
            () = self.kill.cancelled() => Exit::KillRequested,
        };

        // Forced outcomes win over the killed process's exit status
        let outcome = match exit {
            Exit::Natural(Ok(status)) if status.success() => Outcome::Completed,
            Exit::Natural(Ok(status)) => Outcome::ProcessFailed(status.to_string()),
            Exit::Natural(Err(e)) => {
                error!("session {}: waiting for process failed: {}", self.id, e);
                Outcome::ProcessFailed(e.to_string())
            }
            Exit::Deadline => {
                warn!(
                    "session {}: deadline of {:?} elapsed, killing",
                    self.id, self.config.timeout
                );
                self.force_kill(&mut child).await;
                Outcome::TimedOut(self.config.timeout)
            }
            Exit::KillRequested => {
                info!("session {}: kill requested by relay", self.id);
                self.force_kill(&mut child).await;
                Outcome::Disconnected
            }
        };

        self.done.cancel();
        self.transition(SessionState::Draining);
        self.close_input(&input).await;

        let grace = Instant::now() + self.config.drain_grace;
        join_bounded(&self.id, "relay", relay_task, grace).await;
        let stdout = join_bounded(&self.id, "stdout drain", stdout_task, grace).await;
        let stderr = join_bounded(&self.id, "stderr drain", stderr_task, grace).await;
        debug!("session {}: drained {:?} {:?}", self.id, stdout, stderr);

        outcome
    }

    async fn force_kill(&self, child: &mut Child) {
        self.kill_process_group();
        if let Err(e) = child.start_kill() {
            warn!("session {}: kill failed: {}", self.id, e);
        }
        match tokio::time::timeout(self.config.kill_grace, child.wait()).await {
            Ok(Ok(status)) => debug!("session {}: killed ({})", self.id, status),
            Ok(Err(e)) => warn!("session {}: waiting after kill failed: {}", self.id, e),
            Err(_) => error!(
                "session {}: process still alive {:?} after kill",
                self.id, self.config.kill_grace
            ),
        }
    }

    /// Kill the child's whole process group, reaching descendants that
    /// inherited its pipes.
    #[cfg(unix)]
    fn kill_process_group(&self) {
        let Some(pgid) = self.process_group.and_then(|id| i32::try_from(id).ok()) else {
            return;
        };
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) => debug!("session {}: killed process group {}", self.id, pgid),
            Err(Errno::ESRCH) => {}
            Err(e) => warn!("session {}: killing process group {} failed: {}", self.id, pgid, e),
        }
    }

    #[cfg(not(unix))]
    fn kill_process_group(&self) {}

    /// Close stdin, giving up after the drain grace.
    async fn close_input(&self, input: &InputHandle) {
        if tokio::time::timeout(self.config.drain_grace, input.close())
            .await
            .is_err()
        {
            warn!(
                "session {}: closing stdin did not finish within {:?}",
                self.id, self.config.drain_grace
            );
        }
    }

    async fn terminate(&mut self, outcome: &Outcome) {
        self.transition(SessionState::Terminated);
        self.send_terminal(outcome).await;
        self.teardown().await;
    }

    async fn send_terminal(&mut self, outcome: &Outcome) {
        if self.terminal_sent {
            return;
        }
        self.terminal_sent = true;
        if let Err(e) = self.sink.send(Frame::Terminal(outcome.clone())).await {
            debug!("session {}: terminal frame not delivered: {}", self.id, e);
        }
    }

    /// Close stdin, fire the done signal, kill leftover descendants and
    /// release staged resources.
    ///
    /// Returns `false` if teardown already ran.
    pub(crate) async fn teardown(&mut self) -> bool {
        if self.torn_down {
            debug!("session {}: already torn down", self.id);
            return false;
        }
        self.torn_down = true;

        self.done.cancel();
        if let Some(input) = self.input.take() {
            self.close_input(&input).await;
        }
        self.kill_process_group();
        if let Some(mut staged) = self.staged.take() {
            staged.release().await;
        }
        true
    }
}

/// Await a task until `deadline`, aborting it if it overruns.
async fn join_bounded<T>(
    session_id: &str,
    name: &str,
    mut handle: JoinHandle<T>,
    deadline: Instant,
) -> Option<T> {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!("session {}: {} task failed: {}", session_id, name, e);
            None
        }
        Err(_) => {
            warn!(
                "session {}: {} did not finish in time, aborting",
                session_id, name
            );
            handle.abort();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::HeuristicPrompt;
    use crate::provision::{LocalConfig, LocalProvisioner};

    fn session() -> (Session, tokio::sync::mpsc::Receiver<Frame>) {
        let (sink, rx) = FrameSink::channel(16);
        (
            Session::new(BridgeConfig::default(), Arc::new(HeuristicPrompt), sink),
            rx,
        )
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner =
            LocalProvisioner::new(LocalConfig::new("sh").with_staging_dir(dir.path()));
        let launch = provisioner.stage("t", "exit 0").await.unwrap();
        let script = launch.staged.files()[0].clone();

        let (mut session, _rx) = session();
        let (writer, _reader) = tokio::io::duplex(8);
        let input = InputHandle::new(writer);
        session.input = Some(input.clone());
        session.staged = Some(launch.staged);

        assert!(session.teardown().await);
        assert!(!script.exists());
        assert!(input.is_closed().await);
        assert!(session.done_signal().is_cancelled());

        assert!(!session.teardown().await);
    }

    #[tokio::test]
    async fn test_teardown_bounded_by_stalled_write() {
        let (sink, _rx) = FrameSink::channel(16);
        let config = BridgeConfig {
            drain_grace: std::time::Duration::from_millis(200),
            ..BridgeConfig::default()
        };
        let mut session = Session::new(config, Arc::new(HeuristicPrompt), sink);

        // Holds the input lock: nothing drains the pipe
        let (writer, _reader) = tokio::io::duplex(16);
        let input = InputHandle::new(writer);
        let stalled = tokio::spawn({
            let input = input.clone();
            async move { input.write_line(&"x".repeat(4096)).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        session.input = Some(input);

        let started = Instant::now();
        assert!(session.teardown().await);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        stalled.abort();
    }

    #[tokio::test]
    async fn test_terminal_frame_sent_once() {
        let (mut session, mut rx) = session();
        session.terminate(&Outcome::Completed).await;
        session.terminate(&Outcome::Disconnected).await;
        drop(session);

        assert_eq!(rx.recv().await, Some(Frame::Terminal(Outcome::Completed)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_launch_failure_releases_staged_script() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = LocalProvisioner::new(
            LocalConfig::new("/nonexistent/interpreter").with_staging_dir(dir.path()),
        );
        let (session, mut rx) = session();
        let (_tx, inbound) = crate::bridge::inbound_channel(1);

        let outcome = session.run(&provisioner, "print(1)", inbound).await;
        assert!(matches!(
            outcome,
            Outcome::LaunchFailed(ref msg) if msg.contains("/nonexistent/interpreter")
        ));

        let frame = rx.recv().await.unwrap();
        assert!(frame.is_terminal());
        assert!(frame.to_string().starts_with("Error: failed to start"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::Draining.to_string(), "draining");
        let (session, _rx) = session();
        assert_eq!(session.state(), SessionState::Provisioning);
    }
}
