//! Lifecycle management for a legacy backend run as a child process.
//!
//! The supervisor spawns the interpreter, forwards both output pipes to the log
//! line by line for the whole lifetime of the child, and tears it down when the
//! shutdown token fires:
//!
//! ```text
//! NotStarted -> Running -> Draining -> Terminated
//! ```
//!
//! `run` only returns once both drain tasks have finished (or the drain timeout
//! has passed), so no trailing output is lost on the orderly path. A failed
//! spawn is reported once and never retried.
use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::watch,
    task::JoinHandle,
};

use crate::{
    metrics,
    utils::graceful_shutdown::{ShutdownReason, ShutdownToken},
};

/// How long teardown waits for the pipes to reach end-of-stream after the child
/// is gone. A grandchild that inherited the pipes can otherwise hold them open.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SupervisorError {
    #[error("Failed to spawn legacy process {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Legacy process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("Failed waiting on legacy process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Legacy process supervisor was already started")]
    AlreadyStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Running,
    Draining,
    Terminated,
}

/// Command line for the legacy backend.
#[derive(Debug, Clone)]
pub struct LegacyProcessConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl LegacyProcessConfig {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.into(),
        }
    }

    /// PHP's built-in web server bound to the legacy port, dispatching through
    /// `router.php` in the legacy root.
    pub fn php_builtin_server(php_dir: &Path, port: u16) -> Self {
        Self::new(
            php_dir.join("php"),
            vec![
                "-S".to_string(),
                format!("127.0.0.1:{port}"),
                "router.php".to_string(),
            ],
            php_dir,
        )
    }
}

/// What ended the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// The child exited on its own.
    ProcessExited,
    /// The child was killed because of a shutdown signal.
    Shutdown(ShutdownReason),
}

#[derive(Debug)]
pub struct SupervisorExit {
    pub cause: ExitCause,
    pub pid: Option<u32>,
    pub status: Option<ExitStatus>,
    pub stdout_lines: usize,
    pub stderr_lines: usize,
}

/// A running child with its two drain tasks. Owned by `run` for its whole life.
struct SupervisedProcess {
    child: Child,
    pid: Option<u32>,
    stdout_drain: JoinHandle<usize>,
    stderr_drain: JoinHandle<usize>,
}

pub struct LegacyProcessSupervisor {
    config: LegacyProcessConfig,
    state_tx: watch::Sender<SupervisorState>,
    drain_timeout: Duration,
}

impl LegacyProcessSupervisor {
    pub fn new(config: LegacyProcessConfig) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::NotStarted);
        Self {
            config,
            state_tx,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn state(&self) -> SupervisorState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SupervisorState) {
        tracing::debug!("Legacy process state -> {:?}", state);
        self.state_tx.send_replace(state);
    }

    fn spawn(&self) -> Result<SupervisedProcess, SupervisorError> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: self.config.program.display().to_string(),
                source,
            })?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or(SupervisorError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SupervisorError::MissingPipe("stderr"))?;

        Ok(SupervisedProcess {
            child,
            pid,
            stdout_drain: tokio::spawn(drain_lines(stdout, "stdout")),
            stderr_drain: tokio::spawn(drain_lines(stderr, "stderr")),
        })
    }

    /// Spawn the legacy process and supervise it until it exits or `shutdown`
    /// fires. On shutdown the child is killed and reaped before the drains are
    /// joined.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<SupervisorExit, SupervisorError> {
        if self.state() != SupervisorState::NotStarted {
            return Err(SupervisorError::AlreadyStarted);
        }

        let mut process = self.spawn()?;
        self.set_state(SupervisorState::Running);
        metrics::set_legacy_process_up(true);
        tracing::info!(
            pid = ?process.pid,
            "Legacy process started: {} {}",
            self.config.program.display(),
            self.config.args.join(" ")
        );

        let (cause, waited) = tokio::select! {
            status = process.child.wait() => (ExitCause::ProcessExited, status),
            reason = shutdown.wait_for_shutdown() => {
                tracing::info!(pid = ?process.pid, "Killing legacy process ({:?})", reason);
                if let Err(e) = process.child.kill().await {
                    tracing::warn!("Failed to kill legacy process: {}", e);
                }
                (ExitCause::Shutdown(reason), process.child.wait().await)
            }
        };

        self.finish(process, cause, waited).await
    }

    /// Tear down after the child is gone or could not be waited on. Runs on every
    /// path so the gauge, the drains and the state always settle.
    async fn finish(
        &self,
        mut process: SupervisedProcess,
        cause: ExitCause,
        waited: std::io::Result<ExitStatus>,
    ) -> Result<SupervisorExit, SupervisorError> {
        self.set_state(SupervisorState::Draining);

        let waited = match waited {
            Ok(status) => {
                if cause == ExitCause::ProcessExited {
                    tracing::warn!(pid = ?process.pid, "Legacy process exited: {}", status);
                }
                Ok(status)
            }
            Err(e) => {
                tracing::error!(pid = ?process.pid, "Failed waiting on legacy process: {}", e);
                // Closing the child's ends of the pipes lets the drains finish.
                if let Err(kill_err) = process.child.start_kill() {
                    tracing::warn!("Failed to kill legacy process: {}", kill_err);
                }
                Err(e)
            }
        };
        metrics::set_legacy_process_up(false);

        let (stdout_lines, stderr_lines) = self.join_drains(&mut process).await;
        self.set_state(SupervisorState::Terminated);

        let status = waited.map_err(SupervisorError::Wait)?;
        Ok(SupervisorExit {
            cause,
            pid: process.pid,
            status: Some(status),
            stdout_lines,
            stderr_lines,
        })
    }

    async fn join_drains(&self, process: &mut SupervisedProcess) -> (usize, usize) {
        let joined = tokio::time::timeout(self.drain_timeout, async {
            let stdout = (&mut process.stdout_drain).await;
            let stderr = (&mut process.stderr_drain).await;
            (stdout, stderr)
        })
        .await;

        match joined {
            Ok((stdout, stderr)) => (stdout.unwrap_or(0), stderr.unwrap_or(0)),
            Err(_) => {
                tracing::warn!(
                    "Legacy output pipes still open after {:?}; abandoning drain",
                    self.drain_timeout
                );
                process.stdout_drain.abort();
                process.stderr_drain.abort();
                (0, 0)
            }
        }
    }
}

/// Forward every line of `reader` to the log until end-of-stream, returning the
/// number of lines seen.
async fn drain_lines<R>(reader: R, stream: &'static str) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    let mut count = 0;

    loop {
        match segments.next_segment().await {
            Ok(Some(segment)) => {
                let line = String::from_utf8_lossy(&segment);
                let line = line.trim_end_matches('\r');
                if stream == "stderr" {
                    tracing::warn!(stream, "{line}");
                } else {
                    tracing::info!(stream, "{line}");
                }
                count += 1;
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(stream, "Failed reading legacy output: {}", e);
                break;
            }
        }
    }

    count
}
