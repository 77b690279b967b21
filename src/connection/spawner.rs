//! Agent process spawner and exit monitor.
//!
//! Spawns agent executables with piped stdio and `kill_on_drop(true)` so a
//! dropped handle never leaks a process. Ownership of the [`Child`] moves
//! into a monitor task; everything else talks to it through a cloneable
//! [`ProcessHandle`] that can observe the exit status or request a kill.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::{AppError, Result};

/// Everything needed to launch one agent process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnSpec {
    /// Executable path or name resolved through `PATH`.
    pub program: String,
    /// Full argument list.
    pub args: Vec<String>,
    /// Extra environment variables layered over the inherited environment.
    pub env: HashMap<String, String>,
    /// Working directory; inherits the caller's when `None`.
    pub cwd: Option<PathBuf>,
}

impl SpawnSpec {
    /// Build a spec from an agent configuration.
    ///
    /// `program` is usually [`AgentConfig::executable`]; `protocol_args` go
    /// before the user-configured arguments.
    #[must_use]
    pub fn for_agent(agent: &AgentConfig, program: String, protocol_args: &[&str]) -> Self {
        let mut args: Vec<String> = protocol_args.iter().map(|a| (*a).to_owned()).collect();
        args.extend(agent.args.iter().cloned());
        Self {
            program,
            args,
            env: agent.env.clone(),
            cwd: None,
        }
    }

    /// Set the working directory.
    #[must_use]
    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// A freshly spawned agent with its stdio pipes.
#[derive(Debug)]
pub struct AgentProcess {
    /// Exit observer and kill switch.
    pub handle: ProcessHandle,
    /// Agent's stdin.
    pub stdin: ChildStdin,
    /// Agent's stdout.
    pub stdout: ChildStdout,
    /// Agent's stderr.
    pub stderr: ChildStderr,
}

/// Spawn an agent process with piped stdio.
///
/// # Errors
///
/// Returns [`AppError::Connection`] if the executable cannot be launched
/// (missing, not executable) or its pipes cannot be captured.
pub fn spawn_agent(label: &str, spec: &SpawnSpec) -> Result<AgentProcess> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Connection(format!("failed to spawn '{}': {err}", spec.program))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Connection("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Connection("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Connection("failed to capture agent stderr".into()))?;

    info!(agent = label, program = %spec.program, pid = child.id(), "agent process spawned");

    Ok(AgentProcess {
        handle: ProcessHandle::monitor(label, child),
        stdin,
        stdout,
        stderr,
    })
}

/// How a process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if any (unix only).
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Whether the process exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Name of the terminating signal, e.g. `SIGKILL`.
    #[must_use]
    pub fn signal_name(&self) -> Option<String> {
        #[cfg(unix)]
        {
            self.signal.map(|raw| {
                nix::sys::signal::Signal::try_from(raw)
                    .map_or_else(|_| format!("signal {raw}"), |sig| sig.as_str().to_owned())
            })
        }
        #[cfg(not(unix))]
        {
            None
        }
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal_name()) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "terminated by {signal}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

#[derive(Debug)]
struct HandleInner {
    label: String,
    pid: Option<u32>,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill: CancellationToken,
}

/// Cloneable view of a running child process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

impl ProcessHandle {
    /// Take ownership of `child` and watch it in a background task.
    #[must_use]
    pub fn monitor(label: impl Into<String>, mut child: Child) -> Self {
        let label = label.into();
        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = CancellationToken::new();

        let task_label = label.clone();
        let token = kill.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                () = token.cancelled() => {
                    if let Err(err) = child.start_kill() {
                        debug!(agent = %task_label, %err, "kill request failed");
                    }
                    child.wait().await
                }
            };

            let info = match status {
                Ok(status) => ExitInfo::from(status),
                Err(err) => {
                    warn!(agent = %task_label, %err, "error waiting for child process");
                    ExitInfo::default()
                }
            };
            info!(agent = %task_label, code = ?info.code, signal = ?info.signal, "process exited");
            let _ = exit_tx.send(Some(info));
        });

        Self {
            inner: Arc::new(HandleInner {
                label,
                pid,
                exit: exit_rx,
                kill,
            }),
        }
    }

    /// OS process id, if it was still known at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    /// Exit status if the process has already ended.
    #[must_use]
    pub fn try_exit(&self) -> Option<ExitInfo> {
        *self.inner.exit.borrow()
    }

    /// Whether the process is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.try_exit().is_none()
    }

    /// Wait until the process exits.
    pub async fn wait_for_exit(&self) -> ExitInfo {
        let mut exit = self.inner.exit.clone();
        let info = match exit.wait_for(Option::is_some).await {
            Ok(info) => (*info).unwrap_or_default(),
            Err(_) => self.try_exit().unwrap_or_default(),
        };
        info
    }

    /// Force-kill the process. Idempotent; returns immediately.
    pub fn kill(&self) {
        if self.is_running() {
            debug!(agent = %self.inner.label, pid = ?self.inner.pid, "killing process");
        }
        self.inner.kill.cancel();
    }

    /// Ask the process to stop (SIGTERM on unix), force-killing it if it is
    /// still alive after `grace`, then wait for the exit status.
    pub async fn terminate(&self, grace: Duration) -> ExitInfo {
        if let Some(info) = self.try_exit() {
            return info;
        }

        #[cfg(unix)]
        if let Some(pid) = self.inner.pid.and_then(|pid| i32::try_from(pid).ok()) {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                debug!(agent = %self.inner.label, pid, %err, "SIGTERM failed");
            }
        }

        if let Ok(info) = tokio::time::timeout(grace, self.wait_for_exit()).await {
            return info;
        }

        self.kill();
        self.wait_for_exit().await
    }
}
