//! Child process creation.
//!
//! [`ProcessLauncher::launch`] never fails: a process that could not be
//! spawned comes back as an already-terminated [`ManagedProcess`] whose output
//! is immediately at end-of-stream, and the readiness handshake reports it.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::command::CommandLine;
use crate::drain::{self, DrainHandle, SharedSink};
use crate::error::{HarnessError, Result};

/// How long stderr may stay open after the process itself has exited.
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Line reader over a child's standard output.
pub type StdoutLines = Lines<BufReader<ChildStdout>>;

/// Normalise an exit status to a single integer.
///
/// Signal-terminated children map to `128 + signal` on Unix.
#[must_use]
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// One spawned OS process, exclusively owned by whoever launched it.
#[derive(Debug)]
pub struct ManagedProcess {
    label: String,
    child: Option<Child>,
    discovered_pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<StdoutLines>,
    stderr_drain: Option<DrainHandle>,
    exit_code: Option<i32>,
    spawn_error: Option<String>,
}

impl ManagedProcess {
    fn failed(label: String, reason: String) -> Self {
        Self {
            label,
            child: None,
            discovered_pid: None,
            stdin: None,
            stdout: None,
            stderr_drain: None,
            exit_code: None,
            spawn_error: Some(reason),
        }
    }

    /// Label used for log fields and drained output.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Pid the process announced on its readiness stream.
    #[must_use]
    pub fn discovered_pid(&self) -> Option<u32> {
        self.discovered_pid
    }

    pub(crate) fn set_discovered_pid(&mut self, pid: u32) {
        self.discovered_pid = Some(pid);
    }

    /// Why spawning failed, if it did.
    #[must_use]
    pub fn spawn_error(&self) -> Option<&str> {
        self.spawn_error.as_deref()
    }

    /// Exit status, unset while the process is running.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Check if the process was spawned and has not been reaped yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.child.is_some() && self.exit_code.is_none()
    }

    /// Take the stdout line reader, typically to hand it to a drain task.
    pub fn take_stdout(&mut self) -> Option<StdoutLines> {
        self.stdout.take()
    }

    /// Read the next stdout line.
    ///
    /// Returns `Ok(None)` at end-of-stream, including when the process was
    /// never spawned or its stdout has already been handed off.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        match self.stdout.as_mut() {
            Some(lines) => Ok(lines.next_line().await?),
            None => Ok(None),
        }
    }

    /// Wait for the process to exit and record its status.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SpawnFailure`] if the process never started.
    pub async fn wait(&mut self) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let Some(child) = self.child.as_mut() else {
            return Err(HarnessError::SpawnFailure {
                label: self.label.clone(),
                reason: self.spawn_error.clone().unwrap_or_default(),
            });
        };

        // Closing stdin lets children that read it run to completion.
        self.stdin.take();
        let status = child.wait().await?;
        let code = exit_code_of(status);
        self.exit_code = Some(code);
        debug!(process = %self.label, exit_code = code, "process exited");

        if let Some(drain) = self.stderr_drain.take() {
            drain.join_timeout(STDERR_GRACE).await;
        }
        Ok(code)
    }

    /// Force-kill the process and reap it. Best-effort: never fails.
    pub async fn kill(&mut self) {
        if let (Some(child), None) = (self.child.as_mut(), self.exit_code) {
            if let Err(e) = child.kill().await {
                warn!(process = %self.label, error = %e, "failed to kill process");
            }
            match child.try_wait() {
                Ok(Some(status)) => self.exit_code = Some(exit_code_of(status)),
                Ok(None) => {}
                Err(e) => warn!(process = %self.label, error = %e, "failed to reap process"),
            }
            info!(process = %self.label, "process killed");
        }
        self.stdin.take();
        self.stdout.take();
        if let Some(drain) = self.stderr_drain.take() {
            drain.stop().await;
        }
    }
}

/// Spawns child processes with piped standard streams.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    sink: SharedSink,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ProcessLauncher {
    /// Create a launcher that drains stderr into `sink`.
    #[must_use]
    pub fn new(sink: SharedSink) -> Self {
        Self {
            sink,
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Run every launched process in `dir`.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable for every launched process.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The sink drained output is written to.
    #[must_use]
    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Spawn `command` with piped stdin, stdout and stderr.
    ///
    /// Stderr is drained immediately under `"<label> (stderr)"`; stdout is
    /// left for the readiness handshake. Must be called from within a tokio
    /// runtime.
    pub fn launch(&self, label: impl Into<String>, command: &CommandLine) -> ManagedProcess {
        let label = label.into();

        if let Err(e) = command.validate() {
            warn!(process = %label, error = %e, "refusing to launch invalid command line");
            return ManagedProcess::failed(label, e.to_string());
        }

        let mut cmd = Command::new(command.program());
        cmd.args(command.arguments())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        match cmd.spawn() {
            Ok(mut child) => {
                let os_pid = child.id();
                let stdin = child.stdin.take();
                let stdout = child.stdout.take().map(|out| BufReader::new(out).lines());
                let stderr_drain = child.stderr.take().map(|err| {
                    drain::start(
                        BufReader::new(err).lines(),
                        format!("{label} (stderr)"),
                        Arc::clone(&self.sink),
                    )
                });
                info!(process = %label, ?os_pid, command = %command, "launched process");
                ManagedProcess {
                    label,
                    child: Some(child),
                    discovered_pid: None,
                    stdin,
                    stdout,
                    stderr_drain,
                    exit_code: None,
                    spawn_error: None,
                }
            }
            Err(e) => {
                warn!(process = %label, command = %command, error = %e, "failed to spawn process");
                ManagedProcess::failed(label, e.to_string())
            }
        }
    }
}
