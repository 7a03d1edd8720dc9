//! Process-level plumbing shared by `scp`, `ssh`, and `gcloud` calls,
//! plus the result types of a remote execution.

use std::ffi::OsString;
use std::io::Read;
use std::net::IpAddr;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::RemoteError;

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exit status and captured streams of a finished local process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit status; `None` when a signal ended the process.
    pub code: Option<i32>,
    /// Decoded stdout.
    pub stdout: String,
    /// Decoded stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the process exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Local process run against a deadline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TimedCommandOutput {
    /// The process exited before the limit.
    Finished(CommandOutput),
    /// The limit elapsed and the process was killed.
    TimedOut,
}

/// Seam between the executor and the host's process table.
///
/// Tests substitute a scripted runner so no `ssh` or `gcloud` binary is
/// needed.
pub trait CommandRunner {
    /// Runs `program` to completion and collects its output.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError>;

    /// Runs `program`, killing it once `limit` has elapsed.
    ///
    /// Runners without deadline support fall back to [`CommandRunner::run`].
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started.
    fn run_with_timeout(
        &self,
        program: &str,
        args: &[OsString],
        _limit: Duration,
    ) -> Result<TimedCommandOutput, RemoteError> {
        self.run(program, args).map(TimedCommandOutput::Finished)
    }
}

/// Runner backed by [`std::process::Command`].
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| spawn_error(program, &err))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_with_timeout(
        &self,
        program: &str,
        args: &[OsString],
        limit: Duration,
    ) -> Result<TimedCommandOutput, RemoteError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;

        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);
        // `None` when the limit lies beyond the clock's range.
        let deadline = Instant::now().checked_add(limit);

        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|err| spawn_error(program, &err))?
            {
                return Ok(TimedCommandOutput::Finished(CommandOutput {
                    code: status.code(),
                    stdout: join_reader(stdout_reader),
                    stderr: join_reader(stderr_reader),
                }));
            }

            if deadline.is_some_and(|at| Instant::now() >= at) {
                // The remote side keeps whatever state the script reached.
                child.kill().ok();
                child.wait().ok();
                join_reader(stdout_reader);
                join_reader(stderr_reader);
                return Ok(TimedCommandOutput::TimedOut);
            }

            thread::sleep(CHILD_POLL_INTERVAL);
        }
    }
}

fn spawn_error(program: &str, err: &std::io::Error) -> RemoteError {
    RemoteError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}

fn spawn_reader<P: Read + Send + 'static>(mut pipe: P) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        pipe.read_to_end(&mut buffer).ok();
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn join_reader(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// SSH coordinates of the machine a payload is pushed to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTarget {
    /// Login user.
    pub user: String,
    /// External address of the instance.
    pub host: IpAddr,
    /// SSH port.
    pub port: u16,
}

/// Captured result of a remote script execution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionResult {
    /// Remote exit code; `None` when the session ended without one.
    pub exit_code: Option<i32>,
    /// Remote stdout.
    pub stdout: String,
    /// Remote stderr, surfaced in failure reports.
    pub stderr: String,
    /// Wall-clock time spent waiting for the command.
    pub duration: Duration,
}

impl ExecutionResult {
    /// Returns `true` when the remote command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Outcome of a bounded remote execution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExecutionOutcome {
    /// The command finished; inspect the exit code for success.
    Completed(ExecutionResult),
    /// The limit elapsed first; the remote outcome is unknown.
    TimedOut {
        /// Limit that was exceeded.
        limit: Duration,
    },
}
