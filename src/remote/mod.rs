//! Remote executor: copies a payload to the instance with `scp` and runs it
//! over `ssh` under a caller-supplied time limit.

use std::env;
use std::ffi::OsString;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use shell_escape::unix::escape;
use uuid::Uuid;

use crate::script::ScriptPayload;

mod config;
mod types;

pub use config::{
    DEFAULT_COPY_TIMEOUT_SECS, DEFAULT_REMOTE_SCRIPT_PATH, DEFAULT_STAGING_DIR, RemoteConfig, RemoteConfigLoadError,
    RemoteError,
};
pub use types::{
    CommandOutput, CommandRunner, ExecutionOutcome, ExecutionResult, ProcessCommandRunner,
    RemoteTarget, TimedCommandOutput,
};

/// Default bound on a single remote script execution.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(600);

/// Pushes payloads and runs commands on an instance over SSH.
#[derive(Clone, Debug)]
pub struct RemoteExecutor<R: CommandRunner> {
    config: RemoteConfig,
    runner: R,
}

impl RemoteExecutor<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: RemoteConfig) -> Result<Self, RemoteError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> RemoteExecutor<R> {
    /// Creates a new executor using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: RemoteConfig, runner: R) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Builds a target for the given external address using configured
    /// credentials.
    #[must_use]
    pub fn target_for(&self, host: IpAddr) -> RemoteTarget {
        RemoteTarget {
            user: self.config.user.clone(),
            host,
            port: self.config.port,
        }
    }

    /// Command that runs a pushed payload as root.
    #[must_use]
    pub fn script_command(&self) -> String {
        let path = escape(self.config.remote_script_path.as_str().into());
        format!("sudo bash {path}")
    }

    /// Copies `payload` to the configured remote path on `target`.
    ///
    /// The payload is staged in the local staging directory, copied with
    /// `scp`, and the staged file removed afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Staging`] when the payload cannot be written
    /// locally, [`RemoteError::Spawn`] when `scp` cannot start,
    /// [`RemoteError::Transfer`] when the copy exits non-zero, or
    /// [`RemoteError::CopyTimedOut`] when it outlives the copy timeout.
    pub fn push(&self, payload: &ScriptPayload, target: &RemoteTarget) -> Result<(), RemoteError> {
        let staging = self.config.staging_path();
        let dir = Dir::open_ambient_dir(&staging, ambient_authority())
            .map_err(|err| staging_error(&staging, &err))?;
        let file_name = format!("stratus-{}.sh", Uuid::new_v4().simple());
        dir.write(&file_name, payload.as_str())
            .map_err(|err| staging_error(&staging, &err))?;

        let local = staging.join(&file_name);
        let args = self.build_scp_args(&local, target);
        let limit = self.config.copy_timeout();
        let result = self
            .runner
            .run_with_timeout(&self.config.scp_bin, &args, limit);
        dir.remove_file(&file_name).ok();

        let output = match result? {
            TimedCommandOutput::Finished(output) => output,
            TimedCommandOutput::TimedOut => {
                return Err(RemoteError::CopyTimedOut {
                    program: self.config.scp_bin.clone(),
                    limit_secs: limit.as_secs(),
                });
            }
        };
        if output.is_success() {
            return Ok(());
        }

        Err(RemoteError::Transfer {
            program: self.config.scp_bin.clone(),
            status_text: output
                .code
                .map_or_else(|| String::from("unknown"), |code| code.to_string()),
            stderr: output.stderr,
        })
    }

    /// Runs `command` on `target`, giving up once `limit` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] when the SSH client cannot start.
    ///
    /// # Security
    ///
    /// `command` is passed verbatim to the SSH client; callers must quote any
    /// untrusted input.
    pub fn execute(
        &self,
        target: &RemoteTarget,
        command: &str,
        limit: Duration,
    ) -> Result<ExecutionOutcome, RemoteError> {
        let args = self.build_ssh_args(target, command);
        let started = Instant::now();
        let output = self
            .runner
            .run_with_timeout(&self.config.ssh_bin, &args, limit)?;

        Ok(match output {
            TimedCommandOutput::Finished(finished) => ExecutionOutcome::Completed(ExecutionResult {
                exit_code: finished.code,
                stdout: finished.stdout,
                stderr: finished.stderr,
                duration: started.elapsed(),
            }),
            TimedCommandOutput::TimedOut => ExecutionOutcome::TimedOut { limit },
        })
    }

    fn build_scp_args(&self, local: &Utf8Path, target: &RemoteTarget) -> Vec<OsString> {
        let mut args = vec![OsString::from("-P"), OsString::from(target.port.to_string())];
        args.extend(self.common_options());
        args.push(OsString::from(local.as_str()));
        args.push(OsString::from(format!(
            "{}@{}:{}",
            target.user,
            host_for_scp(target.host),
            self.config.remote_script_path
        )));
        args
    }

    fn build_ssh_args(&self, target: &RemoteTarget, command: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(target.port.to_string())];
        args.extend(self.common_options());
        args.push(OsString::from(format!("{}@{}", target.user, target.host)));
        args.push(OsString::from(command));
        args
    }

    fn common_options(&self) -> Vec<OsString> {
        let mut args = Vec::new();

        if let Some(ref identity_file) = self.config.identity_file {
            args.push(OsString::from("-i"));
            args.push(identity_path(identity_file));
        }

        if self.config.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            )));
        }

        args
    }
}

fn host_for_scp(host: IpAddr) -> String {
    match host {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}

fn staging_error(path: &Utf8Path, err: &std::io::Error) -> RemoteError {
    RemoteError::Staging {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Resolves a `~/` identity path against `HOME`; other paths pass through.
fn identity_path(path: &str) -> OsString {
    match (path.strip_prefix("~/"), env::var_os("HOME")) {
        (Some(relative), Some(mut home)) => {
            home.push("/");
            home.push(relative);
            home
        }
        _ => OsString::from(path),
    }
}

#[cfg(test)]
mod tests;
