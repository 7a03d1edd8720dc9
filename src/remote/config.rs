//! SSH transport configuration and remote execution errors.
//!
//! [`RemoteConfig`] is loaded via `ortho-config`, which merges defaults,
//! configuration files, and environment variables.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default path the payload is copied to on the instance.
pub const DEFAULT_REMOTE_SCRIPT_PATH: &str = "/tmp/stratus-deploy.sh";

/// Default local directory used to stage payloads before copying.
pub const DEFAULT_STAGING_DIR: &str = "/tmp";

/// Default bound on copying the payload, in seconds.
pub const DEFAULT_COPY_TIMEOUT_SECS: u64 = 60;

/// Transport settings for pushing and running payloads over SSH.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STRATUS_SSH",
    discovery(
        app_name = "stratus",
        env_var = "STRATUS_CONFIG_PATH",
        config_file_name = "stratus.toml",
        dotfile_name = ".stratus.toml",
        project_file_name = "stratus.toml"
    )
)]
pub struct RemoteConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub user: String,
    /// TCP port of the SSH daemon.
    #[ortho_config(default = 22)]
    pub port: u16,
    /// Whether to force batch mode so SSH never prompts for a password.
    #[ortho_config(default = true)]
    pub batch_mode: bool,
    /// Whether to enforce host key checking. Instances are recreated often,
    /// so checking is off by default.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null`.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
    /// Private key used for authentication. Supports `~/` expansion. When not
    /// set, SSH falls back to its default key locations.
    pub identity_file: Option<String>,
    /// Path the payload is copied to on the instance.
    #[ortho_config(default = DEFAULT_REMOTE_SCRIPT_PATH.to_owned())]
    pub remote_script_path: String,
    /// Local directory where payloads are staged before copying.
    #[ortho_config(default = DEFAULT_STAGING_DIR.to_owned())]
    pub staging_dir: String,
    /// Seconds a single `scp` copy may take before it is killed.
    #[ortho_config(default = DEFAULT_COPY_TIMEOUT_SECS)]
    pub copy_timeout_secs: u64,
}

/// Errors raised when loading the remote configuration from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RemoteConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("ssh configuration parsing failed: {0}")]
    Parse(String),
}

impl RemoteConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when any required field is empty
    /// or the port or copy timeout is zero.
    pub fn validate(&self) -> Result<(), RemoteError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.user, "user")?;
        Self::require_optional_value(self.identity_file.as_deref(), "identity_file")?;
        Self::require_value(&self.remote_script_path, "remote_script_path")?;
        Self::require_value(&self.staging_dir, "staging_dir")?;
        let zero_field = if self.port == 0 {
            Some("port")
        } else if self.copy_timeout_secs == 0 {
            Some("copy_timeout_secs")
        } else {
            None
        };
        zero_field.map_or(Ok(()), |field| {
            Err(RemoteError::InvalidConfig {
                field: field.to_owned(),
            })
        })
    }

    /// Loads configuration from defaults, configuration files, and
    /// environment variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, RemoteConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("stratus")])
            .map_err(|err| RemoteConfigLoadError::Parse(err.to_string()))
    }

    /// Bound on one payload copy.
    #[must_use]
    pub const fn copy_timeout(&self) -> Duration {
        Duration::from_secs(self.copy_timeout_secs)
    }

    /// Returns the staging directory as a UTF-8 path.
    #[must_use]
    pub fn staging_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.staging_dir)
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), RemoteError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(RemoteError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), RemoteError> {
        Self::require_optional_value(Some(value), field)
    }
}

/// Errors surfaced while pushing or running payloads.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set STRATUS_SSH_{env_suffix} or add {field} to [ssh] in stratus.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when the payload cannot be written to the staging directory.
    #[error("failed to stage payload in {path}: {message}")]
    Staging {
        /// Staging directory.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        message: String,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when copying the payload to the instance fails.
    #[error("{program} exited with status {status_text}: {stderr}")]
    Transfer {
        /// Copy program that failed.
        program: String,
        /// Human readable exit status.
        status_text: String,
        /// Stderr captured from the copy.
        stderr: String,
    },
    /// Raised when the copy outlives its time limit and is killed.
    #[error("{program} did not finish within {limit_secs}s; check that the instance accepts SSH on its external address")]
    CopyTimedOut {
        /// Copy program that was killed.
        program: String,
        /// Limit that elapsed, in seconds.
        limit_secs: u64,
    },
}
