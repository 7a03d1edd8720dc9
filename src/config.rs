//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default Compute Engine REST endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Deployment configuration derived from defaults, configuration files, and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STRATUS",
    discovery(
        app_name = "stratus",
        env_var = "STRATUS_CONFIG_PATH",
        config_file_name = "stratus.toml",
        dotfile_name = ".stratus.toml",
        project_file_name = "stratus.toml"
    )
)]
pub struct DeployConfig {
    /// Provider project identifier. Required.
    pub project_id: String,
    /// Availability zone for the instance.
    #[ortho_config(default = "us-central1-a".to_owned())]
    pub zone: String,
    /// Name of the instance hosting the application. Required.
    pub instance_name: String,
    /// Machine type (for example `e2-medium`).
    #[ortho_config(default = "e2-medium".to_owned())]
    pub machine_type: String,
    /// Project that publishes the boot image family.
    #[ortho_config(default = "ubuntu-os-cloud".to_owned())]
    pub image_project: String,
    /// Boot image family; the newest image in the family is used.
    #[ortho_config(default = "ubuntu-2204-lts".to_owned())]
    pub image_family: String,
    /// Boot disk size in gigabytes.
    #[ortho_config(default = 20)]
    pub boot_disk_size_gb: u32,
    /// Boot disk type.
    #[ortho_config(default = "pd-balanced".to_owned())]
    pub boot_disk_type: String,
    /// Application name; also names the process and the web root. Required.
    pub app_name: String,
    /// Git URL of the application source. Required.
    pub repo_url: String,
    /// Branch to deploy.
    #[ortho_config(default = "main".to_owned())]
    pub branch: String,
    /// Port the application listens on locally.
    #[ortho_config(default = 3000)]
    pub app_port: u16,
    /// Major version of the Node.js runtime to install.
    #[ortho_config(default = "20".to_owned())]
    pub runtime_version: String,
    /// Ingress rules as `name:protocol:port` entries separated by commas.
    #[ortho_config(default = "http:tcp:80,https:tcp:443".to_owned())]
    pub firewall_rules: String,
    /// OAuth access token for the compute API. When absent the token is
    /// obtained from `gcloud auth print-access-token`.
    pub access_token: Option<String>,
    /// Path to the `gcloud` executable used for the token fallback.
    #[ortho_config(default = "gcloud".to_owned())]
    pub gcloud_bin: String,
    /// Compute API base URL.
    #[ortho_config(default = DEFAULT_API_BASE_URL.to_owned())]
    pub api_base_url: String,
    /// Seconds between operation status checks.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Upper bound in seconds for one whole deployment run.
    #[ortho_config(default = 1800)]
    pub run_timeout_secs: u64,
    /// Seconds to wait for a fresh instance to run its startup script.
    #[ortho_config(default = 60)]
    pub boot_grace_secs: u64,
    /// Upper bound in seconds for one remote script execution.
    #[ortho_config(default = 600)]
    pub execution_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
pub(crate) struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    pub(crate) const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    pub(crate) fn require(&self, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "{}: set {} or add {} to stratus.toml",
                self.description, self.env_var, self.toml_key
            )));
        }
        Ok(())
    }
}

impl DeployConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("stratus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks the fields the compute client needs. Descriptor fields are
    /// validated when the descriptor is built.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the API endpoint or timings are unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new("compute API base URL", "STRATUS_API_BASE_URL", "api_base_url")
            .require(&self.api_base_url)?;
        FieldMetadata::new("gcloud executable", "STRATUS_GCLOUD_BIN", "gcloud_bin")
            .require(&self.gcloud_bin)?;
        if let Some(token) = self.access_token.as_deref() {
            FieldMetadata::new("access token", "STRATUS_ACCESS_TOKEN", "access_token")
                .require(token)?;
        }
        for (field, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("run_timeout_secs", self.run_timeout_secs),
            ("execution_timeout_secs", self.execution_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidField {
                    field: field.to_owned(),
                    reason: String::from("must be greater than zero"),
                });
            }
        }
        Ok(())
    }

    /// Interval between operation polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Overall deadline for a run.
    #[must_use]
    pub const fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    /// Grace period granted to a freshly created instance.
    #[must_use]
    pub const fn boot_grace(&self) -> Duration {
        Duration::from_secs(self.boot_grace_secs)
    }

    /// Bound on a remote script execution.
    #[must_use]
    pub const fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value that cannot be used.
    #[error("invalid configuration field {field}: {reason}")]
    InvalidField {
        /// Field name as written in `stratus.toml`.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
