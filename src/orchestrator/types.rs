//! Stages, modes, and outcomes of a deployment run.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use crate::compute::InstanceId;
use crate::config::DeployConfig;
use crate::remote::{DEFAULT_EXECUTION_TIMEOUT, ExecutionResult};

/// Default interval between operation polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default bound on a whole run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Default wait for a fresh instance's startup script.
pub const DEFAULT_BOOT_GRACE: Duration = Duration::from_secs(60);

/// Last state a run reached.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DeployStage {
    /// Nothing applied yet.
    Init,
    /// Every declared firewall rule exists.
    FirewallReady,
    /// The instance exists, is running, and any create operation is done.
    InstanceReady,
    /// The payload ran (existing path) or the grace period elapsed (fresh).
    Bootstrapped,
    /// The payload result was accepted.
    Deployed,
    /// The instance record was re-read after deployment.
    Verified,
}

impl fmt::Display for DeployStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "INIT",
            Self::FirewallReady => "FIREWALL_READY",
            Self::InstanceReady => "INSTANCE_READY",
            Self::Bootstrapped => "BOOTSTRAPPED",
            Self::Deployed => "DEPLOYED",
            Self::Verified => "VERIFIED",
        };
        formatter.write_str(label)
    }
}

/// How the run treats an existing instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DeployMode {
    /// Create the instance when absent, otherwise update it in place.
    #[default]
    Auto,
    /// Require that the instance does not exist yet.
    Fresh,
    /// Require that the instance already exists.
    Existing,
}

/// Payload a run delivers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptKind {
    /// Full bootstrap: packages, runtime, proxy, and application.
    Bootstrap,
    /// Refresh the checkout, rebuild, and restart.
    Update,
}

/// Which path the run took through instance preparation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeployPath {
    /// The instance was created by this run.
    Fresh,
    /// The instance existed and the payload ran over SSH.
    Existing,
}

/// Summary of a verified run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployReport {
    /// Target instance.
    pub instance: InstanceId,
    /// Fresh or existing path.
    pub path: DeployPath,
    /// Firewall rules created by this run.
    pub rules_created: Vec<String>,
    /// Firewall rules that were already present.
    pub rules_existing: Vec<String>,
    /// External address, when the provider reported one.
    pub external_address: Option<IpAddr>,
    /// Remote execution result on the existing path.
    pub execution: Option<ExecutionResult>,
}

impl DeployReport {
    /// URLs at which the site should answer once DNS and TLS are in place.
    #[must_use]
    pub fn site_urls(&self) -> Vec<String> {
        self.external_address
            .map(site_urls)
            .unwrap_or_default()
    }
}

/// Plain HTTP URL of the reverse proxy on `address`.
#[must_use]
pub fn site_urls(address: IpAddr) -> Vec<String> {
    match address {
        IpAddr::V4(v4) => vec![format!("http://{v4}")],
        IpAddr::V6(v6) => vec![format!("http://[{v6}]")],
    }
}

/// Non-failing end of a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeployOutcome {
    /// Every stage completed.
    Verified(DeployReport),
    /// The remote script outlived its time limit; its result is unknown.
    Pending {
        /// Target instance.
        instance: InstanceId,
        /// Stage reached before the timeout.
        stage: DeployStage,
        /// Limit that elapsed.
        limit: Duration,
    },
}

/// Timing knobs for a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OrchestratorSettings {
    /// Interval between operation polls.
    pub poll_interval: Duration,
    /// Upper bound on the whole run.
    pub run_timeout: Duration,
    /// Wait granted to a fresh instance's startup script.
    pub boot_grace: Duration,
    /// Upper bound on one remote script execution.
    pub execution_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            boot_grace: DEFAULT_BOOT_GRACE,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }
}

impl From<&DeployConfig> for OrchestratorSettings {
    fn from(config: &DeployConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            run_timeout: config.run_timeout(),
            boot_grace: config.boot_grace(),
            execution_timeout: config.execution_timeout(),
        }
    }
}
