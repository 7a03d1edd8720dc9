//! Shared fixtures for deployment BDD scenarios.

use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::time::Duration;

use rstest::fixture;
use stratus::remote::{DEFAULT_REMOTE_SCRIPT_PATH, RemoteConfig, RemoteError, RemoteExecutor};
use stratus::test_support::{FakeCompute, ScriptedRunner};
use stratus::{
    ApplicationDescriptor, DeployError, DeployOutcome, DeploymentDescriptor, FirewallRuleSpec,
    MachineProfile, Orchestrator, OrchestratorSettings,
};
use tempfile::TempDir;

/// Address reported for instances seeded as already running.
pub const EXISTING_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7));

/// Limit handed to the remote executor in scenarios.
pub const EXECUTION_LIMIT: Duration = Duration::from_secs(30);

pub type RunResult = Result<DeployOutcome, DeployError>;

#[derive(Clone, Debug)]
pub struct DeployContext {
    pub compute: FakeCompute,
    pub runner: ScriptedRunner,
    pub staging: Rc<TempDir>,
    pub descriptor: Rc<RefCell<Option<DeploymentDescriptor>>>,
    pub outcome: Rc<RefCell<Option<RunResult>>>,
}

#[fixture]
pub fn deploy_context() -> DeployContext {
    DeployContext {
        compute: FakeCompute::new(),
        runner: ScriptedRunner::new(),
        staging: Rc::new(
            TempDir::new().unwrap_or_else(|err| panic!("create staging directory: {err}")),
        ),
        descriptor: Rc::new(RefCell::new(None)),
        outcome: Rc::new(RefCell::new(None)),
    }
}

impl DeployContext {
    pub fn orchestrator(&self) -> Result<Orchestrator<FakeCompute, ScriptedRunner>, RemoteError> {
        let staging_dir = self
            .staging
            .path()
            .to_str()
            .unwrap_or_else(|| panic!("staging path should be valid UTF-8"))
            .to_owned();
        let config = RemoteConfig {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            user: String::from("ubuntu"),
            port: 22,
            batch_mode: true,
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
            identity_file: None,
            remote_script_path: String::from(DEFAULT_REMOTE_SCRIPT_PATH),
            staging_dir,
            copy_timeout_secs: 60,
        };
        let executor = RemoteExecutor::new(config, self.runner.clone())?;
        Ok(
            Orchestrator::new(self.compute.clone(), executor).with_settings(OrchestratorSettings {
                poll_interval: Duration::ZERO,
                run_timeout: Duration::from_secs(60),
                boot_grace: Duration::ZERO,
                execution_timeout: EXECUTION_LIMIT,
            }),
        )
    }
}

pub fn descriptor_for(instance: &str) -> DeploymentDescriptor {
    DeploymentDescriptor::builder()
        .project_id("demo-project")
        .zone("us-central1-a")
        .instance_name(instance)
        .machine(MachineProfile {
            machine_type: String::from("e2-medium"),
            image_project: String::from("ubuntu-os-cloud"),
            image_family: String::from("ubuntu-2204-lts"),
            disk_size_gb: 20,
            disk_type: String::from("pd-balanced"),
        })
        .application(ApplicationDescriptor {
            name: String::from("shop"),
            repo_url: String::from("https://example.com/shop.git"),
            branch: String::from("main"),
            port: 3000,
        })
        .runtime_version("20")
        .firewall_rule(FirewallRuleSpec {
            name: String::from("http"),
            protocol: String::from("tcp"),
            port: 80,
        })
        .firewall_rule(FirewallRuleSpec {
            name: String::from("https"),
            protocol: String::from("tcp"),
            port: 443,
        })
        .build()
        .unwrap_or_else(|err| panic!("scenario descriptor should be valid: {err}"))
}
