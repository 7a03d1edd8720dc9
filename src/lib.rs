//! Core library for the Stratus deployment tool.
//!
//! The crate provisions a single Compute Engine instance, delivers a
//! bootstrap script that installs a Node.js application behind nginx, and
//! reports on or tears down the result. Remote calls go through the
//! [`compute::ComputeApi`] facade; shell access goes through the
//! [`remote::CommandRunner`] seam.

pub mod compute;
pub mod config;
pub mod descriptor;
pub mod orchestrator;
pub mod poll;
pub mod remote;
pub mod reporter;
pub mod script;
pub mod test_support;
pub mod verify;

pub use compute::gce::{AccessToken, GceClient, TokenError};
pub use compute::{ComputeApi, InstanceId, InstanceRecord, InstanceStatus, RemoteApiError};
pub use config::{ConfigError, DeployConfig};
pub use descriptor::{
    ApplicationDescriptor, DeploymentDescriptor, DeploymentDescriptorBuilder, FirewallRuleSpec,
    MachineProfile,
};
pub use orchestrator::{
    DeployError, DeployFailure, DeployMode, DeployOutcome, DeployPath, DeployReport, DeployStage,
    Orchestrator, OrchestratorSettings, ScriptKind,
};
pub use poll::{OperationPoller, PollError};
pub use remote::{
    CommandRunner, ExecutionOutcome, ExecutionResult, ProcessCommandRunner, RemoteConfig,
    RemoteConfigLoadError, RemoteError, RemoteExecutor,
};
pub use reporter::{
    CONFIRMATION_TOKEN, StatusReporter, Teardown, TeardownError, TeardownReport, firewall_notice,
    render_status,
};
pub use script::{ScriptPayload, render, render_update};
pub use verify::{AccessReport, VerifyError, verify_access};
