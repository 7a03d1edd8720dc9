//! Failures that end a deployment run.

use thiserror::Error;

use crate::compute::{InstanceStatus, RemoteApiError};
use crate::poll::PollError;
use crate::remote::RemoteError;

use super::DeployStage;

/// A run stopped at `stage` because of `cause`. Nothing already applied is
/// rolled back; re-running is the recovery path.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("deployment failed at {stage}: {cause}")]
pub struct DeployError {
    /// Last stage the run reached.
    pub stage: DeployStage,
    /// What went wrong.
    #[source]
    pub cause: DeployFailure,
}

impl DeployError {
    /// Pairs a cause with the stage the run had reached.
    #[must_use]
    pub const fn new(stage: DeployStage, cause: DeployFailure) -> Self {
        Self { stage, cause }
    }

    /// Operator guidance when the provider rejected the credentials.
    #[must_use]
    pub fn remediation(&self) -> Option<String> {
        self.cause.api_error().and_then(RemoteApiError::remediation)
    }
}

/// Cause of a failed run.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeployFailure {
    /// Creating a firewall rule failed.
    #[error("firewall rule {rule}: {cause}")]
    Firewall {
        /// Provider-wide rule name.
        rule: String,
        /// Underlying failure.
        #[source]
        cause: PollError,
    },
    /// Reading the instance record failed.
    #[error("instance lookup failed: {0}")]
    Lookup(#[source] RemoteApiError),
    /// A fresh deployment found the instance already present.
    #[error("instance {instance} already exists; deploy with --mode existing or auto")]
    InstanceExists {
        /// Instance name.
        instance: String,
    },
    /// An existing-instance deployment found nothing to update.
    #[error("instance {instance} does not exist; deploy it first")]
    InstanceMissing {
        /// Instance name.
        instance: String,
    },
    /// The existing instance is not running.
    #[error("instance {instance} is {status}, expected RUNNING")]
    NotRunning {
        /// Instance name.
        instance: String,
        /// Reported status.
        status: InstanceStatus,
    },
    /// The existing instance has no external address to connect to.
    #[error("instance {instance} has no external address")]
    NoExternalAddress {
        /// Instance name.
        instance: String,
    },
    /// Creating the instance failed.
    #[error("instance creation failed: {0}")]
    Create(#[source] PollError),
    /// Copying the payload failed.
    #[error("payload transfer failed: {0}")]
    Transfer(#[source] RemoteError),
    /// The SSH client could not run the payload.
    #[error("remote execution could not start: {0}")]
    Remote(#[source] RemoteError),
    /// The payload exited non-zero.
    #[error("remote script exited with {}: {stderr}", exit_label(.exit_code))]
    Execution {
        /// Remote exit code; `None` when the session ended without one.
        exit_code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// The instance disappeared before it could be verified.
    #[error("instance {instance} disappeared before verification")]
    InstanceVanished {
        /// Instance name.
        instance: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| String::from("no exit status"), |value| format!("status {value}"))
}

impl DeployFailure {
    /// Provider error behind the failure, if any.
    #[must_use]
    pub const fn api_error(&self) -> Option<&RemoteApiError> {
        match self {
            Self::Lookup(err) => Some(err),
            Self::Firewall { cause, .. } | Self::Create(cause) => cause.api_error(),
            Self::InstanceExists { .. }
            | Self::InstanceMissing { .. }
            | Self::NotRunning { .. }
            | Self::NoExternalAddress { .. }
            | Self::Transfer(_)
            | Self::Remote(_)
            | Self::Execution { .. }
            | Self::InstanceVanished { .. } => None,
        }
    }
}
