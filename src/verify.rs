//! Pre-flight check that the configured credentials can reach the compute
//! API for the target project and zone.

use thiserror::Error;
use tracing::{info, warn};

use crate::compute::{ComputeApi, InstanceId, RemoteApiError};

/// Result of a successful access check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessReport {
    /// Instance used for the probe.
    pub instance: InstanceId,
    /// Whether the probed instance already exists.
    pub instance_exists: bool,
}

/// Errors raised by [`verify_access`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VerifyError {
    /// Credentials were rejected or lack permissions.
    #[error("{cause}; {remediation}")]
    Denied {
        /// Provider rejection.
        cause: RemoteApiError,
        /// Operator guidance.
        remediation: String,
    },
    /// Any other failure of the probe call.
    #[error("access check failed: {0}")]
    Api(RemoteApiError),
}

/// Issues one read call for `id` and classifies the result.
///
/// # Errors
///
/// Returns [`VerifyError::Denied`] for authentication or authorisation
/// failures and [`VerifyError::Api`] for anything else.
pub async fn verify_access<C: ComputeApi>(
    compute: &C,
    id: &InstanceId,
) -> Result<AccessReport, VerifyError> {
    match compute.get_instance(id).await {
        Ok(record) => {
            info!(instance = %id, exists = record.is_some(), "compute API access confirmed");
            Ok(AccessReport {
                instance: id.clone(),
                instance_exists: record.is_some(),
            })
        }
        Err(err) => match err.remediation() {
            Some(remediation) => {
                warn!(instance = %id, error = %err, "compute API access denied");
                Err(VerifyError::Denied {
                    cause: err,
                    remediation,
                })
            }
            None => Err(VerifyError::Api(err)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeCompute;
    use rstest::rstest;

    fn id() -> InstanceId {
        InstanceId::new("demo-project", "us-central1-a", "web-01")
    }

    #[rstest]
    #[case::absent(false)]
    #[case::present(true)]
    #[tokio::test]
    async fn readable_project_is_confirmed(#[case] exists: bool) {
        let compute = FakeCompute::new();
        if exists {
            compute.set_running_instance("web-01", None);
        }

        let report = verify_access(&compute, &id()).await.expect("access");

        assert_eq!(report.instance_exists, exists);
        assert_eq!(compute.calls().len(), 1);
    }

    #[rstest]
    #[case(RemoteApiError::from_status(401, "invalid credentials"))]
    #[case(RemoteApiError::from_status(403, "compute.instances.get denied"))]
    #[tokio::test]
    async fn rejected_credentials_carry_remediation(#[case] rejection: RemoteApiError) {
        let compute = FakeCompute::new();
        compute.fail_get(rejection.clone());

        let err = verify_access(&compute, &id()).await.expect_err("denied");

        let VerifyError::Denied { cause, remediation } = err else {
            panic!("expected a denial");
        };
        assert_eq!(cause, rejection);
        assert!(remediation.contains("roles/iam.serviceAccountUser"));
    }

    #[tokio::test]
    async fn other_failures_are_not_denials() {
        let compute = FakeCompute::new();
        compute.fail_get(RemoteApiError::from_status(503, "backend unavailable"));

        let err = verify_access(&compute, &id()).await.expect_err("failed");

        assert!(matches!(err, VerifyError::Api(ref inner) if inner.is_transient()));
    }
}
