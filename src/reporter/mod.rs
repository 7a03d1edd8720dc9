//! Read-only status reporting and confirmed teardown of an instance.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::{Instrument, info, info_span};

use crate::compute::{ComputeApi, InstanceId, InstanceRecord, RemoteApiError};
use crate::orchestrator::{DEFAULT_POLL_INTERVAL, DEFAULT_RUN_TIMEOUT, site_urls};
use crate::poll::{OperationPoller, PollError, deadline_after};

/// Literal the operator must type to confirm a teardown. Case-sensitive.
pub const CONFIRMATION_TOKEN: &str = "DELETE";

/// Reads the current state of an instance.
#[derive(Clone, Debug)]
pub struct StatusReporter<C> {
    compute: C,
}

impl<C: ComputeApi> StatusReporter<C> {
    /// Creates a reporter over the compute facade.
    #[must_use]
    pub const fn new(compute: C) -> Self {
        Self { compute }
    }

    /// Fetches the instance record, or `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteApiError`] when the lookup fails.
    pub async fn status(&self, id: &InstanceId) -> Result<Option<InstanceRecord>, RemoteApiError> {
        let span = info_span!("status", instance = %id);
        self.compute.get_instance(id).instrument(span).await
    }
}

/// Renders a status lookup for humans.
///
/// `app_port` is the port the application itself listens on; the report
/// includes a URL that bypasses the reverse proxy.
#[must_use]
pub fn render_status(id: &InstanceId, record: Option<&InstanceRecord>, app_port: u16) -> String {
    let Some(found) = record else {
        return format!(
            "Instance {} was not found in project {} zone {}.\nRun `stratus deploy` to create it.\n",
            id.name, id.project, id.zone
        );
    };

    let mut text = String::new();
    let address = found
        .external_address
        .map_or_else(|| String::from("(none)"), |ip| ip.to_string());
    // Writing to a String cannot fail.
    writeln!(text, "Instance:     {}", found.name).ok();
    writeln!(text, "Status:       {}", found.status).ok();
    writeln!(text, "Machine type: {}", found.machine_type).ok();
    writeln!(text, "Zone:         {}", id.zone).ok();
    writeln!(text, "External IP:  {address}").ok();
    if let Some(ip) = found.external_address {
        for url in site_urls(ip) {
            writeln!(text, "Site:         {url}").ok();
        }
        writeln!(text, "App (direct): http://{}", SocketAddr::new(ip, app_port)).ok();
    }
    if !found.status.is_running() {
        writeln!(text, "The instance is not running; start it before deploying.").ok();
    }
    text
}

/// Errors raised by [`Teardown::destroy`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TeardownError {
    /// The confirmation literal was absent or did not match exactly.
    #[error("teardown not confirmed: type {CONFIRMATION_TOKEN} exactly to delete the instance")]
    NotConfirmed,
    /// The instance does not exist.
    #[error("instance {instance} was not found; nothing to delete")]
    NotFound {
        /// Instance name.
        instance: String,
    },
    /// The delete request was rejected.
    #[error("delete request failed: {0}")]
    Api(RemoteApiError),
    /// The delete operation failed or did not finish in time.
    #[error("delete did not complete: {0}")]
    Poll(PollError),
}

impl TeardownError {
    /// Operator guidance for permission failures.
    #[must_use]
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::Api(err) | Self::Poll(PollError::Api(err)) => err.remediation(),
            _ => None,
        }
    }
}

/// Completed teardown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TeardownReport {
    /// Deleted instance.
    pub instance: InstanceId,
    /// Provider operation that performed the delete.
    pub operation: String,
}

/// Deletes an instance after an explicit confirmation.
#[derive(Clone, Debug)]
pub struct Teardown<C> {
    compute: C,
    poll_interval: Duration,
    timeout: Duration,
}

impl<C: ComputeApi> Teardown<C> {
    /// Creates a teardown helper with default polling.
    #[must_use]
    pub const fn new(compute: C) -> Self {
        Self {
            compute,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    /// Overrides the poll interval and the bound on the delete operation.
    #[must_use]
    pub const fn with_timing(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.timeout = timeout;
        self
    }

    /// Deletes `id` when `confirmation` is exactly [`CONFIRMATION_TOKEN`].
    ///
    /// Firewall rules are not touched.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError::NotConfirmed`] without any remote call when the
    /// confirmation does not match, and the remaining variants when the delete
    /// fails.
    pub async fn destroy(
        &self,
        id: &InstanceId,
        confirmation: Option<&str>,
    ) -> Result<TeardownReport, TeardownError> {
        if confirmation != Some(CONFIRMATION_TOKEN) {
            return Err(TeardownError::NotConfirmed);
        }

        let span = info_span!("destroy", instance = %id);
        async {
            let handle = self
                .compute
                .delete_instance(id)
                .await
                .map_err(|err| match err {
                    RemoteApiError::NotFound { .. } => TeardownError::NotFound {
                        instance: id.name.clone(),
                    },
                    other => TeardownError::Api(other),
                })?;
            info!(operation = %handle.name, "delete accepted");

            let deadline = deadline_after(self.timeout);
            let poller = OperationPoller::new(&self.compute, self.poll_interval, deadline);
            let done = poller.wait(handle).await.map_err(TeardownError::Poll)?;
            info!("instance deleted");
            Ok(TeardownReport {
                instance: id.clone(),
                operation: done.name,
            })
        }
        .instrument(span)
        .await
    }
}

/// Reminder printed after a teardown: firewall rules outlive the instance.
#[must_use]
pub fn firewall_notice(rules: &[String]) -> String {
    if rules.is_empty() {
        return String::from("Firewall rules were left in place.");
    }
    format!(
        "Firewall rules were left in place; remove them with `gcloud compute firewall-rules delete {}` if nothing else uses them.",
        rules.join(" ")
    )
}
