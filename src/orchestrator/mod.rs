//! Provisioning orchestrator: drives one instance from nothing (or from its
//! current state) to a verified deployment.
//!
//! A run moves through `INIT -> FIREWALL_READY -> INSTANCE_READY ->
//! BOOTSTRAPPED -> DEPLOYED -> VERIFIED`. Each mutating call is polled to
//! `DONE` before the next stage starts. Hard failures stop the run with the
//! last stage reached; an execution timeout ends the run as pending.

use std::net::IpAddr;

use tokio::time::sleep;
use tracing::{Instrument, error, info, info_span, warn};

use crate::compute::{ComputeApi, FirewallOutcome, InstanceId, InstanceRecord};
use crate::descriptor::DeploymentDescriptor;
use crate::poll::{OperationPoller, PollError, deadline_after};
use crate::remote::{CommandRunner, ExecutionOutcome, RemoteExecutor};
use crate::script::{self, ScriptPayload};

mod error;
mod types;

pub use error::{DeployError, DeployFailure};
pub use types::{
    DEFAULT_BOOT_GRACE, DEFAULT_POLL_INTERVAL, DEFAULT_RUN_TIMEOUT, DeployMode, DeployOutcome,
    DeployPath, DeployReport, DeployStage, OrchestratorSettings, ScriptKind, site_urls,
};

/// Drives deployments through the compute facade and the remote executor.
#[derive(Debug)]
pub struct Orchestrator<C, R: CommandRunner> {
    compute: C,
    executor: RemoteExecutor<R>,
    settings: OrchestratorSettings,
}

/// Firewall rule names split by what the run did with them.
#[derive(Default)]
struct FirewallSummary {
    created: Vec<String>,
    existing: Vec<String>,
}

/// Instance the run will deploy onto.
enum Target {
    Fresh,
    Existing { address: IpAddr },
}

impl<C, R> Orchestrator<C, R>
where
    C: ComputeApi,
    R: CommandRunner,
{
    /// Creates an orchestrator with default timings.
    #[must_use]
    pub fn new(compute: C, executor: RemoteExecutor<R>) -> Self {
        Self {
            compute,
            executor,
            settings: OrchestratorSettings::default(),
        }
    }

    /// Overrides the run timings.
    #[must_use]
    pub const fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the compute facade.
    #[must_use]
    pub const fn compute(&self) -> &C {
        &self.compute
    }

    /// Deploys the full bootstrap payload.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError`] carrying the last stage reached when any hard
    /// failure stops the run.
    pub async fn deploy(
        &self,
        descriptor: &DeploymentDescriptor,
        mode: DeployMode,
    ) -> Result<DeployOutcome, DeployError> {
        self.run(descriptor, mode, ScriptKind::Bootstrap).await
    }

    /// Refreshes the application on an existing instance.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError`] when the instance is missing or any stage
    /// fails.
    pub async fn update(
        &self,
        descriptor: &DeploymentDescriptor,
    ) -> Result<DeployOutcome, DeployError> {
        self.run(descriptor, DeployMode::Existing, ScriptKind::Update)
            .await
    }

    /// Runs the state machine with an explicit mode and payload kind.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError`] on any hard failure.
    pub async fn run(
        &self,
        descriptor: &DeploymentDescriptor,
        mode: DeployMode,
        kind: ScriptKind,
    ) -> Result<DeployOutcome, DeployError> {
        let id = descriptor.instance_id();
        let span = info_span!("deploy", instance = %id, mode = ?mode, kind = ?kind);
        let result = self
            .run_stages(descriptor, &id, mode, kind)
            .instrument(span.clone())
            .await;
        span.in_scope(|| match &result {
            Ok(DeployOutcome::Verified(report)) => info!(
                stage = %DeployStage::Verified,
                address = ?report.external_address,
                "deployment verified"
            ),
            Ok(DeployOutcome::Pending { stage, limit, .. }) => warn!(
                stage = %stage,
                limit_secs = limit.as_secs(),
                "remote script is still running after the execution limit; \
                 check progress with `stratus status` before re-running"
            ),
            Err(err) => error!(stage = %err.stage, cause = %err.cause, "deployment failed"),
        });
        result
    }

    async fn run_stages(
        &self,
        descriptor: &DeploymentDescriptor,
        id: &InstanceId,
        mode: DeployMode,
        kind: ScriptKind,
    ) -> Result<DeployOutcome, DeployError> {
        let poller = OperationPoller::new(
            &self.compute,
            self.settings.poll_interval,
            deadline_after(self.settings.run_timeout),
        );
        let payload = match kind {
            ScriptKind::Bootstrap => script::render(descriptor),
            ScriptKind::Update => script::render_update(descriptor),
        };

        let firewall = self.ensure_firewall(descriptor, &poller).await?;
        info!(stage = %DeployStage::FirewallReady, "firewall rules ready");

        let target = self.resolve_target(id, mode, &poller).await?;
        let (path, execution) = match target {
            Target::Fresh => {
                self.create_instance(descriptor, &payload, &poller).await?;
                info!(stage = %DeployStage::InstanceReady, "instance created");
                info!(
                    grace_secs = self.settings.boot_grace.as_secs(),
                    "waiting for the startup script on first boot"
                );
                sleep(self.settings.boot_grace).await;
                info!(stage = %DeployStage::Bootstrapped, "grace period elapsed");
                (DeployPath::Fresh, None)
            }
            Target::Existing { address } => {
                info!(stage = %DeployStage::InstanceReady, %address, "using existing instance");
                let result = match self.push_and_execute(&payload, address)? {
                    ExecutionOutcome::Completed(result) => result,
                    ExecutionOutcome::TimedOut { limit } => {
                        return Ok(DeployOutcome::Pending {
                            instance: id.clone(),
                            stage: DeployStage::InstanceReady,
                            limit,
                        });
                    }
                };
                info!(
                    stage = %DeployStage::Bootstrapped,
                    exit_code = ?result.exit_code,
                    duration_secs = result.duration.as_secs(),
                    "payload finished"
                );
                if !result.is_success() {
                    return Err(DeployError::new(
                        DeployStage::Bootstrapped,
                        DeployFailure::Execution {
                            exit_code: result.exit_code,
                            stderr: result.stderr,
                        },
                    ));
                }
                (DeployPath::Existing, Some(result))
            }
        };
        info!(stage = %DeployStage::Deployed, "deployment applied");

        let record = self.verify(id, &poller).await?;
        if record.external_address.is_none() {
            warn!("instance has no external address yet; address propagation can lag");
        }

        Ok(DeployOutcome::Verified(DeployReport {
            instance: id.clone(),
            path,
            rules_created: firewall.created,
            rules_existing: firewall.existing,
            external_address: record.external_address,
            execution,
        }))
    }

    async fn ensure_firewall(
        &self,
        descriptor: &DeploymentDescriptor,
        poller: &OperationPoller<'_, C>,
    ) -> Result<FirewallSummary, DeployError> {
        let mut summary = FirewallSummary::default();
        for rule in descriptor.firewall_rules() {
            let fail = |cause: PollError| {
                DeployError::new(
                    DeployStage::Init,
                    DeployFailure::Firewall {
                        rule: rule.name.clone(),
                        cause,
                    },
                )
            };
            let outcome = poller
                .retry("firewall insert", || {
                    self.compute
                        .create_firewall_rule(descriptor.project_id(), &rule)
                })
                .await
                .map_err(|err| fail(PollError::Api(err)))?;
            match outcome {
                FirewallOutcome::Created(handle) => {
                    poller.wait(handle).await.map_err(fail)?;
                    info!(rule = %rule.name, port = rule.port, "firewall rule created");
                    summary.created.push(rule.name);
                }
                FirewallOutcome::AlreadyExists => {
                    info!(rule = %rule.name, "firewall rule already exists");
                    summary.existing.push(rule.name);
                }
            }
        }
        Ok(summary)
    }

    async fn resolve_target(
        &self,
        id: &InstanceId,
        mode: DeployMode,
        poller: &OperationPoller<'_, C>,
    ) -> Result<Target, DeployError> {
        let fail = |cause| DeployError::new(DeployStage::FirewallReady, cause);
        let existing = poller
            .retry("instance lookup", || self.compute.get_instance(id))
            .await
            .map_err(|err| fail(DeployFailure::Lookup(err)))?;

        match (mode, existing) {
            (DeployMode::Fresh | DeployMode::Auto, None) => Ok(Target::Fresh),
            (DeployMode::Fresh, Some(_)) => Err(fail(DeployFailure::InstanceExists {
                instance: id.name.clone(),
            })),
            (DeployMode::Existing, None) => Err(fail(DeployFailure::InstanceMissing {
                instance: id.name.clone(),
            })),
            (DeployMode::Existing | DeployMode::Auto, Some(record)) => {
                existing_target(id, record).map_err(fail)
            }
        }
    }

    async fn create_instance(
        &self,
        descriptor: &DeploymentDescriptor,
        payload: &ScriptPayload,
        poller: &OperationPoller<'_, C>,
    ) -> Result<(), DeployError> {
        let fail = |cause| {
            DeployError::new(DeployStage::FirewallReady, DeployFailure::Create(cause))
        };
        // One spec, one request id: a repeated insert cannot create a twin.
        let spec = descriptor.instance_spec(payload);
        let handle = poller
            .retry("instance insert", || self.compute.create_instance(&spec))
            .await
            .map_err(|err| fail(PollError::Api(err)))?;
        info!(operation = %handle.name, "instance insert accepted");
        poller.wait(handle).await.map_err(fail)?;
        Ok(())
    }

    fn push_and_execute(
        &self,
        payload: &ScriptPayload,
        address: IpAddr,
    ) -> Result<ExecutionOutcome, DeployError> {
        let target = self.executor.target_for(address);
        self.executor.push(payload, &target).map_err(|err| {
            DeployError::new(DeployStage::InstanceReady, DeployFailure::Transfer(err))
        })?;
        info!(bytes = payload.len(), "payload transferred");
        self.executor
            .execute(
                &target,
                &self.executor.script_command(),
                self.settings.execution_timeout,
            )
            .map_err(|err| DeployError::new(DeployStage::InstanceReady, DeployFailure::Remote(err)))
    }

    async fn verify(
        &self,
        id: &InstanceId,
        poller: &OperationPoller<'_, C>,
    ) -> Result<InstanceRecord, DeployError> {
        let fail = |cause| DeployError::new(DeployStage::Deployed, cause);
        poller
            .retry("instance lookup", || self.compute.get_instance(id))
            .await
            .map_err(|err| fail(DeployFailure::Lookup(err)))?
            .ok_or_else(|| {
                fail(DeployFailure::InstanceVanished {
                    instance: id.name.clone(),
                })
            })
    }
}

fn existing_target(id: &InstanceId, record: InstanceRecord) -> Result<Target, DeployFailure> {
    if !record.status.is_running() {
        return Err(DeployFailure::NotRunning {
            instance: id.name.clone(),
            status: record.status,
        });
    }
    record
        .external_address
        .map(|address| Target::Existing { address })
        .ok_or_else(|| DeployFailure::NoExternalAddress {
            instance: id.name.clone(),
        })
}
