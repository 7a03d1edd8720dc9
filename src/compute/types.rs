//! Internal vocabulary shared by the facade, the orchestrator, and reporters.

use std::fmt;
use std::net::IpAddr;

/// Identifies an instance by its (project, zone, name) tuple.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct InstanceId {
    /// Provider project identifier.
    pub project: String,
    /// Availability zone (for example `us-central1-a`).
    pub zone: String,
    /// Instance name, unique within the project and zone.
    pub name: String,
}

impl InstanceId {
    /// Builds an identifier from its three components.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        zone: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}/{}", self.project, self.zone, self.name)
    }
}

/// Lifecycle status reported by the provider for an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceStatus {
    /// Resources are being allocated.
    Provisioning,
    /// Resources are allocated and the instance is being prepared for boot.
    Staging,
    /// The instance is booting or running.
    Running,
    /// The instance is shutting down.
    Stopping,
    /// The instance is stopped.
    Terminated,
    /// Any status this crate does not model explicitly.
    Unknown(String),
}

impl InstanceStatus {
    /// Maps the provider's status string onto the modelled lifecycle.
    #[must_use]
    pub fn from_provider(value: &str) -> Self {
        match value {
            "PROVISIONING" => Self::Provisioning,
            "STAGING" => Self::Staging,
            "RUNNING" => Self::Running,
            "STOPPING" => Self::Stopping,
            "TERMINATED" | "STOPPED" => Self::Terminated,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Returns `true` when the instance reports `RUNNING`.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Provisioning => "PROVISIONING",
            Self::Staging => "STAGING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Terminated => "TERMINATED",
            Self::Unknown(other) => other.as_str(),
        };
        formatter.write_str(label)
    }
}

/// Read-through snapshot of an instance as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRecord {
    /// Instance name.
    pub name: String,
    /// Lifecycle status at the time of the read.
    pub status: InstanceStatus,
    /// External NAT address, present once the network interface is allocated.
    pub external_address: Option<IpAddr>,
    /// Short machine type name (for example `e2-medium`).
    pub machine_type: String,
}

/// Parameters for creating an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Target identity of the new instance.
    pub id: InstanceId,
    /// Short machine type name.
    pub machine_type: String,
    /// Project hosting the boot image family.
    pub image_project: String,
    /// Boot image family; the provider resolves the newest image in it.
    pub image_family: String,
    /// Boot disk size in gigabytes.
    pub disk_size_gb: u32,
    /// Boot disk type (for example `pd-balanced`).
    pub disk_type: String,
    /// Network tags applied to the instance; firewall rules target these.
    pub network_tags: Vec<String>,
    /// Script delivered through metadata and executed on first boot.
    pub startup_script: String,
    /// Idempotency key sent with the insert; repeated inserts of one spec
    /// reuse it so the provider creates at most one instance.
    pub request_id: String,
}

/// Where a long-running operation lives.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OperationScope {
    /// Zonal operation (instance insert/delete).
    Zonal(String),
    /// Global operation (firewall insert).
    Global,
}

/// Progress of a long-running operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationStatus {
    /// Queued by the provider.
    Pending,
    /// In progress.
    Running,
    /// Finished, successfully or not.
    Done,
}

impl OperationStatus {
    /// Maps the provider's status string; anything unrecognised is `Pending`.
    #[must_use]
    pub fn from_provider(value: &str) -> Self {
        match value {
            "DONE" => Self::Done,
            "RUNNING" => Self::Running,
            _ => Self::Pending,
        }
    }
}

/// Error payload attached to a completed operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationError {
    /// `(code, message)` pairs reported by the provider.
    pub errors: Vec<(String, String)>,
}

impl fmt::Display for OperationError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .errors
            .iter()
            .map(|(code, message)| format!("{code}: {message}"))
            .collect::<Vec<_>>()
            .join("; ");
        formatter.write_str(&rendered)
    }
}

/// Reference to an in-flight remote mutation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationHandle {
    /// Project owning the operation.
    pub project: String,
    /// Provider operation name.
    pub name: String,
    /// Zonal or global scope, used to re-fetch the operation.
    pub scope: OperationScope,
    /// Last observed status.
    pub status: OperationStatus,
    /// Error payload, only meaningful once `status` is `Done`.
    pub error: Option<OperationError>,
}

impl OperationHandle {
    /// Returns `true` once the provider reports `DONE`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }
}

/// Ingress rule declared by the deployment descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FirewallRule {
    /// Provider-wide rule name.
    pub name: String,
    /// IP protocol (`tcp` or `udp`).
    pub protocol: String,
    /// Destination port.
    pub port: u16,
    /// CIDR allowed to connect.
    pub source_range: String,
    /// Network tag the rule applies to.
    pub target_tag: String,
}

/// Result of an idempotent firewall rule creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FirewallOutcome {
    /// The insert was accepted; the handle tracks it to completion.
    Created(OperationHandle),
    /// A rule with the same name already existed.
    AlreadyExists,
}
