//! JSON bodies exchanged with the Compute Engine v1 REST API.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::compute::{
    FirewallRule, InstanceRecord, InstanceSpec, InstanceStatus, OperationError,
    OperationHandle, OperationScope, OperationStatus,
};

const DEFAULT_NETWORK: &str = "global/networks/default";
const EXTERNAL_NAT: &str = "External NAT";
const ONE_TO_ONE_NAT: &str = "ONE_TO_ONE_NAT";
const STARTUP_SCRIPT_KEY: &str = "startup-script";
const INGRESS: &str = "INGRESS";
const FIREWALL_PRIORITY: u32 = 1000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InstanceInsert {
    name: String,
    machine_type: String,
    disks: Vec<AttachedDisk>,
    network_interfaces: Vec<NetworkInterface>,
    metadata: Metadata,
    tags: Tags,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachedDisk {
    boot: bool,
    auto_delete: bool,
    initialize_params: InitializeParams,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    source_image: String,
    // int64 fields travel as strings in the v1 API.
    disk_size_gb: String,
    disk_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    network: &'static str,
    access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Serialize)]
struct AccessConfig {
    name: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct Metadata {
    items: Vec<MetadataItem>,
}

#[derive(Debug, Serialize)]
struct MetadataItem {
    key: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
struct Tags {
    items: Vec<String>,
}

impl From<&InstanceSpec> for InstanceInsert {
    fn from(spec: &InstanceSpec) -> Self {
        Self {
            name: spec.id.name.clone(),
            machine_type: format!("zones/{}/machineTypes/{}", spec.id.zone, spec.machine_type),
            disks: vec![AttachedDisk {
                boot: true,
                auto_delete: true,
                initialize_params: InitializeParams {
                    source_image: format!(
                        "projects/{}/global/images/family/{}",
                        spec.image_project, spec.image_family
                    ),
                    disk_size_gb: spec.disk_size_gb.to_string(),
                    disk_type: format!("zones/{}/diskTypes/{}", spec.id.zone, spec.disk_type),
                },
            }],
            network_interfaces: vec![NetworkInterface {
                network: DEFAULT_NETWORK,
                access_configs: vec![AccessConfig {
                    name: EXTERNAL_NAT,
                    kind: ONE_TO_ONE_NAT,
                }],
            }],
            metadata: Metadata {
                items: vec![MetadataItem {
                    key: STARTUP_SCRIPT_KEY,
                    value: spec.startup_script.clone(),
                }],
            },
            tags: Tags {
                items: spec.network_tags.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FirewallInsert {
    name: String,
    network: &'static str,
    direction: &'static str,
    priority: u32,
    allowed: Vec<Allowed>,
    source_ranges: Vec<String>,
    target_tags: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Allowed {
    #[serde(rename = "IPProtocol")]
    ip_protocol: String,
    ports: Vec<String>,
}

impl From<&FirewallRule> for FirewallInsert {
    fn from(rule: &FirewallRule) -> Self {
        Self {
            name: rule.name.clone(),
            network: DEFAULT_NETWORK,
            direction: INGRESS,
            priority: FIREWALL_PRIORITY,
            allowed: vec![Allowed {
                ip_protocol: rule.protocol.clone(),
                ports: vec![rule.port.to_string()],
            }],
            source_ranges: vec![rule.source_range.clone()],
            target_tags: vec![rule.target_tag.clone()],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InstanceResource {
    name: String,
    status: String,
    #[serde(default)]
    machine_type: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterfaceResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterfaceResource {
    #[serde(default)]
    access_configs: Vec<AccessConfigResource>,
}

#[derive(Debug, Deserialize)]
struct AccessConfigResource {
    #[serde(rename = "natIP")]
    nat_ip: Option<String>,
}

impl From<InstanceResource> for InstanceRecord {
    fn from(resource: InstanceResource) -> Self {
        let external_address = resource
            .network_interfaces
            .iter()
            .flat_map(|nic| nic.access_configs.iter())
            .find_map(|config| config.nat_ip.as_deref()?.parse::<IpAddr>().ok());
        Self {
            name: resource.name,
            status: InstanceStatus::from_provider(&resource.status),
            external_address,
            machine_type: last_segment(&resource.machine_type).to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct OperationResource {
    name: String,
    status: String,
    zone: Option<String>,
    error: Option<OperationErrorResource>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorResource {
    #[serde(default)]
    errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorItem {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl OperationResource {
    pub(super) fn into_handle(self, project: &str) -> OperationHandle {
        let scope = self.zone.as_deref().map_or(OperationScope::Global, |zone| {
            OperationScope::Zonal(last_segment(zone).to_owned())
        });
        let error = self.error.map(|payload| OperationError {
            errors: payload
                .errors
                .into_iter()
                .map(|item| (item.code, item.message))
                .collect(),
        });
        OperationHandle {
            project: project.to_owned(),
            name: self.name,
            scope,
            status: OperationStatus::from_provider(&self.status),
            error,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Extracts `error.message` from a failure body, falling back to the raw
/// text.
pub(super) fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| body.trim().to_owned())
}

fn last_segment(value: &str) -> &str {
    value.rsplit('/').next().unwrap_or(value)
}
