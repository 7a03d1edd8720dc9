//! Deployment descriptor: the immutable input of one run.
//!
//! A [`DeploymentDescriptor`] is built once, either from [`DeployConfig`] or
//! through [`DeploymentDescriptorBuilder`], and then only borrowed. Every
//! field is validated at construction so the orchestrator never issues a
//! remote call for a malformed target.

use uuid::Uuid;

use crate::compute::{FirewallRule, InstanceId, InstanceSpec};
use crate::config::{ConfigError, DeployConfig, FieldMetadata};
use crate::script::ScriptPayload;

/// CIDR every declared ingress rule admits.
pub const OPEN_SOURCE_RANGE: &str = "0.0.0.0/0";

const MAX_RESOURCE_NAME_LEN: usize = 63;
const MIN_BOOT_DISK_GB: u32 = 10;

/// Machine shape and boot disk of the instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineProfile {
    /// Machine type (for example `e2-medium`).
    pub machine_type: String,
    /// Project publishing the image family.
    pub image_project: String,
    /// Image family to boot from.
    pub image_family: String,
    /// Boot disk size in gigabytes.
    pub disk_size_gb: u32,
    /// Boot disk type.
    pub disk_type: String,
}

/// Application deployed onto the instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApplicationDescriptor {
    /// Application name; names the process, the web root, and the vhost.
    pub name: String,
    /// Git URL to clone.
    pub repo_url: String,
    /// Branch to track.
    pub branch: String,
    /// Local port the application listens on.
    pub port: u16,
}

/// Declared ingress rule before it is bound to an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FirewallRuleSpec {
    /// Short rule name; the provider-wide name is `<app>-<name>`.
    pub name: String,
    /// `tcp` or `udp`.
    pub protocol: String,
    /// Destination port.
    pub port: u16,
}

impl FirewallRuleSpec {
    /// Parses a comma-separated list of `name:protocol:port` entries.
    ///
    /// Blank input yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when an entry is malformed.
    pub fn parse_list(value: &str) -> Result<Vec<Self>, ConfigError> {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Self::parse)
            .collect()
    }

    fn parse(entry: &str) -> Result<Self, ConfigError> {
        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        let [name, protocol, port] = parts.as_slice() else {
            return Err(invalid(
                "firewall_rules",
                format!("'{entry}' is not in name:protocol:port form"),
            ));
        };
        let parsed_port = port.parse::<u16>().map_err(|err| {
            invalid("firewall_rules", format!("'{entry}' has an invalid port: {err}"))
        })?;
        Ok(Self {
            name: (*name).to_owned(),
            protocol: protocol.to_ascii_lowercase(),
            port: parsed_port,
        })
    }
}

/// Everything a run needs to know about its single target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentDescriptor {
    project_id: String,
    zone: String,
    instance_name: String,
    machine: MachineProfile,
    application: ApplicationDescriptor,
    runtime_version: String,
    firewall_rules: Vec<FirewallRuleSpec>,
}

impl DeploymentDescriptor {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> DeploymentDescriptorBuilder {
        DeploymentDescriptorBuilder::default()
    }

    /// Builds a descriptor from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required field is empty or a value is
    /// malformed.
    pub fn from_config(config: &DeployConfig) -> Result<Self, ConfigError> {
        FieldMetadata::new("project id", "STRATUS_PROJECT_ID", "project_id")
            .require(&config.project_id)?;
        FieldMetadata::new("instance name", "STRATUS_INSTANCE_NAME", "instance_name")
            .require(&config.instance_name)?;
        FieldMetadata::new("application name", "STRATUS_APP_NAME", "app_name")
            .require(&config.app_name)?;
        FieldMetadata::new("repository URL", "STRATUS_REPO_URL", "repo_url")
            .require(&config.repo_url)?;

        let rules = FirewallRuleSpec::parse_list(&config.firewall_rules)?;
        rules
            .into_iter()
            .fold(Self::builder(), DeploymentDescriptorBuilder::firewall_rule)
            .project_id(&config.project_id)
            .zone(&config.zone)
            .instance_name(&config.instance_name)
            .machine(MachineProfile {
                machine_type: config.machine_type.clone(),
                image_project: config.image_project.clone(),
                image_family: config.image_family.clone(),
                disk_size_gb: config.boot_disk_size_gb,
                disk_type: config.boot_disk_type.clone(),
            })
            .application(ApplicationDescriptor {
                name: config.app_name.clone(),
                repo_url: config.repo_url.clone(),
                branch: config.branch.clone(),
                port: config.app_port,
            })
            .runtime_version(&config.runtime_version)
            .build()
    }

    /// Project identifier.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Availability zone.
    #[must_use]
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Instance name.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Machine shape.
    #[must_use]
    pub const fn machine(&self) -> &MachineProfile {
        &self.machine
    }

    /// Application settings.
    #[must_use]
    pub const fn application(&self) -> &ApplicationDescriptor {
        &self.application
    }

    /// Node.js major version.
    #[must_use]
    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    /// Declared ingress rules in declaration order.
    #[must_use]
    pub fn firewall_rule_specs(&self) -> &[FirewallRuleSpec] {
        &self.firewall_rules
    }

    /// Identity of the target instance.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        InstanceId::new(&self.project_id, &self.zone, &self.instance_name)
    }

    /// Network tag carried by the instance and targeted by its rules.
    #[must_use]
    pub fn network_tag(&self) -> &str {
        &self.instance_name
    }

    /// Provider firewall rules, in declaration order.
    #[must_use]
    pub fn firewall_rules(&self) -> Vec<FirewallRule> {
        self.firewall_rules
            .iter()
            .map(|rule| FirewallRule {
                name: format!("{}-{}", self.application.name, rule.name),
                protocol: rule.protocol.clone(),
                port: rule.port,
                source_range: OPEN_SOURCE_RANGE.to_owned(),
                target_tag: self.network_tag().to_owned(),
            })
            .collect()
    }

    /// Creation parameters with `payload` attached as the startup script.
    ///
    /// Each call mints a new insert request id.
    #[must_use]
    pub fn instance_spec(&self, payload: &ScriptPayload) -> InstanceSpec {
        InstanceSpec {
            id: self.instance_id(),
            machine_type: self.machine.machine_type.clone(),
            image_project: self.machine.image_project.clone(),
            image_family: self.machine.image_family.clone(),
            disk_size_gb: self.machine.disk_size_gb,
            disk_type: self.machine.disk_type.clone(),
            network_tags: vec![self.network_tag().to_owned()],
            startup_script: payload.as_str().to_owned(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require("project_id", &self.project_id)?;
        require("zone", &self.zone)?;
        require_resource_name("instance_name", &self.instance_name)?;
        require("machine_type", &self.machine.machine_type)?;
        require("image_project", &self.machine.image_project)?;
        require("image_family", &self.machine.image_family)?;
        require("boot_disk_type", &self.machine.disk_type)?;
        if self.machine.disk_size_gb < MIN_BOOT_DISK_GB {
            return Err(invalid(
                "boot_disk_size_gb",
                format!("must be at least {MIN_BOOT_DISK_GB}"),
            ));
        }

        require_resource_name("app_name", &self.application.name)?;
        require("repo_url", &self.application.repo_url)?;
        require("branch", &self.application.branch)?;
        if self.application.port == 0 {
            return Err(invalid("app_port", String::from("must not be zero")));
        }

        if self.runtime_version.is_empty()
            || !self.runtime_version.chars().all(|ch| ch.is_ascii_digit())
        {
            return Err(invalid(
                "runtime_version",
                format!("'{}' is not a major version number", self.runtime_version),
            ));
        }

        self.validate_firewall_rules()
    }

    fn validate_firewall_rules(&self) -> Result<(), ConfigError> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.firewall_rules.len());
        for rule in &self.firewall_rules {
            require_resource_name("firewall_rules", &rule.name)?;
            let full_name = format!("{}-{}", self.application.name, rule.name);
            if full_name.len() > MAX_RESOURCE_NAME_LEN {
                return Err(invalid(
                    "firewall_rules",
                    format!("'{full_name}' exceeds {MAX_RESOURCE_NAME_LEN} characters"),
                ));
            }
            if !matches!(rule.protocol.as_str(), "tcp" | "udp") {
                return Err(invalid(
                    "firewall_rules",
                    format!("'{}' uses unsupported protocol '{}'", rule.name, rule.protocol),
                ));
            }
            if rule.port == 0 {
                return Err(invalid(
                    "firewall_rules",
                    format!("'{}' must not use port zero", rule.name),
                ));
            }
            if seen.contains(&rule.name.as_str()) {
                return Err(invalid(
                    "firewall_rules",
                    format!("'{}' is declared more than once", rule.name),
                ));
            }
            seen.push(&rule.name);
        }
        Ok(())
    }
}

/// Builder for [`DeploymentDescriptor`]; trims string inputs and validates on
/// [`build`](Self::build).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeploymentDescriptorBuilder {
    project_id: String,
    zone: String,
    instance_name: String,
    machine: Option<MachineProfile>,
    application: Option<ApplicationDescriptor>,
    runtime_version: String,
    firewall_rules: Vec<FirewallRuleSpec>,
}

impl DeploymentDescriptorBuilder {
    /// Sets the project identifier.
    #[must_use]
    pub fn project_id(mut self, value: impl Into<String>) -> Self {
        self.project_id = value.into();
        self
    }

    /// Sets the availability zone.
    #[must_use]
    pub fn zone(mut self, value: impl Into<String>) -> Self {
        self.zone = value.into();
        self
    }

    /// Sets the instance name.
    #[must_use]
    pub fn instance_name(mut self, value: impl Into<String>) -> Self {
        self.instance_name = value.into();
        self
    }

    /// Sets the machine profile.
    #[must_use]
    pub fn machine(mut self, value: MachineProfile) -> Self {
        self.machine = Some(value);
        self
    }

    /// Sets the application.
    #[must_use]
    pub fn application(mut self, value: ApplicationDescriptor) -> Self {
        self.application = Some(value);
        self
    }

    /// Sets the runtime major version.
    #[must_use]
    pub fn runtime_version(mut self, value: impl Into<String>) -> Self {
        self.runtime_version = value.into();
        self
    }

    /// Appends an ingress rule; order of calls is the creation order.
    #[must_use]
    pub fn firewall_rule(mut self, value: FirewallRuleSpec) -> Self {
        self.firewall_rules.push(value);
        self
    }

    /// Builds and validates the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the machine profile or the
    /// application is unset, and [`ConfigError::InvalidField`] or
    /// [`ConfigError::MissingField`] for malformed values.
    pub fn build(self) -> Result<DeploymentDescriptor, ConfigError> {
        let machine = self
            .machine
            .ok_or_else(|| ConfigError::MissingField(String::from("machine profile")))?;
        let application = self
            .application
            .ok_or_else(|| ConfigError::MissingField(String::from("application")))?;

        let descriptor = DeploymentDescriptor {
            project_id: self.project_id.trim().to_owned(),
            zone: self.zone.trim().to_owned(),
            instance_name: self.instance_name.trim().to_owned(),
            machine: MachineProfile {
                machine_type: machine.machine_type.trim().to_owned(),
                image_project: machine.image_project.trim().to_owned(),
                image_family: machine.image_family.trim().to_owned(),
                disk_size_gb: machine.disk_size_gb,
                disk_type: machine.disk_type.trim().to_owned(),
            },
            application: ApplicationDescriptor {
                name: application.name.trim().to_owned(),
                repo_url: application.repo_url.trim().to_owned(),
                branch: application.branch.trim().to_owned(),
                port: application.port,
            },
            runtime_version: self.runtime_version.trim().to_owned(),
            firewall_rules: self
                .firewall_rules
                .into_iter()
                .map(|rule| FirewallRuleSpec {
                    name: rule.name.trim().to_owned(),
                    protocol: rule.protocol.trim().to_ascii_lowercase(),
                    port: rule.port,
                })
                .collect(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

fn require(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::MissingField(field.to_owned()));
    }
    Ok(())
}

/// Names must start with a lowercase letter, contain only lowercase letters,
/// digits, and hyphens, and not end with a hyphen.
fn require_resource_name(field: &str, value: &str) -> Result<(), ConfigError> {
    require(field, value)?;
    let starts_with_letter = value.chars().next().is_some_and(|ch| ch.is_ascii_lowercase());
    let charset_ok = value
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-');
    if !starts_with_letter || !charset_ok || value.ends_with('-') {
        return Err(invalid(
            field,
            format!("'{value}' must match [a-z]([-a-z0-9]*[a-z0-9])?"),
        ));
    }
    if value.len() > MAX_RESOURCE_NAME_LEN {
        return Err(invalid(
            field,
            format!("'{value}' exceeds {MAX_RESOURCE_NAME_LEN} characters"),
        ));
    }
    Ok(())
}

fn invalid(field: &str, reason: String) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_owned(),
        reason,
    }
}
