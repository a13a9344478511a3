//! Scrape target extraction
//!
//! Turns a resolved task into zero or more scrape targets. Opt-in and
//! overrides are declared per container definition through environment
//! entries, parsed once into a typed [`ContainerScrapeConfig`]. Port and
//! address resolution branch on the networking mode; a problem with one
//! container never aborts extraction of the others.

use crate::models::{
    ContainerDefinition, LaunchType, NetworkMode, ResolvedTask, TaskContainer, TaskDefinition,
};
use crate::models::{resource_id, resource_name, task_definition_version};
use std::collections::BTreeMap;
use tracing::warn;

/// Opt-in flag; any non-empty value enables scraping of the container
pub const ENV_ENABLE: &str = "PROMETHEUS";
/// Metrics path / interval spec, `path` or `interval:path`, comma-separated
pub const ENV_ENDPOINT: &str = "PROMETHEUS_ENDPOINT";
/// Set to "true" to emit only the job and metrics path labels
pub const ENV_NOLABELS: &str = "PROMETHEUS_NOLABELS";
/// Explicit scrape port, wins over any mapping or binding
pub const ENV_PORT: &str = "PROMETHEUS_PORT";
/// Container-side port to select among live bindings (bridge mode)
pub const ENV_CONTAINER_PORT: &str = "PROMETHEUS_CONTAINER_PORT";

/// Scrape port when a host/awsvpc definition declares no port mappings
const FALLBACK_PORT: u16 = 80;

/// Per-container scrape configuration, parsed from environment entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerScrapeConfig {
    pub enabled: bool,
    pub endpoint_spec: Option<String>,
    pub no_labels: bool,
    pub port_override: Option<u16>,
    pub container_port_override: Option<u16>,
}

impl ContainerScrapeConfig {
    pub fn parse(container_name: &str, environment: &[(String, String)]) -> Self {
        let lookup = |key: &str| {
            environment
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.as_str())
        };
        let parse_port = |key: &str| {
            lookup(key).and_then(|value| match value.parse::<u16>() {
                Ok(port) => Some(port),
                Err(_) => {
                    warn!(container = container_name, key, value, "ignoring unparseable port");
                    None
                }
            })
        };
        Self {
            enabled: lookup(ENV_ENABLE).is_some_and(|v| !v.is_empty()),
            endpoint_spec: lookup(ENV_ENDPOINT).map(str::to_string),
            no_labels: lookup(ENV_NOLABELS) == Some("true"),
            port_override: parse_port(ENV_PORT),
            container_port_override: parse_port(ENV_CONTAINER_PORT),
        }
    }
}

/// One address a metrics collector should poll, recomputed every round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget {
    pub ip: String,
    pub port: u16,
    /// Raw metrics path / interval spec, bucketed by the emitter
    pub path_spec: Option<String>,
    pub job: String,
    /// Identity labels; empty in no-labels mode
    pub labels: BTreeMap<String, String>,
}

impl ScrapeTarget {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Extract every scrape target a resolved task contributes.
pub fn extract_targets(resolved: &ResolvedTask) -> Vec<ScrapeTarget> {
    let Some(definition) = &resolved.task_definition else {
        return Vec::new();
    };
    if !resolved.is_valid() {
        return Vec::new();
    }

    let mut targets = Vec::new();
    for container_definition in &definition.container_definitions {
        let config =
            ContainerScrapeConfig::parse(&container_definition.name, &container_definition.environment);
        if !config.enabled {
            continue;
        }
        // Zero, one or many running containers may carry the declared
        // name; each match is its own target. A match that cannot be
        // resolved skips only itself.
        for container in resolved
            .task
            .containers
            .iter()
            .filter(|c| c.name == container_definition.name)
        {
            if let Some(target) =
                extract_one(resolved, definition, container_definition, container, &config)
            {
                targets.push(target);
            }
        }
    }
    targets
}

fn extract_one(
    resolved: &ResolvedTask,
    definition: &TaskDefinition,
    container_definition: &ContainerDefinition,
    container: &TaskContainer,
    config: &ContainerScrapeConfig,
) -> Option<ScrapeTarget> {
    let port = resolve_port(definition.network_mode, container_definition, container, config)?;
    let ip = resolve_ip(resolved, definition.network_mode, container)?;
    let job = resource_name(&definition.arn).unwrap_or_default().to_string();

    let mut labels = BTreeMap::new();
    if !config.no_labels {
        labels.insert("instance".to_string(), format!("{ip}:{port}"));
        labels.insert(
            "ecs_task_id".to_string(),
            resource_id(&resolved.task.task_arn).to_string(),
        );
        labels.insert(
            "ecs_task_version".to_string(),
            task_definition_version(&definition.arn)
                .unwrap_or_default()
                .to_string(),
        );
        labels.insert(
            "ecs_cluster".to_string(),
            resource_name(&resolved.task.cluster_arn)
                .unwrap_or_default()
                .to_string(),
        );
        if resolved.task.launch_type == LaunchType::Ec2 {
            if let Some(container_instance) = &resolved.container_instance {
                labels.insert(
                    "ec2_instance_id".to_string(),
                    container_instance.ec2_instance_id.clone(),
                );
            }
            labels.insert(
                "ecs_container_id".to_string(),
                resource_id(&container.container_arn).to_string(),
            );
        }
    }

    Some(ScrapeTarget {
        ip,
        port,
        path_spec: config.endpoint_spec.clone(),
        job,
        labels,
    })
}

/// Port precedence: explicit override; declared mapping (host/awsvpc,
/// falling back to a fixed port); container-port override matched
/// against live bindings; first live binding.
fn resolve_port(
    mode: NetworkMode,
    container_definition: &ContainerDefinition,
    container: &TaskContainer,
    config: &ContainerScrapeConfig,
) -> Option<u16> {
    if let Some(port) = config.port_override {
        return Some(port);
    }
    match mode {
        NetworkMode::Host | NetworkMode::AwsVpc => Some(
            container_definition
                .port_mappings
                .first()
                .and_then(|mapping| mapping.host_port.or(mapping.container_port))
                .unwrap_or(FALLBACK_PORT),
        ),
        _ => {
            if let Some(container_port) = config.container_port_override {
                let matched = container
                    .network_bindings
                    .iter()
                    .find(|binding| binding.container_port == Some(container_port))
                    .and_then(|binding| binding.host_port);
                if matched.is_none() {
                    warn!(
                        container = %container.name,
                        container_port,
                        "no live binding matches the declared container port, skipping"
                    );
                }
                matched
            } else {
                let first = container
                    .network_bindings
                    .first()
                    .and_then(|binding| binding.host_port);
                if first.is_none() {
                    warn!(container = %container.name, "no live network binding, skipping");
                }
                first
            }
        }
    }
}

/// Address resolution: awsvpc tasks are scraped on their own ENI,
/// everything else on the host's primary private address.
fn resolve_ip(resolved: &ResolvedTask, mode: NetworkMode, container: &TaskContainer) -> Option<String> {
    let ip = match mode {
        NetworkMode::AwsVpc => container.network_interface_ips.first().cloned().or_else(|| {
            // Older agents only report the task ENI on the EC2 instance;
            // pick the first interface that is not the primary one.
            resolved.ec2_instance.as_ref().and_then(|instance| {
                instance
                    .interface_ips
                    .iter()
                    .find(|ip| **ip != instance.private_ip)
                    .cloned()
            })
        }),
        _ => resolved
            .ec2_instance
            .as_ref()
            .map(|instance| instance.private_ip.clone()),
    };
    if ip.is_none() {
        warn!(container = %container.name, "no scrape address resolvable, skipping");
    }
    ip
}
