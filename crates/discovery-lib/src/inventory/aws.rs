//! AWS-backed inventory implementation
//!
//! Wraps the ECS and EC2 SDK clients, paginating the list calls and
//! chunking the describe calls at the provider batch ceiling, and
//! converts SDK types into the crate's own models.

use super::{async_trait, Inventory, DESCRIBE_BATCH_LIMIT};
use crate::models::{
    ContainerDefinition, ContainerInstance, Ec2Instance, LaunchType, NetworkBinding, NetworkMode,
    PortMapping, Task, TaskContainer, TaskDefinition,
};
use anyhow::{Context, Result};
use aws_sdk_ecs::types as ecs;
use std::collections::HashMap;

/// Inventory over the real ECS/EC2 APIs
#[derive(Debug, Clone)]
pub struct AwsInventory {
    ecs: aws_sdk_ecs::Client,
    ec2: aws_sdk_ec2::Client,
}

impl AwsInventory {
    pub fn new(ecs: aws_sdk_ecs::Client, ec2: aws_sdk_ec2::Client) -> Self {
        Self { ecs, ec2 }
    }
}

#[async_trait]
impl Inventory for AwsInventory {
    async fn list_clusters(&self) -> Result<Vec<String>> {
        let mut arns = Vec::new();
        let mut pages = self.ecs.list_clusters().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.context("listing clusters")?;
            arns.extend(page.cluster_arns().iter().cloned());
        }
        Ok(arns)
    }

    async fn list_tasks(&self, cluster: &str, launch_type: LaunchType) -> Result<Vec<String>> {
        let sdk_launch_type = match launch_type {
            LaunchType::Ec2 => ecs::LaunchType::Ec2,
            LaunchType::Fargate => ecs::LaunchType::Fargate,
        };
        let mut arns = Vec::new();
        let mut pages = self
            .ecs
            .list_tasks()
            .cluster(cluster)
            .launch_type(sdk_launch_type)
            .desired_status(ecs::DesiredStatus::Running)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page
                .with_context(|| format!("listing {} tasks in {cluster}", launch_type.as_str()))?;
            arns.extend(page.task_arns().iter().cloned());
        }
        Ok(arns)
    }

    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> Result<HashMap<String, Task>> {
        let mut tasks = HashMap::new();
        for chunk in task_arns.chunks(DESCRIBE_BATCH_LIMIT) {
            let out = self
                .ecs
                .describe_tasks()
                .cluster(cluster)
                .set_tasks(Some(chunk.to_vec()))
                .send()
                .await
                .with_context(|| format!("describing tasks in {cluster}"))?;
            for task in out.tasks() {
                if let Some(converted) = convert_task(task) {
                    tasks.insert(converted.task_arn.clone(), converted);
                }
            }
        }
        Ok(tasks)
    }

    async fn describe_task_definition(&self, arn: &str) -> Result<Option<TaskDefinition>> {
        let out = self
            .ecs
            .describe_task_definition()
            .task_definition(arn)
            .send()
            .await
            .with_context(|| format!("describing task definition {arn}"))?;
        Ok(out.task_definition().and_then(convert_definition))
    }

    async fn describe_container_instances(
        &self,
        cluster: &str,
        arns: &[String],
    ) -> Result<HashMap<String, ContainerInstance>> {
        let mut instances = HashMap::new();
        for chunk in arns.chunks(DESCRIBE_BATCH_LIMIT) {
            let out = self
                .ecs
                .describe_container_instances()
                .cluster(cluster)
                .set_container_instances(Some(chunk.to_vec()))
                .send()
                .await
                .with_context(|| format!("describing container instances in {cluster}"))?;
            for ci in out.container_instances() {
                if let (Some(arn), Some(ec2_id)) = (ci.container_instance_arn(), ci.ec2_instance_id())
                {
                    instances.insert(
                        arn.to_string(),
                        ContainerInstance {
                            arn: arn.to_string(),
                            ec2_instance_id: ec2_id.to_string(),
                        },
                    );
                }
            }
        }
        Ok(instances)
    }

    async fn describe_ec2_instances(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Ec2Instance>> {
        let mut instances = HashMap::new();
        for chunk in ids.chunks(DESCRIBE_BATCH_LIMIT) {
            let out = self
                .ec2
                .describe_instances()
                .set_instance_ids(Some(chunk.to_vec()))
                .send()
                .await
                .context("describing EC2 instances")?;
            for reservation in out.reservations() {
                for instance in reservation.instances() {
                    if let Some(converted) = convert_ec2_instance(instance) {
                        instances.insert(converted.instance_id.clone(), converted);
                    }
                }
            }
        }
        Ok(instances)
    }
}

fn convert_task(task: &ecs::Task) -> Option<Task> {
    let launch_type = match task.launch_type() {
        Some(ecs::LaunchType::Fargate) => LaunchType::Fargate,
        _ => LaunchType::Ec2,
    };
    Some(Task {
        task_arn: task.task_arn()?.to_string(),
        cluster_arn: task.cluster_arn()?.to_string(),
        task_definition_arn: task.task_definition_arn()?.to_string(),
        group: task.group().unwrap_or_default().to_string(),
        container_instance_arn: task.container_instance_arn().map(str::to_string),
        launch_type,
        containers: task.containers().iter().map(convert_container).collect(),
    })
}

fn convert_container(container: &ecs::Container) -> TaskContainer {
    TaskContainer {
        name: container.name().unwrap_or_default().to_string(),
        container_arn: container.container_arn().unwrap_or_default().to_string(),
        network_bindings: container
            .network_bindings()
            .iter()
            .map(|binding| NetworkBinding {
                container_port: binding.container_port().and_then(to_port),
                host_port: binding.host_port().and_then(to_port),
            })
            .collect(),
        network_interface_ips: container
            .network_interfaces()
            .iter()
            .filter_map(|eni| eni.private_ipv4_address().map(str::to_string))
            .collect(),
    }
}

fn convert_definition(definition: &ecs::TaskDefinition) -> Option<TaskDefinition> {
    let network_mode = match definition.network_mode() {
        Some(ecs::NetworkMode::Awsvpc) => NetworkMode::AwsVpc,
        Some(ecs::NetworkMode::Host) => NetworkMode::Host,
        Some(ecs::NetworkMode::None) => NetworkMode::None,
        // Bridge is the provider default when no mode is declared.
        _ => NetworkMode::Bridge,
    };
    Some(TaskDefinition {
        arn: definition.task_definition_arn()?.to_string(),
        network_mode,
        container_definitions: definition
            .container_definitions()
            .iter()
            .map(|cd| ContainerDefinition {
                name: cd.name().unwrap_or_default().to_string(),
                environment: cd
                    .environment()
                    .iter()
                    .filter_map(|kv| Some((kv.name()?.to_string(), kv.value()?.to_string())))
                    .collect(),
                port_mappings: cd
                    .port_mappings()
                    .iter()
                    .map(|pm| PortMapping {
                        container_port: pm.container_port().and_then(to_port),
                        host_port: pm.host_port().and_then(to_port),
                    })
                    .collect(),
            })
            .collect(),
    })
}

fn convert_ec2_instance(instance: &aws_sdk_ec2::types::Instance) -> Option<Ec2Instance> {
    Some(Ec2Instance {
        instance_id: instance.instance_id()?.to_string(),
        private_ip: instance.private_ip_address()?.to_string(),
        interface_ips: instance
            .network_interfaces()
            .iter()
            .filter_map(|eni| eni.private_ip_address().map(str::to_string))
            .collect(),
    })
}

fn to_port(port: i32) -> Option<u16> {
    u16::try_from(port).ok()
}
