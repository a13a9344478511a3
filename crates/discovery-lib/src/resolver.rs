//! Task resolution pipeline
//!
//! One discovery round: flip the caches, enumerate running tasks per
//! cluster and launch type, admit them through the binding-readiness
//! policy, then join definitions, container instances and EC2 instances
//! through their caches. EC2 instance resolution is deferred to a single
//! bulk pass across all clusters so batches fill up.

use crate::cache::FlipCache;
use crate::extractor::ContainerScrapeConfig;
use crate::inventory::Inventory;
use crate::models::{
    ContainerInstance, Ec2Instance, LaunchType, NetworkMode, ResolvedTask, Task, TaskDefinition,
};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Joins running tasks against their definitions and hosts, caching
/// every joined entity for one round of grace
pub struct TaskResolver {
    inventory: Arc<dyn Inventory>,
    task_cache: FlipCache<String, Task>,
    definition_cache: FlipCache<String, TaskDefinition>,
    container_instance_cache: FlipCache<String, ContainerInstance>,
    ec2_cache: FlipCache<String, Ec2Instance>,
}

impl TaskResolver {
    pub fn new(inventory: Arc<dyn Inventory>) -> Self {
        Self {
            inventory,
            task_cache: FlipCache::new(),
            definition_cache: FlipCache::new(),
            container_instance_cache: FlipCache::new(),
            ec2_cache: FlipCache::new(),
        }
    }

    /// Run one discovery round over the whole fleet.
    pub async fn discover(&mut self) -> Result<Vec<ResolvedTask>> {
        self.flip_caches();

        let clusters = self.inventory.list_clusters().await?;
        let mut resolved = Vec::new();
        for cluster in &clusters {
            for launch_type in [LaunchType::Ec2, LaunchType::Fargate] {
                let task_arns = self.inventory.list_tasks(cluster, launch_type).await?;
                if task_arns.is_empty() {
                    continue;
                }
                let admitted = self.describe_admitted(cluster, &task_arns).await?;
                resolved.extend(admitted.into_values().map(ResolvedTask::new));
            }
        }

        self.attach_definitions(&mut resolved).await?;
        self.attach_container_instances(&mut resolved).await?;
        self.attach_ec2_instances(&mut resolved).await?;
        self.log_round_stats(resolved.len());
        Ok(resolved)
    }

    /// All four generations flip together at the start of a round.
    fn flip_caches(&mut self) {
        self.task_cache.flip();
        self.definition_cache.flip();
        self.container_instance_cache.flip();
        self.ec2_cache.flip();
    }

    /// Describe tasks through the task cache, applying the
    /// binding-readiness policy to freshly fetched ones. An excluded
    /// task stays uncached and is retried next round; its definition
    /// stays cached, so the retry costs one describe-tasks call.
    async fn describe_admitted(
        &mut self,
        cluster: &str,
        task_arns: &[String],
    ) -> Result<HashMap<String, Task>> {
        let Self {
            inventory,
            task_cache,
            definition_cache,
            ..
        } = self;
        let inventory = &**inventory;
        task_cache
            .get_many(task_arns, move |missing| async move {
                let described = inventory.describe_tasks(cluster, &missing).await?;
                let mut admitted = HashMap::new();
                for (arn, task) in described {
                    if is_admitted(inventory, definition_cache, &task).await? {
                        admitted.insert(arn, task);
                    }
                }
                Ok(admitted)
            })
            .await
    }

    async fn attach_definitions(&mut self, resolved: &mut [ResolvedTask]) -> Result<()> {
        let Self {
            inventory,
            definition_cache,
            ..
        } = self;
        let inventory = &**inventory;
        for entry in resolved.iter_mut() {
            entry.task_definition = definition_cache
                .get(&entry.task.task_definition_arn, |arn| async move {
                    inventory.describe_task_definition(&arn).await
                })
                .await?;
        }
        Ok(())
    }

    /// Bulk-resolve container instances, one batch pass per cluster.
    /// Fargate tasks have no container instance and are left untouched.
    async fn attach_container_instances(&mut self, resolved: &mut [ResolvedTask]) -> Result<()> {
        let Self {
            inventory,
            container_instance_cache,
            ..
        } = self;
        let inventory = &**inventory;

        let mut by_cluster: HashMap<String, Vec<String>> = HashMap::new();
        for entry in resolved.iter() {
            if entry.task.launch_type != LaunchType::Ec2 {
                continue;
            }
            if let Some(arn) = &entry.task.container_instance_arn {
                by_cluster
                    .entry(entry.task.cluster_arn.clone())
                    .or_default()
                    .push(arn.clone());
            }
        }

        for (cluster, arns) in by_cluster {
            let fetched = container_instance_cache
                .get_many(&arns, |missing| {
                    let cluster = cluster.clone();
                    async move {
                        inventory
                            .describe_container_instances(&cluster, &missing)
                            .await
                    }
                })
                .await?;
            for entry in resolved.iter_mut() {
                if entry.task.cluster_arn != cluster {
                    continue;
                }
                if let Some(arn) = &entry.task.container_instance_arn {
                    entry.container_instance = fetched.get(arn).cloned();
                }
            }
        }
        Ok(())
    }

    /// One bulk pass spanning all clusters, deferred to round end so the
    /// 100-id batches fill across the whole fleet.
    async fn attach_ec2_instances(&mut self, resolved: &mut [ResolvedTask]) -> Result<()> {
        let Self {
            inventory,
            ec2_cache,
            ..
        } = self;
        let inventory = &**inventory;

        let ids: Vec<String> = resolved
            .iter()
            .filter_map(|entry| entry.container_instance.as_ref())
            .map(|ci| ci.ec2_instance_id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let fetched = ec2_cache
            .get_many(&ids, |missing| async move {
                inventory.describe_ec2_instances(&missing).await
            })
            .await?;
        for entry in resolved.iter_mut() {
            if let Some(ci) = &entry.container_instance {
                entry.ec2_instance = fetched.get(&ci.ec2_instance_id).cloned();
            }
        }
        Ok(())
    }

    fn log_round_stats(&self, resolved: usize) {
        let tasks = self.task_cache.stats();
        let definitions = self.definition_cache.stats();
        let container_instances = self.container_instance_cache.stats();
        let ec2 = self.ec2_cache.stats();
        info!(
            resolved,
            task_hits = tasks.hits,
            task_misses = tasks.misses,
            definition_hits = definitions.hits,
            definition_misses = definitions.misses,
            definitions_cached = definitions.len,
            container_instance_hits = container_instances.hits,
            container_instance_misses = container_instances.misses,
            ec2_hits = ec2.hits,
            ec2_misses = ec2.misses,
            ec2_cached = ec2.len,
            "discovery round resolved"
        );
    }
}

/// Binding-readiness policy.
///
/// A container that has not bound its ports yet cannot be scraped in
/// bridge mode (or host mode without a declared mapping). If such a
/// container has opted in, the whole task is held back this round rather
/// than emitted with a bogus endpoint. awsvpc tasks are addressed via
/// their ENI and never carry bindings, so they always pass.
async fn is_admitted(
    inventory: &dyn Inventory,
    definition_cache: &mut FlipCache<String, TaskDefinition>,
    task: &Task,
) -> Result<bool> {
    let unbound: Vec<&str> = task
        .containers
        .iter()
        .filter(|container| container.network_bindings.is_empty())
        .map(|container| container.name.as_str())
        .collect();
    if unbound.is_empty() {
        return Ok(true);
    }

    let definition = definition_cache
        .get(&task.task_definition_arn, |arn| async move {
            inventory.describe_task_definition(&arn).await
        })
        .await?;
    let Some(definition) = definition else {
        // Unknown definition; the task resolves as invalid downstream.
        return Ok(true);
    };
    if definition.network_mode == NetworkMode::AwsVpc {
        return Ok(true);
    }

    for container_definition in &definition.container_definitions {
        if !unbound.contains(&container_definition.name.as_str()) {
            continue;
        }
        let config = ContainerScrapeConfig::parse(
            &container_definition.name,
            &container_definition.environment,
        );
        if !config.enabled {
            continue;
        }
        if definition.network_mode == NetworkMode::Host
            && !container_definition.port_mappings.is_empty()
        {
            continue;
        }
        info!(
            group = %task.group,
            container = %container_definition.name,
            "container has no network binding yet, holding task until next round"
        );
        return Ok(false);
    }
    Ok(true)
}
