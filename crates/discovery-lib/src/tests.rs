//! Pipeline tests over an in-memory inventory
//!
//! These tests drive whole discovery rounds against a fake inventory
//! with per-method call counters, checking the caching, admission and
//! emission behavior without any AWS access.

use crate::emitter::{ConfigEmitter, ScrapeInterval};
use crate::extractor::extract_targets;
use crate::inventory::{async_trait, Inventory};
use crate::models::{
    ContainerDefinition, ContainerInstance, Ec2Instance, LaunchType, NetworkBinding, NetworkMode,
    PortMapping, Task, TaskContainer, TaskDefinition,
};
use crate::resolver::TaskResolver;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const CLUSTER: &str = "arn:aws:ecs:eu-west-1:1:cluster/prod";

#[derive(Default)]
struct FakeState {
    clusters: Vec<String>,
    tasks: Vec<Task>,
    definitions: HashMap<String, TaskDefinition>,
    container_instances: HashMap<String, ContainerInstance>,
    ec2_instances: HashMap<String, Ec2Instance>,
}

#[derive(Default)]
struct FakeInventory {
    state: Mutex<FakeState>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FakeInventory {
    fn count(&self, method: &'static str) {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;
    }

    fn calls(&self, method: &'static str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    fn bind_container(&self, task_arn: &str, name: &str, container_port: u16, host_port: u16) {
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.task_arn == task_arn)
            .unwrap();
        let container = task.containers.iter_mut().find(|c| c.name == name).unwrap();
        container.network_bindings.push(NetworkBinding {
            container_port: Some(container_port),
            host_port: Some(host_port),
        });
    }
}

#[async_trait]
impl Inventory for FakeInventory {
    async fn list_clusters(&self) -> Result<Vec<String>> {
        self.count("list_clusters");
        Ok(self.state.lock().unwrap().clusters.clone())
    }

    async fn list_tasks(&self, cluster: &str, launch_type: LaunchType) -> Result<Vec<String>> {
        self.count("list_tasks");
        Ok(self
            .state
            .lock()
            .unwrap()
            .tasks
            .iter()
            .filter(|t| t.cluster_arn == cluster && t.launch_type == launch_type)
            .map(|t| t.task_arn.clone())
            .collect())
    }

    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> Result<HashMap<String, Task>> {
        self.count("describe_tasks");
        Ok(self
            .state
            .lock()
            .unwrap()
            .tasks
            .iter()
            .filter(|t| t.cluster_arn == cluster && task_arns.contains(&t.task_arn))
            .map(|t| (t.task_arn.clone(), t.clone()))
            .collect())
    }

    async fn describe_task_definition(&self, arn: &str) -> Result<Option<TaskDefinition>> {
        self.count("describe_task_definition");
        Ok(self.state.lock().unwrap().definitions.get(arn).cloned())
    }

    async fn describe_container_instances(
        &self,
        _cluster: &str,
        arns: &[String],
    ) -> Result<HashMap<String, ContainerInstance>> {
        self.count("describe_container_instances");
        Ok(self
            .state
            .lock()
            .unwrap()
            .container_instances
            .iter()
            .filter(|(arn, _)| arns.contains(arn))
            .map(|(arn, ci)| (arn.clone(), ci.clone()))
            .collect())
    }

    async fn describe_ec2_instances(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Ec2Instance>> {
        self.count("describe_ec2_instances");
        Ok(self
            .state
            .lock()
            .unwrap()
            .ec2_instances
            .iter()
            .filter(|(id, _)| ids.contains(id))
            .map(|(id, instance)| (id.clone(), instance.clone()))
            .collect())
    }
}

fn web_definition(mode: NetworkMode) -> TaskDefinition {
    TaskDefinition {
        arn: "arn:aws:ecs:eu-west-1:1:task-definition/web:3".to_string(),
        network_mode: mode,
        container_definitions: vec![ContainerDefinition {
            name: "web".to_string(),
            environment: vec![("PROMETHEUS".to_string(), "true".to_string())],
            port_mappings: vec![PortMapping {
                container_port: Some(9090),
                host_port: Some(9090),
            }],
        }],
    }
}

fn ec2_fixture(inventory: &FakeInventory, bound: bool) {
    let mut state = inventory.state.lock().unwrap();
    state.clusters = vec![CLUSTER.to_string()];
    let definition = web_definition(NetworkMode::Bridge);
    state.tasks = vec![Task {
        task_arn: "arn:aws:ecs:eu-west-1:1:task/prod/t-1".to_string(),
        cluster_arn: CLUSTER.to_string(),
        task_definition_arn: definition.arn.clone(),
        group: "service:web".to_string(),
        container_instance_arn: Some(
            "arn:aws:ecs:eu-west-1:1:container-instance/prod/ci-1".to_string(),
        ),
        launch_type: LaunchType::Ec2,
        containers: vec![TaskContainer {
            name: "web".to_string(),
            container_arn: "arn:aws:ecs:eu-west-1:1:container/prod/c-1".to_string(),
            network_bindings: if bound {
                vec![NetworkBinding {
                    container_port: Some(9090),
                    host_port: Some(32768),
                }]
            } else {
                vec![]
            },
            network_interface_ips: vec![],
        }],
    }];
    state.definitions.insert(definition.arn.clone(), definition);
    state.container_instances.insert(
        "arn:aws:ecs:eu-west-1:1:container-instance/prod/ci-1".to_string(),
        ContainerInstance {
            arn: "arn:aws:ecs:eu-west-1:1:container-instance/prod/ci-1".to_string(),
            ec2_instance_id: "i-0abc".to_string(),
        },
    );
    state.ec2_instances.insert(
        "i-0abc".to_string(),
        Ec2Instance {
            instance_id: "i-0abc".to_string(),
            private_ip: "10.0.0.5".to_string(),
            interface_ips: vec!["10.0.0.5".to_string()],
        },
    );
}

fn fargate_fixture(inventory: &FakeInventory) {
    let mut state = inventory.state.lock().unwrap();
    state.clusters = vec![CLUSTER.to_string()];
    let definition = web_definition(NetworkMode::AwsVpc);
    state.tasks = vec![Task {
        task_arn: "arn:aws:ecs:eu-west-1:1:task/prod/t-9".to_string(),
        cluster_arn: CLUSTER.to_string(),
        task_definition_arn: definition.arn.clone(),
        group: "service:web".to_string(),
        container_instance_arn: None,
        launch_type: LaunchType::Fargate,
        containers: vec![TaskContainer {
            name: "web".to_string(),
            container_arn: "arn:aws:ecs:eu-west-1:1:container/prod/c-9".to_string(),
            network_bindings: vec![],
            network_interface_ips: vec!["10.0.3.44".to_string()],
        }],
    }];
    state.definitions.insert(definition.arn.clone(), definition);
}

#[tokio::test]
async fn second_round_over_unchanged_inventory_hits_the_caches() {
    let inventory = Arc::new(FakeInventory::default());
    ec2_fixture(&inventory, true);
    let mut resolver = TaskResolver::new(inventory.clone());

    let first = resolver.discover().await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].is_valid());

    let second = resolver.discover().await.unwrap();
    assert_eq!(second.len(), 1);
    assert!(second[0].is_valid());

    // Every entity was cached from round one; only the listing calls repeat.
    assert_eq!(inventory.calls("describe_tasks"), 1);
    assert_eq!(inventory.calls("describe_task_definition"), 1);
    assert_eq!(inventory.calls("describe_container_instances"), 1);
    assert_eq!(inventory.calls("describe_ec2_instances"), 1);
    assert_eq!(inventory.calls("list_clusters"), 2);
}

#[tokio::test]
async fn unbound_opted_in_task_is_held_until_bound() {
    let inventory = Arc::new(FakeInventory::default());
    ec2_fixture(&inventory, false);
    let mut resolver = TaskResolver::new(inventory.clone());

    // Round one: the sole container has no binding yet, so the task is
    // held back; its definition was fetched to decide that.
    let first = resolver.discover().await.unwrap();
    assert!(first.is_empty());
    assert_eq!(inventory.calls("describe_task_definition"), 1);

    // Round two: the binding appeared. The task is re-described (it was
    // never cached) but the definition comes from the cache.
    inventory.bind_container("arn:aws:ecs:eu-west-1:1:task/prod/t-1", "web", 9090, 32768);
    let second = resolver.discover().await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(inventory.calls("describe_tasks"), 2);
    assert_eq!(inventory.calls("describe_task_definition"), 1);

    let targets = extract_targets(&second[0]);
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].address(), "10.0.0.5:32768");
}

#[tokio::test]
async fn fargate_tasks_skip_host_resolution_entirely() {
    let inventory = Arc::new(FakeInventory::default());
    fargate_fixture(&inventory);
    let mut resolver = TaskResolver::new(inventory.clone());

    let resolved = resolver.discover().await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].is_valid());
    assert_eq!(inventory.calls("describe_container_instances"), 0);
    assert_eq!(inventory.calls("describe_ec2_instances"), 0);

    let targets = extract_targets(&resolved[0]);
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].address(), "10.0.3.44:9090");
}

#[tokio::test]
async fn missing_host_resolution_excludes_the_task_silently() {
    let inventory = Arc::new(FakeInventory::default());
    ec2_fixture(&inventory, true);
    inventory.state.lock().unwrap().ec2_instances.clear();
    let mut resolver = TaskResolver::new(inventory.clone());

    let resolved = resolver.discover().await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert!(!resolved[0].is_valid());
    assert!(extract_targets(&resolved[0]).is_empty());
}

#[tokio::test]
async fn consecutive_rounds_produce_byte_identical_files() {
    let inventory = Arc::new(FakeInventory::default());
    ec2_fixture(&inventory, true);
    let mut resolver = TaskResolver::new(inventory.clone());
    let dir = TempDir::new().unwrap();
    let emitter = ConfigEmitter::new(dir.path(), ScrapeInterval::M1);

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let resolved = resolver.discover().await.unwrap();
        let targets: Vec<_> = resolved.iter().flat_map(extract_targets).collect();
        emitter.emit(&targets).await.unwrap();
        let mut round = Vec::new();
        for interval in ScrapeInterval::ALL {
            round.push(tokio::fs::read(emitter.file_path(interval)).await.unwrap());
        }
        outputs.push(round);
    }
    assert_eq!(outputs[0], outputs[1]);

    // The populated bucket carries the full label set.
    let body = tokio::fs::read_to_string(emitter.file_path(ScrapeInterval::M1))
        .await
        .unwrap();
    assert!(body.contains("\"ecs_task_id\""));
    assert!(body.contains("10.0.0.5:32768"));
}
