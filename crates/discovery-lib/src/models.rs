//! Core data models for ECS target discovery
//!
//! Owned snapshots of the ECS/EC2 entities the pipeline joins. SDK types
//! are converted at the inventory boundary and never leak past it.

/// Compute backend a task runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchType {
    /// Self-managed EC2 capacity, backed by a container instance
    Ec2,
    /// Serverless capacity, no container instance to resolve
    Fargate,
}

impl LaunchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchType::Ec2 => "EC2",
            LaunchType::Fargate => "FARGATE",
        }
    }
}

/// Networking mode declared by a task definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Docker bridge, ports resolved from live host bindings
    Bridge,
    /// Host networking, ports come from the declared mappings
    Host,
    /// Task-level ENI, address comes from the task's own interface
    AwsVpc,
    /// No networking
    None,
}

/// A live host/container port binding on a running container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkBinding {
    pub container_port: Option<u16>,
    pub host_port: Option<u16>,
}

/// Runtime state of one container within a running task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContainer {
    pub name: String,
    pub container_arn: String,
    pub network_bindings: Vec<NetworkBinding>,
    /// Private IPs of ENIs attached to this container (awsvpc mode)
    pub network_interface_ips: Vec<String>,
}

/// One running task as reported by the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub task_arn: String,
    pub cluster_arn: String,
    pub task_definition_arn: String,
    pub group: String,
    pub container_instance_arn: Option<String>,
    pub launch_type: LaunchType,
    pub containers: Vec<TaskContainer>,
}

/// Declared container/host port pair from a task definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: Option<u16>,
    pub host_port: Option<u16>,
}

/// Declared container within a task definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDefinition {
    pub name: String,
    pub environment: Vec<(String, String)>,
    pub port_mappings: Vec<PortMapping>,
}

/// A versioned, immutable task definition
///
/// Safe to cache for as long as its ARN is referenced; revisions get a
/// new ARN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub arn: String,
    pub network_mode: NetworkMode,
    pub container_definitions: Vec<ContainerDefinition>,
}

/// Cluster handle on the host backing EC2 launch-type capacity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInstance {
    pub arn: String,
    pub ec2_instance_id: String,
}

/// The underlying EC2 virtual machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ec2Instance {
    pub instance_id: String,
    pub private_ip: String,
    /// Private IPs of all attached interfaces, primary included
    pub interface_ips: Vec<String>,
}

/// A task joined against its definition, container instance and EC2
/// instance, owned by the current discovery round
#[derive(Debug, Clone)]
pub struct ResolvedTask {
    pub task: Task,
    pub task_definition: Option<TaskDefinition>,
    pub container_instance: Option<ContainerInstance>,
    pub ec2_instance: Option<Ec2Instance>,
}

impl ResolvedTask {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            task_definition: None,
            container_instance: None,
            ec2_instance: None,
        }
    }

    /// Whether the join is complete enough to extract targets from.
    ///
    /// Fargate tasks carry their own ENI, so only the definition is
    /// required; EC2 tasks additionally need the host resolution chain.
    /// An incomplete join yields zero targets, it is not an error.
    pub fn is_valid(&self) -> bool {
        match self.task.launch_type {
            LaunchType::Fargate => self.task_definition.is_some(),
            LaunchType::Ec2 => {
                self.task_definition.is_some()
                    && self.container_instance.is_some()
                    && self.ec2_instance.is_some()
            }
        }
    }
}

/// Extract the resource name from an ECS ARN, e.g. the family from
/// `arn:aws:ecs:region:account:task-definition/family:3`.
pub fn resource_name(arn: &str) -> Option<&str> {
    arn.split(':').nth(5)?.split('/').nth(1)
}

/// Extract the trailing id segment of an ARN. Handles both old-style
/// (`task/<id>`) and new-style (`task/<cluster>/<id>`) task ARNs.
pub fn resource_id(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

/// Extract the revision suffix from a task definition ARN.
pub fn task_definition_version(arn: &str) -> Option<&str> {
    arn.split(':').nth(6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arn_helpers() {
        let def = "arn:aws:ecs:eu-west-1:123456789012:task-definition/web-api:42";
        assert_eq!(resource_name(def), Some("web-api"));
        assert_eq!(task_definition_version(def), Some("42"));

        let cluster = "arn:aws:ecs:eu-west-1:123456789012:cluster/prod";
        assert_eq!(resource_name(cluster), Some("prod"));

        let old_task = "arn:aws:ecs:eu-west-1:123456789012:task/abcd-1234";
        assert_eq!(resource_id(old_task), "abcd-1234");
        let new_task = "arn:aws:ecs:eu-west-1:123456789012:task/prod/abcd-1234";
        assert_eq!(resource_id(new_task), "abcd-1234");
    }

    #[test]
    fn validity_by_launch_type() {
        let task = Task {
            task_arn: "arn:aws:ecs:eu-west-1:1:task/prod/t1".into(),
            cluster_arn: "arn:aws:ecs:eu-west-1:1:cluster/prod".into(),
            task_definition_arn: "arn:aws:ecs:eu-west-1:1:task-definition/web:1".into(),
            group: "service:web".into(),
            container_instance_arn: None,
            launch_type: LaunchType::Fargate,
            containers: vec![],
        };
        let definition = TaskDefinition {
            arn: task.task_definition_arn.clone(),
            network_mode: NetworkMode::AwsVpc,
            container_definitions: vec![],
        };

        let mut resolved = ResolvedTask::new(task.clone());
        assert!(!resolved.is_valid());
        resolved.task_definition = Some(definition.clone());
        assert!(resolved.is_valid());

        let mut ec2_task = task;
        ec2_task.launch_type = LaunchType::Ec2;
        let mut resolved = ResolvedTask::new(ec2_task);
        resolved.task_definition = Some(definition);
        assert!(!resolved.is_valid());
        resolved.container_instance = Some(ContainerInstance {
            arn: "arn:aws:ecs:eu-west-1:1:container-instance/prod/ci1".into(),
            ec2_instance_id: "i-0abc".into(),
        });
        resolved.ec2_instance = Some(Ec2Instance {
            instance_id: "i-0abc".into(),
            private_ip: "10.0.0.5".into(),
            interface_ips: vec!["10.0.0.5".into()],
        });
        assert!(resolved.is_valid());
    }
}
