//! Cloud inventory client
//!
//! A thin facade over the ECS/EC2 describe APIs. Listing calls paginate
//! internally, describe calls batch internally; nothing here retries.
//! An error propagates to the round boundary, where the next poll
//! iteration acts as the retry.

mod aws;

pub use aws::AwsInventory;

use crate::models::{ContainerInstance, Ec2Instance, LaunchType, Task, TaskDefinition};
use anyhow::Result;
use std::collections::HashMap;

pub use async_trait::async_trait;

/// Provider hard ceiling on ids per describe call
pub const DESCRIBE_BATCH_LIMIT: usize = 100;

/// Read-only access to the cluster and compute inventory
#[async_trait]
pub trait Inventory: Send + Sync {
    /// All cluster ARNs visible to the caller.
    async fn list_clusters(&self) -> Result<Vec<String>>;

    /// ARNs of running tasks in one cluster, filtered by launch type.
    async fn list_tasks(&self, cluster: &str, launch_type: LaunchType) -> Result<Vec<String>>;

    /// Describe tasks by ARN, keyed by task ARN. Tasks the provider no
    /// longer knows about are simply absent from the result.
    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> Result<HashMap<String, Task>>;

    /// Describe one task definition revision.
    async fn describe_task_definition(&self, arn: &str) -> Result<Option<TaskDefinition>>;

    /// Describe container instances by ARN, keyed by ARN.
    async fn describe_container_instances(
        &self,
        cluster: &str,
        arns: &[String],
    ) -> Result<HashMap<String, ContainerInstance>>;

    /// Describe EC2 instances by id, keyed by instance id.
    async fn describe_ec2_instances(&self, ids: &[String])
        -> Result<HashMap<String, Ec2Instance>>;
}
