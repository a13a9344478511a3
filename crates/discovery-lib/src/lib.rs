//! Core library for ECS Prometheus target discovery
//!
//! This crate provides the discovery pipeline:
//! - Generational caching of cloud inventory entities
//! - A paginating, batching facade over the ECS/EC2 describe APIs
//! - Task resolution across definitions, container instances and EC2
//! - Scrape target extraction per networking mode
//! - Per-interval scrape config file emission

pub mod cache;
pub mod emitter;
pub mod extractor;
pub mod inventory;
pub mod models;
pub mod resolver;

#[cfg(test)]
mod tests;

pub use cache::{CacheStats, FlipCache};
pub use emitter::{ConfigEmitter, ScrapeInterval, TargetGroup};
pub use extractor::{extract_targets, ContainerScrapeConfig, ScrapeTarget};
pub use inventory::{AwsInventory, Inventory};
pub use models::*;
pub use resolver::TaskResolver;
