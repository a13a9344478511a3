//! ECS Discovery Agent - Prometheus target discovery for ECS tasks
//!
//! This binary polls the ECS/EC2 inventory on a fixed interval and
//! publishes per-scrape-interval file-sd target lists for Prometheus.

use anyhow::Result;
use aws_config::BehaviorVersion;
use clap::Parser;
use discovery_lib::{
    emitter::ConfigEmitter, extractor::extract_targets, inventory::AwsInventory,
    resolver::TaskResolver,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::AgentConfig::parse();
    info!(
        directory = %config.directory.display(),
        interval_secs = config.interval,
        default_scrape_interval = config.default_scrape_interval.as_str(),
        "Starting ecs-discovery-agent"
    );

    let aws = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let inventory = Arc::new(AwsInventory::new(
        aws_sdk_ecs::Client::new(&aws),
        aws_sdk_ec2::Client::new(&aws),
    ));
    let mut resolver = TaskResolver::new(inventory);
    let emitter = ConfigEmitter::new(&config.directory, config.default_scrape_interval);

    // Rounds never overlap: one round runs to completion, then the loop
    // sleeps until the next tick. A failed round is retried whole on the
    // next tick rather than mid-round.
    let mut ticker = tokio::time::interval(Duration::from_secs(config.interval));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(err) = run_round(&mut resolver, &emitter).await {
            error!(error = %format!("{err:#}"), "discovery round failed, retrying next tick");
        }
    }
}

async fn run_round(resolver: &mut TaskResolver, emitter: &ConfigEmitter) -> Result<()> {
    let resolved = resolver.discover().await?;
    let targets: Vec<_> = resolved.iter().flat_map(extract_targets).collect();
    info!(tasks = resolved.len(), targets = targets.len(), "discovery round complete");
    emitter.emit(&targets).await
}
