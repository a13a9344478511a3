//! Agent configuration

use clap::Parser;
use discovery_lib::emitter::ScrapeInterval;
use std::path::PathBuf;

/// ECS Prometheus target discovery agent
#[derive(Debug, Parser)]
#[command(name = "ecs-discovery-agent", version, about = "Discovers ECS tasks and emits Prometheus file-sd target lists", long_about = None)]
pub struct AgentConfig {
    /// Directory the <interval>-tasks.json files are written into
    #[arg(long, env = "DISCOVERY_DIRECTORY")]
    pub directory: PathBuf,

    /// Seconds between discovery rounds
    #[arg(long, env = "DISCOVERY_INTERVAL", default_value_t = 60)]
    pub interval: u64,

    /// Scrape interval for targets that do not declare one (15s|30s|1m|5m)
    #[arg(long, env = "DISCOVERY_DEFAULT_SCRAPE_INTERVAL", default_value = "1m")]
    pub default_scrape_interval: ScrapeInterval,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = AgentConfig::parse_from(["ecs-discovery-agent", "--directory", "/tmp/sd"]);
        assert_eq!(config.directory, PathBuf::from("/tmp/sd"));
        assert_eq!(config.interval, 60);
        assert_eq!(config.default_scrape_interval, ScrapeInterval::M1);
    }

    #[test]
    fn directory_is_required() {
        assert!(AgentConfig::try_parse_from(["ecs-discovery-agent"]).is_err());
    }

    #[test]
    fn rejects_unknown_scrape_interval() {
        let result = AgentConfig::try_parse_from([
            "ecs-discovery-agent",
            "--directory",
            "/tmp/sd",
            "--default-scrape-interval",
            "2m",
        ]);
        assert!(result.is_err());
    }
}
