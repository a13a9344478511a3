//! Scrape config emission
//!
//! Buckets targets by scrape interval and publishes one Prometheus
//! file-sd JSON file per interval. Files are written to a temp path and
//! renamed into place, so a concurrent reader never sees a partial file.

use crate::extractor::ScrapeTarget;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Default metrics path when a container declares no endpoint spec
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// The recognized scrape intervals; anything else falls back to the
/// process-wide default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScrapeInterval {
    S15,
    S30,
    M1,
    M5,
}

impl ScrapeInterval {
    pub const ALL: [ScrapeInterval; 4] = [
        ScrapeInterval::S15,
        ScrapeInterval::S30,
        ScrapeInterval::M1,
        ScrapeInterval::M5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeInterval::S15 => "15s",
            ScrapeInterval::S30 => "30s",
            ScrapeInterval::M1 => "1m",
            ScrapeInterval::M5 => "5m",
        }
    }
}

impl FromStr for ScrapeInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "15s" => Ok(ScrapeInterval::S15),
            "30s" => Ok(ScrapeInterval::S30),
            "1m" => Ok(ScrapeInterval::M1),
            "5m" => Ok(ScrapeInterval::M5),
            other => Err(format!(
                "unrecognized scrape interval {other:?}, expected one of 15s, 30s, 1m, 5m"
            )),
        }
    }
}

/// One record of the Prometheus file-sd format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub targets: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// Parse a `path` / `interval:path` spec into path -> interval.
///
/// An element with an unrecognized interval keeps its path but falls
/// back to the default interval; a missing spec means the default path
/// at the default interval. A duplicated path keeps the last interval.
pub fn parse_path_spec(
    spec: Option<&str>,
    default_interval: ScrapeInterval,
) -> BTreeMap<String, ScrapeInterval> {
    let mut paths = BTreeMap::new();
    let spec = spec.unwrap_or_default();
    if spec.is_empty() {
        paths.insert(DEFAULT_METRICS_PATH.to_string(), default_interval);
        return paths;
    }
    for element in spec.split(',') {
        match element.split_once(':') {
            Some((interval, path)) => {
                let interval = interval.parse().unwrap_or(default_interval);
                paths.insert(path.to_string(), interval);
            }
            None => {
                paths.insert(element.to_string(), default_interval);
            }
        }
    }
    paths
}

/// Publishes per-interval scrape config files into one directory
#[derive(Debug, Clone)]
pub struct ConfigEmitter {
    directory: PathBuf,
    default_interval: ScrapeInterval,
}

impl ConfigEmitter {
    pub fn new(directory: impl Into<PathBuf>, default_interval: ScrapeInterval) -> Self {
        Self {
            directory: directory.into(),
            default_interval,
        }
    }

    /// Bucket every (target, path) pair under its resolved interval.
    /// Every recognized interval gets a bucket, even an empty one, and
    /// bucket contents are fully ordered so output is reproducible.
    pub fn bucket(&self, targets: &[ScrapeTarget]) -> BTreeMap<ScrapeInterval, Vec<TargetGroup>> {
        let mut buckets: BTreeMap<ScrapeInterval, Vec<TargetGroup>> = ScrapeInterval::ALL
            .iter()
            .map(|interval| (*interval, Vec::new()))
            .collect();

        for target in targets {
            for (path, interval) in
                parse_path_spec(target.path_spec.as_deref(), self.default_interval)
            {
                let mut labels = target.labels.clone();
                labels.insert("job".to_string(), target.job.clone());
                labels.insert("metrics_path".to_string(), path);
                let group = TargetGroup {
                    targets: vec![target.address()],
                    labels,
                };
                if let Some(bucket) = buckets.get_mut(&interval) {
                    bucket.push(group);
                }
            }
        }

        for bucket in buckets.values_mut() {
            bucket.sort_by(|a, b| (&a.targets, &a.labels).cmp(&(&b.targets, &b.labels)));
        }
        buckets
    }

    /// Serialize and atomically publish one file per interval.
    pub async fn publish(
        &self,
        buckets: &BTreeMap<ScrapeInterval, Vec<TargetGroup>>,
    ) -> Result<()> {
        for (interval, groups) in buckets {
            let path = self.file_path(*interval);
            let tmp = path.with_extension("json.tmp");
            let body = serde_json::to_vec_pretty(groups).context("serializing scrape config")?;
            tokio::fs::write(&tmp, body)
                .await
                .with_context(|| format!("writing {}", tmp.display()))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .with_context(|| format!("publishing {}", path.display()))?;
        }
        Ok(())
    }

    /// One round of emission: bucket, then publish.
    pub async fn emit(&self, targets: &[ScrapeTarget]) -> Result<()> {
        let buckets = self.bucket(targets);
        let records: usize = buckets.values().map(Vec::len).sum();
        self.publish(&buckets).await?;
        info!(targets = targets.len(), records, "published scrape config files");
        Ok(())
    }

    pub fn file_path(&self, interval: ScrapeInterval) -> PathBuf {
        self.directory.join(format!("{}-tasks.json", interval.as_str()))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
