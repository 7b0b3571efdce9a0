//! Configuration drift between environment snapshots
//!
//! Snapshots are `.env.<name>` files in the working directory. The first
//! configured snapshot is the baseline; every other snapshot is compared
//! against it key by key. Values are never copied into issues.

use super::{names, Analyzer};
use crate::error::AnalyzerError;
use crate::types::{AnalyzerResult, Issue, Severity};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

pub struct ConfigDriftAnalyzer {
    root: PathBuf,
    snapshots: Vec<String>,
}

impl ConfigDriftAnalyzer {
    pub fn new(root: impl Into<PathBuf>, snapshots: Vec<String>) -> Self {
        Self {
            root: root.into(),
            snapshots,
        }
    }

    fn snapshot_path(&self, snapshot: &str) -> PathBuf {
        self.root.join(format!(".env.{}", snapshot))
    }

    /// Parsed snapshot, `None` if the file does not exist
    async fn load(&self, snapshot: &str) -> Result<Option<BTreeMap<String, String>>, AnalyzerError> {
        match tokio::fs::read_to_string(self.snapshot_path(snapshot)).await {
            Ok(contents) => Ok(Some(parse_env(&contents))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Parse `KEY=VALUE` lines, skipping blanks and `#` comments
pub fn parse_env(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn missing_snapshot(snapshot: &str) -> Issue {
    Issue::new(
        names::CONFIG_DRIFT,
        format!("missing-snapshot-{}", snapshot),
        Severity::Medium,
        format!("Configuration snapshot .env.{} not found", snapshot),
    )
    .with_data("snapshot", snapshot)
}

#[async_trait]
impl Analyzer for ConfigDriftAnalyzer {
    fn name(&self) -> &str {
        names::CONFIG_DRIFT
    }

    async fn analyze(&self) -> Result<AnalyzerResult, AnalyzerError> {
        let mut result = AnalyzerResult::new(names::CONFIG_DRIFT);

        let Some((baseline_name, others)) = self.snapshots.split_first() else {
            return Ok(result);
        };

        let baseline = self.load(baseline_name).await?;
        if baseline.is_none() {
            result.push_issue(missing_snapshot(baseline_name));
        }

        for snapshot in others {
            let Some(current) = self.load(snapshot).await? else {
                result.push_issue(missing_snapshot(snapshot));
                continue;
            };
            let Some(baseline) = &baseline else {
                continue;
            };

            for (key, expected) in baseline {
                match current.get(key) {
                    None => result.push_issue(
                        Issue::new(
                            names::CONFIG_DRIFT,
                            format!("missing-{}-{}", snapshot, key),
                            Severity::Medium,
                            format!("{} is set in {} but missing in {}", key, baseline_name, snapshot),
                        )
                        .with_data("key", key.as_str())
                        .with_data("snapshot", snapshot.as_str())
                        .with_data("baseline", baseline_name.as_str()),
                    ),
                    Some(actual) if actual != expected => result.push_issue(
                        Issue::new(
                            names::CONFIG_DRIFT,
                            format!("mismatch-{}-{}", snapshot, key),
                            Severity::Low,
                            format!("{} differs between {} and {}", key, baseline_name, snapshot),
                        )
                        .with_data("key", key.as_str())
                        .with_data("snapshot", snapshot.as_str())
                        .with_data("baseline", baseline_name.as_str()),
                    ),
                    Some(_) => {}
                }
            }
        }

        if result.issues.iter().any(|issue| issue.severity == Severity::Medium) {
            result.recommend("Sync missing configuration keys across environments");
        }
        Ok(result)
    }
}
