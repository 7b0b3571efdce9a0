use super::{names, Analyzer};
use crate::error::AnalyzerError;
use crate::types::{AnalyzerResult, Issue, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Last heartbeat per process name
#[derive(Debug, Default)]
pub struct LivenessTracker {
    heartbeats: DashMap<String, DateTime<Utc>>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heartbeat(&self, process: &str) {
        self.heartbeat_at(process, Utc::now());
    }

    pub fn heartbeat_at(&self, process: &str, at: DateTime<Utc>) {
        self.heartbeats.insert(process.to_string(), at);
    }

    pub fn last_seen(&self, process: &str) -> Option<DateTime<Utc>> {
        self.heartbeats.get(process).map(|entry| *entry.value())
    }

    pub fn forget(&self, process: &str) {
        self.heartbeats.remove(process);
    }
}

/// Flags expected processes that never reported or went quiet
pub struct ProcessLivenessAnalyzer {
    tracker: Arc<LivenessTracker>,
    expected: Vec<String>,
    stale_after: Duration,
}

impl ProcessLivenessAnalyzer {
    pub fn new(tracker: Arc<LivenessTracker>, expected: Vec<String>, stale_after_secs: u64) -> Self {
        Self {
            tracker,
            expected,
            stale_after: Duration::seconds(stale_after_secs.min(u64::from(u32::MAX)) as i64),
        }
    }

    fn inspect(&self, now: DateTime<Utc>) -> AnalyzerResult {
        let mut result = AnalyzerResult::new(names::PROCESS_LIVENESS);

        for process in &self.expected {
            match self.tracker.last_seen(process) {
                None => {
                    result.push_issue(
                        Issue::new(
                            names::PROCESS_LIVENESS,
                            format!("missing-{}", process),
                            Severity::Critical,
                            format!("Process {} has never reported a heartbeat", process),
                        )
                        .with_data("process", process.as_str()),
                    );
                }
                Some(seen) => {
                    let silent = now - seen;
                    if silent > self.stale_after {
                        result.push_issue(
                            Issue::new(
                                names::PROCESS_LIVENESS,
                                format!("stale-{}", process),
                                Severity::High,
                                format!(
                                    "Process {} silent for {}s",
                                    process,
                                    silent.num_seconds()
                                ),
                            )
                            .with_data("process", process.as_str())
                            .with_data("lastSeen", seen.to_rfc3339()),
                        );
                    }
                }
            }
        }

        if !result.issues.is_empty() {
            result.recommend("Restart unresponsive processes and check their logs");
        }
        result
    }
}

#[async_trait]
impl Analyzer for ProcessLivenessAnalyzer {
    fn name(&self) -> &str {
        names::PROCESS_LIVENESS
    }

    async fn analyze(&self) -> Result<AnalyzerResult, AnalyzerError> {
        Ok(self.inspect(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_and_stale_processes() {
        let tracker = Arc::new(LivenessTracker::new());
        let now = Utc::now();
        tracker.heartbeat_at("router", now - Duration::seconds(10));
        tracker.heartbeat_at("relay", now - Duration::seconds(600));

        let analyzer = ProcessLivenessAnalyzer::new(
            tracker,
            vec!["router".to_string(), "relay".to_string(), "worker".to_string()],
            120,
        );
        let result = analyzer.inspect(now);

        assert_eq!(result.issues.len(), 2);
        let stale = &result.issues[0];
        assert_eq!(stale.id, "stale-relay");
        assert_eq!(stale.severity, Severity::High);
        let missing = &result.issues[1];
        assert_eq!(missing.id, "missing-worker");
        assert_eq!(missing.severity, Severity::Critical);
        assert_eq!(missing.data_str("process"), Some("worker"));
    }

    #[tokio::test]
    async fn test_all_alive() {
        let tracker = Arc::new(LivenessTracker::new());
        tracker.heartbeat("router");

        let analyzer = ProcessLivenessAnalyzer::new(tracker, vec!["router".to_string()], 120);
        let result = analyzer.analyze().await.unwrap();

        assert!(result.issues.is_empty());
        assert!(result.recommendations.is_empty());
    }
}
