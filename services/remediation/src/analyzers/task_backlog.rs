use super::{names, Analyzer};
use crate::error::AnalyzerError;
use crate::types::{AnalyzerResult, Issue, Severity};
use async_trait::async_trait;
use relays::{RelayRegistry, RelayStats};
use std::sync::Arc;

/// Buffers at or above this fraction of their limit are reported
pub const NEAR_CAPACITY: f64 = 0.8;

/// Inspects relay buffers for backlog and drops
pub struct TaskBacklogAnalyzer {
    relays: Arc<RelayRegistry>,
}

impl TaskBacklogAnalyzer {
    pub fn new(relays: Arc<RelayRegistry>) -> Self {
        Self { relays }
    }
}

fn relay_issues(stats: &RelayStats) -> Vec<Issue> {
    let mut issues = Vec::new();

    if stats.utilization() >= NEAR_CAPACITY {
        issues.push(
            Issue::new(
                names::TASK_BACKLOG,
                format!("backlog-{}", stats.relay_id),
                Severity::Medium,
                format!(
                    "Relay {} holds {} of {} messages",
                    stats.relay_id, stats.buffered, stats.buffer_limit
                ),
            )
            .with_data("relayId", stats.relay_id.as_str())
            .with_data("buffered", stats.buffered as u64)
            .with_data("bufferLimit", stats.buffer_limit as u64),
        );
    }

    if stats.dropped > 0 {
        issues.push(
            Issue::new(
                names::TASK_BACKLOG,
                format!("drops-{}", stats.relay_id),
                Severity::High,
                format!("Relay {} dropped {} messages", stats.relay_id, stats.dropped),
            )
            .with_data("relayId", stats.relay_id.as_str())
            .with_data("dropped", stats.dropped),
        );
    }

    issues
}

#[async_trait]
impl Analyzer for TaskBacklogAnalyzer {
    fn name(&self) -> &str {
        names::TASK_BACKLOG
    }

    async fn analyze(&self) -> Result<AnalyzerResult, AnalyzerError> {
        let mut result = AnalyzerResult::new(names::TASK_BACKLOG);
        for stats in self.relays.all_stats() {
            for issue in relay_issues(&stats) {
                result.push_issue(issue);
            }
        }

        if !result.issues.is_empty() {
            result.recommend("Flush or enlarge congested relays");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_router::Message;
    use relays::{DropPolicy, RelayDefinition, RelayOptions};
    use serde_json::Value;

    #[tokio::test]
    async fn test_near_capacity_and_drops() {
        let registry = Arc::new(RelayRegistry::new());
        registry
            .register(
                RelayDefinition::new("busy", "ops"),
                RelayOptions::new(5, DropPolicy::DropOldest),
            )
            .unwrap();
        registry
            .register(
                RelayDefinition::new("quiet", "ops"),
                RelayOptions::new(5, DropPolicy::DropOldest),
            )
            .unwrap();

        for _ in 0..6 {
            registry.enqueue("busy", Message::new("job", Value::Null)).unwrap();
        }
        registry.enqueue("quiet", Message::new("job", Value::Null)).unwrap();

        let result = TaskBacklogAnalyzer::new(registry).analyze().await.unwrap();

        let ids: Vec<&str> = result.issues.iter().map(|issue| issue.id.as_str()).collect();
        assert_eq!(ids, vec!["backlog-busy", "drops-busy"]);
        assert_eq!(result.issues[1].severity, Severity::High);
    }
}
