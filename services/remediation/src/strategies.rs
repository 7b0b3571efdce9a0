//! Remediation strategies
//!
//! A strategy turns one issue into at most one task. Strategies are pure and
//! registered per analyzer name; the resolver tries the strategies for the
//! issue's analyzer in registration order and the first task wins.

use crate::analyzers::names;
use crate::types::{Issue, Severity, Task, TaskPriority, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn plan(&self, issue: &Issue) -> Option<Task>;
}

fn priority_for(severity: Severity) -> TaskPriority {
    match severity {
        Severity::Critical => TaskPriority::Critical,
        Severity::High => TaskPriority::High,
        Severity::Medium => TaskPriority::Normal,
        Severity::Low => TaskPriority::Low,
    }
}

fn base_task(task_type: &str, status: TaskStatus, issue: &Issue) -> Task {
    Task::new(task_type, status)
        .with_payload("issueId", issue.id.as_str())
        .with_payload("analyzer", issue.analyzer.as_str())
        .with_payload("summary", issue.description.as_str())
        .with_priority(priority_for(issue.severity))
}

/// Restart processes that stopped reporting heartbeats
pub struct ReviveProcess;

impl Strategy for ReviveProcess {
    fn name(&self) -> &str {
        "revive-process"
    }

    fn plan(&self, issue: &Issue) -> Option<Task> {
        let process = issue.data_str("process")?;
        Some(
            base_task("process.revive", TaskStatus::Pending, issue)
                .with_payload("process", process)
                .with_target_agents(["ops"]),
        )
    }
}

/// Repair failing endpoints; slow endpoints are left alone
pub struct RepairEndpoint;

impl Strategy for RepairEndpoint {
    fn name(&self) -> &str {
        "repair-endpoint"
    }

    fn plan(&self, issue: &Issue) -> Option<Task> {
        if issue.severity == Severity::Low {
            return None;
        }
        let endpoint = issue.data_str("endpoint")?;
        let status = issue.data_u64("status").unwrap_or(0);
        Some(
            base_task("endpoint.repair", TaskStatus::Pending, issue)
                .with_payload("endpoint", endpoint)
                .with_payload("status", status)
                .with_target_agents(["ops"]),
        )
    }
}

/// Align configuration snapshots; needs human approval
pub struct ConfigSync;

impl Strategy for ConfigSync {
    fn name(&self) -> &str {
        "config-sync"
    }

    fn plan(&self, issue: &Issue) -> Option<Task> {
        let mut task = base_task("config.sync", TaskStatus::PendingApproval, issue);
        for key in ["key", "snapshot", "baseline"] {
            if let Some(value) = issue.data_str(key) {
                task = task.with_payload(key, value);
            }
        }
        Some(task)
    }
}

/// Suggest fixes for type-check and lint failures
pub struct CodeQuality;

impl Strategy for CodeQuality {
    fn name(&self) -> &str {
        "code-quality"
    }

    fn plan(&self, issue: &Issue) -> Option<Task> {
        let mut task = base_task("build.fix", TaskStatus::Suggested, issue)
            .with_target_agents(["builders"]);
        if let Some(command) = issue.data_str("command") {
            task = task.with_payload("command", command);
        }
        if let Some(output) = issue.data_str("output") {
            task = task.with_payload("output", output);
        }
        Some(task)
    }
}

/// Drain congested relays
pub struct DrainBacklog;

impl Strategy for DrainBacklog {
    fn name(&self) -> &str {
        "drain-backlog"
    }

    fn plan(&self, issue: &Issue) -> Option<Task> {
        let relay_id = issue.data_str("relayId")?;
        Some(
            base_task("relay.drain", TaskStatus::Pending, issue)
                .with_payload("relayId", relay_id)
                .with_target_agents(["ops"]),
        )
    }
}

/// Follow up on patrol findings
pub struct PatrolFollowUp;

impl Strategy for PatrolFollowUp {
    fn name(&self) -> &str {
        "patrol-follow-up"
    }

    fn plan(&self, issue: &Issue) -> Option<Task> {
        let mut task = base_task("patrol.followup", TaskStatus::Suggested, issue);
        if let Some(check) = issue.data_str("check") {
            task = task.with_payload("check", check);
        }
        Some(task)
    }
}

/// Maps analyzer names to their ordered strategies
#[derive(Clone, Default)]
pub struct StrategyResolver {
    by_analyzer: HashMap<String, Vec<Arc<dyn Strategy>>>,
}

impl StrategyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver with the reference strategy for each reference analyzer
    pub fn with_defaults() -> Self {
        let mut resolver = Self::new();
        resolver.register(names::PROCESS_LIVENESS, Arc::new(ReviveProcess));
        resolver.register(names::ENDPOINT_HEALTH, Arc::new(RepairEndpoint));
        resolver.register(names::CONFIG_DRIFT, Arc::new(ConfigSync));
        resolver.register(names::BUILD_INTEGRITY, Arc::new(CodeQuality));
        resolver.register(names::TASK_BACKLOG, Arc::new(DrainBacklog));
        resolver.register(names::MICRO_PATROL, Arc::new(PatrolFollowUp));
        resolver
    }

    /// Append a strategy for an analyzer
    pub fn register(&mut self, analyzer: &str, strategy: Arc<dyn Strategy>) {
        self.by_analyzer
            .entry(analyzer.to_string())
            .or_default()
            .push(strategy);
    }

    /// First task produced for the issue, if any
    pub fn resolve(&self, issue: &Issue) -> Option<Task> {
        self.by_analyzer
            .get(&issue.analyzer)?
            .iter()
            .find_map(|strategy| strategy.plan(issue))
    }

    pub fn strategy_names(&self, analyzer: &str) -> Vec<String> {
        self.by_analyzer
            .get(analyzer)
            .map(|strategies| strategies.iter().map(|s| s.name().to_string()).collect())
            .unwrap_or_default()
    }
}
