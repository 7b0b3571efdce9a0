//! Core data model of the control loop
//!
//! Everything here serializes with camelCase keys; the same shapes are
//! written to the history file and posted to the worker pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Issue severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding reported by an analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub analyzer: String,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Issue {
    pub fn new(
        analyzer: impl Into<String>,
        id: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            analyzer: analyzer.into(),
            severity,
            description: description.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Data value as a string slice
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|data| data.get(key))
            .and_then(Value::as_str)
    }

    pub fn data_u64(&self, key: &str) -> Option<u64> {
        self.data
            .as_ref()
            .and_then(|data| data.get(key))
            .and_then(Value::as_u64)
    }
}

/// Output of one analyzer run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerResult {
    pub analyzer: String,
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Set when the analyzer failed or timed out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalyzerResult {
    pub fn new(analyzer: impl Into<String>) -> Self {
        Self {
            analyzer: analyzer.into(),
            issues: Vec::new(),
            recommendations: Vec::new(),
            error: None,
        }
    }

    /// Empty result carrying the failure reason
    pub fn failed(analyzer: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(analyzer)
        }
    }

    pub fn push_issue(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    pub fn recommend(&mut self, recommendation: impl Into<String>) {
        self.recommendations.push(recommendation.into());
    }
}

/// A classified, non-low issue surfaced in a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeakPoint {
    /// `<analyzer>-<issue id>`
    pub id: String,
    pub severity: Severity,
    pub summary: String,
    pub related_issues: Vec<Issue>,
}

impl WeakPoint {
    /// Weak point for an issue, `None` for low-severity issues
    pub fn from_issue(issue: &Issue) -> Option<Self> {
        if issue.severity == Severity::Low {
            return None;
        }
        Some(Self {
            id: format!("{}-{}", issue.analyzer, issue.id),
            severity: issue.severity,
            summary: issue.description.clone(),
            related_issues: vec![issue.clone()],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// Task lifecycle status; only `Pending` tasks are dispatched automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    Suggested,
    PendingApproval,
}

/// A remediation unit derived from one issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agents: Option<Vec<String>>,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(task_type: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_type: task_type.into(),
            payload: Map::new(),
            priority: None,
            target_agents: None,
            status,
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_target_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_agents = Some(agents.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_dispatchable(&self) -> bool {
        self.status == TaskStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    /// Accepted onto a relay for deferred delivery
    Queued,
    Dispatched,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub task: Task,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub squad_id: Option<String>,
    pub status: DispatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn dispatched(task: Task, squad_id: Option<String>) -> Self {
        Self {
            task,
            squad_id,
            status: DispatchStatus::Dispatched,
            error: None,
        }
    }

    pub fn queued(task: Task) -> Self {
        Self {
            task,
            squad_id: None,
            status: DispatchStatus::Queued,
            error: None,
        }
    }

    pub fn failed(task: Task, error: impl Into<String>) -> Self {
        Self {
            task,
            squad_id: None,
            status: DispatchStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// Cycle depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleMode {
    /// Fast analyzers only, tasks are suggestions and nothing is dispatched
    Light,
    #[default]
    Full,
}

impl CycleMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleMode::Light => "light",
            CycleMode::Full => "full",
        }
    }
}

impl fmt::Display for CycleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CycleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(CycleMode::Light),
            "full" => Ok(CycleMode::Full),
            other => Err(format!("unknown cycle mode '{}', expected light or full", other)),
        }
    }
}

/// Extra information supplied by whoever requested a cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl TriggerContext {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One completed run of the control loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub trigger: String,
    #[serde(default)]
    pub mode: CycleMode,
    pub analysis: Vec<AnalyzerResult>,
    pub weak_points: Vec<WeakPoint>,
    pub generated_tasks: Vec<Task>,
    pub dispatch_results: Vec<DispatchResult>,
    pub summary: String,
}

impl Cycle {
    /// Placeholder returned before any cycle has completed
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            trigger: String::new(),
            mode: CycleMode::Full,
            analysis: Vec::new(),
            weak_points: Vec::new(),
            generated_tasks: Vec::new(),
            dispatch_results: Vec::new(),
            summary: "Control loop has not completed a cycle yet.".to_string(),
        }
    }
}

/// Snapshot of engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_summary: Option<String>,
    pub is_running: bool,
    pub pending_triggers: Vec<String>,
}
