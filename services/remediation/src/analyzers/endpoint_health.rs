use super::{names, Analyzer};
use crate::error::AnalyzerError;
use crate::types::{AnalyzerResult, Issue, Severity};
use async_trait::async_trait;
use futures::future::join_all;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of probing one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProbeOutcome {
    /// HTTP status, 0 when the endpoint was unreachable
    status: u16,
    duration_ms: u64,
}

/// Probes `GET {api_base}{path}` for each configured health path
pub struct EndpointHealthAnalyzer {
    client: reqwest::Client,
    api_base: String,
    paths: Vec<String>,
    latency_budget_ms: u64,
}

impl EndpointHealthAnalyzer {
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        paths: Vec<String>,
        latency_budget_ms: u64,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            paths,
            latency_budget_ms,
        }
    }

    /// Build with a dedicated client bounded by `timeout`
    pub fn with_timeout(
        api_base: impl Into<String>,
        paths: Vec<String>,
        latency_budget_ms: u64,
        timeout: Duration,
    ) -> Result<Self, AnalyzerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalyzerError::Probe(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::new(client, api_base, paths, latency_budget_ms))
    }

    async fn probe(&self, path: &str) -> ProbeOutcome {
        let url = format!("{}{}", self.api_base, path);
        let started = Instant::now();
        let status = match self.client.get(&url).send().await {
            Ok(response) => response.status().as_u16(),
            Err(e) => {
                debug!("Endpoint {} unreachable: {}", url, e);
                0
            }
        };

        ProbeOutcome {
            status,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn issue_for(&self, path: &str, outcome: ProbeOutcome) -> Option<Issue> {
        let (severity, problem) = classify(outcome, self.latency_budget_ms)?;
        let description = match outcome.status {
            0 => format!("{} is unreachable", path),
            status if severity == Severity::Low => format!(
                "{} answered {} in {}ms, over the {}ms budget",
                path, status, outcome.duration_ms, self.latency_budget_ms
            ),
            status => format!("{} answered HTTP {}", path, status),
        };

        Some(
            Issue::new(
                names::ENDPOINT_HEALTH,
                format!("{}-{}", problem, path_slug(path)),
                severity,
                description,
            )
            .with_data("endpoint", path)
            .with_data("status", outcome.status)
            .with_data("durationMs", outcome.duration_ms),
        )
    }
}

/// Severity and issue-id prefix for a probe outcome
fn classify(outcome: ProbeOutcome, latency_budget_ms: u64) -> Option<(Severity, &'static str)> {
    match outcome.status {
        0 => Some((Severity::Critical, "unreachable")),
        500..=599 => Some((Severity::High, "server-error")),
        400..=499 => Some((Severity::Medium, "client-error")),
        _ if outcome.duration_ms > latency_budget_ms => Some((Severity::Low, "slow")),
        _ => None,
    }
}

fn path_slug(path: &str) -> String {
    let slug: String = path
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if slug.is_empty() {
        "root".to_string()
    } else {
        slug
    }
}

#[async_trait]
impl Analyzer for EndpointHealthAnalyzer {
    fn name(&self) -> &str {
        names::ENDPOINT_HEALTH
    }

    async fn analyze(&self) -> Result<AnalyzerResult, AnalyzerError> {
        let outcomes = join_all(self.paths.iter().map(|path| self.probe(path))).await;

        let mut result = AnalyzerResult::new(names::ENDPOINT_HEALTH);
        for (path, outcome) in self.paths.iter().zip(outcomes) {
            if let Some(issue) = self.issue_for(path, outcome) {
                result.push_issue(issue);
            }
        }

        if result.issues.iter().any(|issue| issue.severity >= Severity::High) {
            result.recommend("Check service processes behind failing health endpoints");
        }
        Ok(result)
    }
}
