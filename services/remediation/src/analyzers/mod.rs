//! # Analyzers
//!
//! Each analyzer inspects one aspect of system health and reports issues.
//! The [`AnalyzerSet`] decides which analyzers run for a cycle mode and runs
//! them concurrently, each under the probe timeout. A failing or slow
//! analyzer never fails the cycle: it contributes an empty result with
//! `error` set.
//!
//! | Analyzer | Light | Full |
//! |---|---|---|
//! | process liveness | ✓ | ✓ |
//! | endpoint health | ✓ | ✓ |
//! | configuration drift | ✓ | ✓ |
//! | build integrity | | ✓ |
//! | task backlog | | ✓ |
//! | micro patrol | | ✓ |

pub mod build_integrity;
pub mod config_drift;
pub mod endpoint_health;
pub mod micro_patrol;
pub mod process_liveness;
pub mod task_backlog;

pub use build_integrity::BuildIntegrityAnalyzer;
pub use config_drift::ConfigDriftAnalyzer;
pub use endpoint_health::EndpointHealthAnalyzer;
pub use micro_patrol::{DanglingRouteCheck, FallbackWithoutDefaultCheck, MicroCheck, MicroPatrolAnalyzer};
pub use process_liveness::{LivenessTracker, ProcessLivenessAnalyzer};
pub use task_backlog::TaskBacklogAnalyzer;

use crate::error::AnalyzerError;
use crate::types::{AnalyzerResult, CycleMode};
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Analyzer names as they appear in issues, weak point ids and strategy keys
pub mod names {
    pub const PROCESS_LIVENESS: &str = "processLiveness";
    pub const ENDPOINT_HEALTH: &str = "endpointHealth";
    pub const CONFIG_DRIFT: &str = "configDrift";
    pub const BUILD_INTEGRITY: &str = "buildIntegrity";
    pub const TASK_BACKLOG: &str = "taskBacklog";
    pub const MICRO_PATROL: &str = "microPatrol";
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self) -> Result<AnalyzerResult, AnalyzerError>;
}

/// Which cycle modes include an analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerTier {
    /// Runs in light and full cycles
    Fast,
    /// Runs in full cycles only
    Thorough,
}

impl AnalyzerTier {
    fn included_in(self, mode: CycleMode) -> bool {
        match mode {
            CycleMode::Light => self == AnalyzerTier::Fast,
            CycleMode::Full => true,
        }
    }
}

/// Registered analyzers in registration order
#[derive(Clone, Default)]
pub struct AnalyzerSet {
    analyzers: Vec<(AnalyzerTier, Arc<dyn Analyzer>)>,
}

impl AnalyzerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tier: AnalyzerTier, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.push((tier, analyzer));
    }

    pub fn with(mut self, tier: AnalyzerTier, analyzer: Arc<dyn Analyzer>) -> Self {
        self.register(tier, analyzer);
        self
    }

    /// Analyzer names that run in the given mode
    pub fn names_for(&self, mode: CycleMode) -> Vec<String> {
        self.for_mode(mode)
            .iter()
            .map(|analyzer| analyzer.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    fn for_mode(&self, mode: CycleMode) -> Vec<Arc<dyn Analyzer>> {
        self.analyzers
            .iter()
            .filter(|(tier, _)| tier.included_in(mode))
            .map(|(_, analyzer)| analyzer.clone())
            .collect()
    }

    /// Run every analyzer for `mode` concurrently
    ///
    /// Results keep registration order.
    pub async fn run(&self, mode: CycleMode, timeout: Duration) -> Vec<AnalyzerResult> {
        let analyzers = self.for_mode(mode);
        join_all(
            analyzers
                .iter()
                .map(|analyzer| run_one(analyzer.as_ref(), timeout)),
        )
        .await
    }
}

async fn run_one(analyzer: &dyn Analyzer, timeout: Duration) -> AnalyzerResult {
    let name = analyzer.name().to_string();
    let guarded = AssertUnwindSafe(analyzer.analyze()).catch_unwind();

    let outcome = match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(AnalyzerError::Panicked(name.clone())),
        Err(_) => Err(AnalyzerError::Timeout {
            analyzer: name.clone(),
            millis: timeout.as_millis() as u64,
        }),
    };

    match outcome {
        Ok(result) => {
            debug!("Analyzer {} reported {} issues", name, result.issues.len());
            result
        }
        Err(e) => {
            warn!("Analyzer {} failed: {}", name, e);
            AnalyzerResult::failed(name, e.to_string())
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::StaticAnalyzer;
    use super::*;
    use crate::types::{Issue, Severity};

    struct BrokenAnalyzer;

    #[async_trait]
    impl Analyzer for BrokenAnalyzer {
        fn name(&self) -> &str {
            "broken"
        }

        async fn analyze(&self) -> Result<AnalyzerResult, AnalyzerError> {
            Err(AnalyzerError::Probe("no route to host".to_string()))
        }
    }

    fn issue(analyzer: &str) -> Issue {
        Issue::new(analyzer, "x", Severity::Medium, "something")
    }

    #[tokio::test]
    async fn test_light_mode_runs_fast_tier_only() {
        let set = AnalyzerSet::new()
            .with(AnalyzerTier::Fast, StaticAnalyzer::new("fast", vec![issue("fast")]))
            .with(AnalyzerTier::Thorough, StaticAnalyzer::new("slow", vec![issue("slow")]));

        let light = set.run(CycleMode::Light, Duration::from_secs(1)).await;
        let full = set.run(CycleMode::Full, Duration::from_secs(1)).await;

        assert_eq!(light.len(), 1);
        assert_eq!(light[0].analyzer, "fast");
        assert_eq!(full.len(), 2);
        assert_eq!(set.names_for(CycleMode::Full), vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn test_failure_and_timeout_become_error_results() {
        let set = AnalyzerSet::new()
            .with(AnalyzerTier::Fast, Arc::new(BrokenAnalyzer))
            .with(
                AnalyzerTier::Fast,
                StaticAnalyzer::slow("sleepy", Duration::from_secs(5)),
            )
            .with(AnalyzerTier::Fast, StaticAnalyzer::new("ok", vec![issue("ok")]));

        let results = set.run(CycleMode::Light, Duration::from_millis(50)).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].error.as_deref().unwrap().contains("no route to host"));
        assert!(results[0].issues.is_empty());
        assert!(results[1].error.as_deref().unwrap().contains("timed out"));
        assert!(results[2].error.is_none());
        assert_eq!(results[2].issues.len(), 1);
    }
}
