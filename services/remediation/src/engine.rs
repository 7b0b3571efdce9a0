//! # Control Loop Engine
//!
//! ## Cycle
//!
//! ```text
//! analyze (concurrent, per-analyzer timeout)
//!    ↓
//! classify → weak points (replace previous snapshot)
//!    ↓
//! generate tasks (strategy resolver; light mode ⇒ all suggested)
//!    ↓
//! dispatch pending tasks (full mode only)
//!    ↓
//! summarize → history → events → observers
//! ```
//!
//! ## Single Flight
//! At most one cycle runs at a time. A request that arrives while a cycle is
//! running records its trigger name as pending and immediately receives the
//! last completed cycle; it never queues a second run. The running flag is
//! released by a drop guard, so a failing or cancelled cycle cannot leave
//! the engine stuck.

use crate::analyzers::AnalyzerSet;
use crate::dispatch::TaskDispatcher;
use crate::error::Result;
use crate::events::{cycle_events, Capabilities};
use crate::history::HistoryStore;
use crate::policy::{best_effort, FailurePolicy};
use crate::strategies::StrategyResolver;
use crate::types::{
    AnalyzerResult, Cycle, CycleMode, DispatchResult, DispatchStatus, EngineStatus, Task,
    TaskStatus, TriggerContext, WeakPoint,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;
use vigil_config::defaults::control_loop::PROBE_TIMEOUT_SECS;

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Upper bound for each analyzer run
    pub probe_timeout: Duration,
    /// What to do when the history append fails
    pub history_policy: FailurePolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
            history_policy: FailurePolicy::LogAndContinue,
        }
    }
}

/// Clears the running flag when the cycle ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ControlLoopEngine {
    analyzers: AnalyzerSet,
    strategies: StrategyResolver,
    dispatcher: Arc<dyn TaskDispatcher>,
    history: Arc<HistoryStore>,
    capabilities: Capabilities,
    options: EngineOptions,
    running: AtomicBool,
    pending_triggers: Mutex<BTreeSet<String>>,
    last_cycle: RwLock<Option<Cycle>>,
    weak_points: RwLock<Vec<WeakPoint>>,
}

impl ControlLoopEngine {
    pub fn new(
        analyzers: AnalyzerSet,
        strategies: StrategyResolver,
        dispatcher: Arc<dyn TaskDispatcher>,
        history: Arc<HistoryStore>,
    ) -> Self {
        Self {
            analyzers,
            strategies,
            dispatcher,
            history,
            capabilities: Capabilities::default(),
            options: EngineOptions::default(),
            running: AtomicBool::new(false),
            pending_triggers: Mutex::new(BTreeSet::new()),
            last_cycle: RwLock::new(None),
            weak_points: RwLock::new(Vec::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one cycle, or return the last completed cycle if one is running
    pub async fn run_cycle(
        &self,
        trigger: &str,
        context: Option<TriggerContext>,
        mode: CycleMode,
    ) -> Result<Cycle> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Cycle already running, {} recorded as pending", trigger);
            self.pending_triggers.lock().insert(trigger.to_string());
            return Ok(self.last_completed().await);
        }
        let _guard = RunningGuard(&self.running);
        self.pending_triggers.lock().remove(trigger);

        info!("Starting {} cycle (trigger: {})", mode, trigger);

        let analysis = self.analyzers.run(mode, self.options.probe_timeout).await;
        let weak_points = self.classify(&analysis);
        let tasks = self.generate_tasks(&analysis, mode);
        let dispatch_results = match mode {
            CycleMode::Light => Vec::new(),
            CycleMode::Full => self.dispatch(&tasks).await,
        };

        let summary = build_summary(
            &analysis,
            &tasks,
            &dispatch_results,
            mode,
            trigger,
            context.as_ref(),
        );
        let cycle = Cycle {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            trigger: trigger.to_string(),
            mode,
            analysis,
            weak_points,
            generated_tasks: tasks,
            dispatch_results,
            summary,
        };

        self.options
            .history_policy
            .apply("history append", self.history.append(&cycle).await)?;
        *self.last_cycle.write() = Some(cycle.clone());

        self.emit_events(&cycle).await;
        self.notify_observers(&cycle).await;

        info!("{}", cycle.summary);
        Ok(cycle)
    }

    /// Weak points of the most recent cycle
    pub fn weak_points(&self) -> Vec<WeakPoint> {
        self.weak_points.read().clone()
    }

    pub fn last_cycle(&self) -> Option<Cycle> {
        self.last_cycle.read().clone()
    }

    pub async fn status(&self) -> EngineStatus {
        let latest = match self.last_cycle() {
            Some(cycle) => Some(cycle),
            None => best_effort("history read", self.history.latest().await).flatten(),
        };

        EngineStatus {
            last_run_at: latest.as_ref().map(|cycle| cycle.timestamp),
            last_summary: latest.map(|cycle| cycle.summary),
            is_running: self.is_running(),
            pending_triggers: self.pending_triggers.lock().iter().cloned().collect(),
        }
    }

    /// Up to `limit` recorded cycles, newest first
    pub async fn history(&self, limit: usize) -> Result<Vec<Cycle>> {
        Ok(self.history.recent(limit).await?)
    }

    /// In-memory cycle, then history, then a placeholder
    async fn last_completed(&self) -> Cycle {
        if let Some(cycle) = self.last_cycle() {
            return cycle;
        }
        best_effort("history read", self.history.latest().await)
            .flatten()
            .unwrap_or_else(Cycle::placeholder)
    }

    fn classify(&self, analysis: &[AnalyzerResult]) -> Vec<WeakPoint> {
        let points: Vec<WeakPoint> = analysis
            .iter()
            .flat_map(|result| result.issues.iter())
            .filter_map(WeakPoint::from_issue)
            .collect();
        *self.weak_points.write() = points.clone();
        points
    }

    fn generate_tasks(&self, analysis: &[AnalyzerResult], mode: CycleMode) -> Vec<Task> {
        analysis
            .iter()
            .flat_map(|result| result.issues.iter())
            .filter_map(|issue| self.strategies.resolve(issue))
            .map(|mut task| {
                if mode == CycleMode::Light {
                    task.status = TaskStatus::Suggested;
                }
                task
            })
            .collect()
    }

    async fn dispatch(&self, tasks: &[Task]) -> Vec<DispatchResult> {
        let mut results = Vec::new();
        for task in tasks.iter().filter(|task| task.is_dispatchable()) {
            results.push(self.dispatcher.dispatch(task).await);
        }
        results
    }

    async fn emit_events(&self, cycle: &Cycle) {
        let sinks = self.capabilities.event_sinks();
        if sinks.is_empty() {
            return;
        }
        for event in cycle_events(cycle) {
            for sink in sinks {
                best_effort("event emission", sink.publish(event.clone()).await);
            }
        }
    }

    async fn notify_observers(&self, cycle: &Cycle) {
        for observer in self.capabilities.observers() {
            if let Err(e) = observer.on_cycle(cycle).await {
                warn!("Cycle observer {} failed: {}", observer.name(), e);
            }
        }
    }
}

fn build_summary(
    analysis: &[AnalyzerResult],
    tasks: &[Task],
    dispatch_results: &[DispatchResult],
    mode: CycleMode,
    trigger: &str,
    context: Option<&TriggerContext>,
) -> String {
    let findings: usize = analysis.iter().map(|result| result.issues.len()).sum();
    let count = |status: DispatchStatus| {
        dispatch_results
            .iter()
            .filter(|result| result.status == status)
            .count()
    };

    let source = match context {
        Some(context) if !context.metadata.is_empty() => "context trigger",
        _ => "control loop",
    };
    let mode_label = match mode {
        CycleMode::Light => " [light]",
        CycleMode::Full => "",
    };
    let reason = context
        .and_then(|context| context.reason.as_deref())
        .filter(|reason| !reason.is_empty())
        .unwrap_or(trigger);
    let reason_label = if reason.is_empty() {
        String::new()
    } else {
        format!(" [{}]", reason)
    };

    format!(
        "Cycle via {}{}{}: {} findings, {} tasks generated, {} dispatched, {} queued, {} failed.",
        source,
        mode_label,
        reason_label,
        findings,
        tasks.len(),
        count(DispatchStatus::Dispatched),
        count(DispatchStatus::Queued),
        count(DispatchStatus::Failed)
    )
}

/// Something that can be asked to run a cycle
///
/// Triggers depend on this rather than on the engine so they can be driven
/// and tested in isolation.
#[async_trait]
pub trait CycleRequester: Send + Sync {
    async fn request_cycle(&self, trigger: &str, context: Option<TriggerContext>, mode: CycleMode);
}

#[async_trait]
impl CycleRequester for ControlLoopEngine {
    async fn request_cycle(&self, trigger: &str, context: Option<TriggerContext>, mode: CycleMode) {
        if let Err(e) = self.run_cycle(trigger, context, mode).await {
            warn!("Cycle requested by {} failed: {}", trigger, e);
        }
    }
}
