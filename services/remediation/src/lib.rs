//! # Vigil Remediation Loop
//!
//! ## Purpose
//! Periodically diagnoses the running system, turns findings into remediation
//! tasks and hands those tasks to the worker pool.
//!
//! ## Architecture Role
//!
//! ```text
//! Triggers (interval / counters / deploy / events)
//!        ↓ CycleRequester
//! ControlLoopEngine ── AnalyzerSet ── StrategyResolver ── TaskDispatcher
//!        ↓
//! HistoryStore + EventSinks + CycleObservers
//! ```
//!
//! [`service::RemediationService`] assembles all of this from a
//! [`vigil_config::VigilConfig`].

pub mod analyzers;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod policy;
pub mod service;
pub mod strategies;
pub mod triggers;
pub mod types;

pub use analyzers::{Analyzer, AnalyzerSet, AnalyzerTier, LivenessTracker};
pub use dispatch::{HttpWorkerPool, RelayTaskDispatcher, TaskDispatcher, WorkerPoolEndpoint};
pub use engine::{ControlLoopEngine, CycleRequester, EngineOptions};
pub use error::{AnalyzerError, DispatchError, EventError, HistoryError, LoopError, Result};
pub use events::{
    BroadcastEventSink, Capabilities, CycleEvent, CycleObserver, EventSeverity, EventSink,
    HttpEventSink, RelayCycleObserver,
};
pub use history::HistoryStore;
pub use policy::FailurePolicy;
pub use service::RemediationService;
pub use strategies::{Strategy, StrategyResolver};
pub use triggers::{CounterTrigger, DeployTrigger, EventTrigger, IntervalTrigger, TriggerSet};
pub use types::{
    AnalyzerResult, Cycle, CycleMode, DispatchResult, DispatchStatus, EngineStatus, Issue,
    Severity, Task, TaskPriority, TaskStatus, TriggerContext, WeakPoint,
};
