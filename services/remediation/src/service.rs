//! Service assembly from configuration
//!
//! Builds the router, the relay registry and the engine with its reference
//! analyzers, strategies and dispatcher, all from one [`VigilConfig`].
//!
//! When tasks are dispatched through a relay, the relay's channel gets a
//! `task.dispatch` route to a worker-pool endpoint so a flush delivers them.

use crate::analyzers::{
    AnalyzerSet, AnalyzerTier, BuildIntegrityAnalyzer, ConfigDriftAnalyzer,
    EndpointHealthAnalyzer, LivenessTracker, MicroPatrolAnalyzer, ProcessLivenessAnalyzer,
    TaskBacklogAnalyzer,
};
use crate::dispatch::{
    HttpWorkerPool, RelayTaskDispatcher, TaskDispatcher, WorkerPoolEndpoint, TASK_DISPATCH_TYPE,
};
use crate::engine::{ControlLoopEngine, CycleRequester, EngineOptions};
use crate::error::{LoopError, Result};
use crate::events::{BroadcastEventSink, Capabilities, HttpEventSink, RelayCycleObserver};
use crate::history::HistoryStore;
use crate::strategies::StrategyResolver;
use crate::triggers::TriggerSet;
use message_router::{Endpoint, MessageRouter, Route, RouterConfig};
use relays::{FlushReport, RelayDispatcher, RelayRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use vigil_config::VigilConfig;

/// Capacity of the in-process event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Endpoint id that relayed tasks are routed to
pub const WORKER_POOL_ENDPOINT: &str = "worker-pool";

pub struct RemediationService {
    config: VigilConfig,
    router: MessageRouter,
    relays: Arc<RelayRegistry>,
    relay_dispatcher: RelayDispatcher,
    liveness: Arc<LivenessTracker>,
    events: BroadcastEventSink,
    engine: Arc<ControlLoopEngine>,
}

impl RemediationService {
    pub fn build(config: VigilConfig) -> Result<Self> {
        let router = MessageRouter::standalone(RouterConfig::from(&config.routing));
        let relays = Arc::new(RelayRegistry::from_settings(&config.relays)?);
        let relay_dispatcher = RelayDispatcher::new(relays.clone(), router.clone());
        let liveness = Arc::new(LivenessTracker::new());
        let events = BroadcastEventSink::new(EVENT_CHANNEL_CAPACITY);

        let analyzers = build_analyzers(&config, &router, &relays, &liveness)?;
        let dispatcher = build_dispatcher(&config, &router, &relays)?;
        let capabilities = build_capabilities(&config, &relays, &events)?;

        let loop_settings = &config.control_loop;
        let history = Arc::new(HistoryStore::with_limit(
            resolve(&config.global.working_dir, &loop_settings.history_path),
            loop_settings.history_limit,
        ));
        let options = EngineOptions {
            probe_timeout: Duration::from_secs(loop_settings.probe_timeout_secs),
            ..EngineOptions::default()
        };

        info!(
            "✅ Control loop assembled: {} analyzers, {} relays, dispatch via {}",
            analyzers.len(),
            relays.len(),
            dispatcher.name()
        );

        let engine = ControlLoopEngine::new(
            analyzers,
            StrategyResolver::with_defaults(),
            dispatcher,
            history,
        )
        .with_capabilities(capabilities)
        .with_options(options);

        Ok(Self {
            config,
            router,
            relays,
            relay_dispatcher,
            liveness,
            events,
            engine: Arc::new(engine),
        })
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn relays(&self) -> &Arc<RelayRegistry> {
        &self.relays
    }

    pub fn liveness(&self) -> &Arc<LivenessTracker> {
        &self.liveness
    }

    pub fn events(&self) -> &BroadcastEventSink {
        &self.events
    }

    pub fn engine(&self) -> &Arc<ControlLoopEngine> {
        &self.engine
    }

    /// Start every trigger and wire the event trigger to the event channel
    pub fn start_triggers(&self) -> TriggerSet {
        let requester: Arc<dyn CycleRequester> = self.engine.clone();
        let interval = Duration::from_secs(self.config.control_loop.interval_secs);
        let interval = (!interval.is_zero()).then_some(interval);

        let mut triggers = TriggerSet::new(&self.config.triggers, requester, interval);
        triggers.listen(&self.events);
        triggers
    }

    pub async fn flush_relays(&self) -> Vec<FlushReport> {
        self.relay_dispatcher.flush_all().await
    }

    /// Flush every relay once per period until the handle is aborted
    pub fn start_relay_flush(&self, period: Duration) -> JoinHandle<()> {
        let dispatcher = self.relay_dispatcher.clone();
        info!("⏱️ Flushing relays every {:?}", period);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                interval.tick().await;
                let reports = dispatcher.flush_all().await;
                let attempted: usize = reports.iter().map(|r| r.attempted).sum();
                if attempted == 0 {
                    continue;
                }
                let forwarded: usize = reports.iter().map(|r| r.forwarded).sum();
                let failed: usize = reports.iter().map(|r| r.failed).sum();
                debug!(
                    "Relay flush: {} attempted, {} forwarded, {} failed",
                    attempted, forwarded, failed
                );
            }
        })
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn build_analyzers(
    config: &VigilConfig,
    router: &MessageRouter,
    relays: &Arc<RelayRegistry>,
    liveness: &Arc<LivenessTracker>,
) -> Result<AnalyzerSet> {
    let probes = &config.probes;
    let working_dir = &config.global.working_dir;

    let endpoint = EndpointHealthAnalyzer::with_timeout(
        probes.api_base.clone(),
        probes.health_paths.clone(),
        probes.latency_budget_ms,
        Duration::from_secs(config.control_loop.probe_timeout_secs.max(1)),
    )
    .map_err(|e| LoopError::Config(e.to_string()))?;

    Ok(AnalyzerSet::new()
        .with(
            AnalyzerTier::Fast,
            Arc::new(ProcessLivenessAnalyzer::new(
                liveness.clone(),
                probes.expected_processes.clone(),
                probes.heartbeat_stale_secs,
            )),
        )
        .with(AnalyzerTier::Fast, Arc::new(endpoint))
        .with(
            AnalyzerTier::Fast,
            Arc::new(ConfigDriftAnalyzer::new(
                working_dir.clone(),
                probes.env_snapshots.clone(),
            )),
        )
        .with(
            AnalyzerTier::Thorough,
            Arc::new(BuildIntegrityAnalyzer::new(
                working_dir.clone(),
                probes.typecheck_command.clone(),
                probes.lint_command.clone(),
            )),
        )
        .with(
            AnalyzerTier::Thorough,
            Arc::new(TaskBacklogAnalyzer::new(relays.clone())),
        )
        .with(
            AnalyzerTier::Thorough,
            Arc::new(MicroPatrolAnalyzer::for_router(router)),
        ))
}

fn build_dispatcher(
    config: &VigilConfig,
    router: &MessageRouter,
    relays: &Arc<RelayRegistry>,
) -> Result<Arc<dyn TaskDispatcher>> {
    let settings = &config.control_loop;
    let pool = HttpWorkerPool::with_timeout(
        &settings.worker_pool_base,
        Duration::from_secs(settings.dispatch_timeout_secs.max(1)),
    )
    .map_err(|e| LoopError::Config(e.to_string()))?;

    let Some(relay_id) = &settings.dispatch_relay else {
        return Ok(Arc::new(pool));
    };

    let definition = relays.definition(relay_id).ok_or_else(|| {
        LoopError::Config(format!("dispatch relay '{}' is not configured", relay_id))
    })?;

    router.endpoints().register(
        Endpoint::new(
            WORKER_POOL_ENDPOINT,
            definition.channel.clone(),
            Arc::new(WorkerPoolEndpoint::new(pool.clone())),
        )
        .with_label("Worker pool"),
    )?;
    router.register_route(
        Route::new(&definition.channel, TASK_DISPATCH_TYPE, WORKER_POOL_ENDPOINT)
            .with_description(format!("Tasks relayed through {} to {}", relay_id, pool.tasks_url())),
    )?;
    info!(
        "📬 Relay {} delivers tasks to {} on channel {}",
        relay_id,
        pool.tasks_url(),
        definition.channel
    );

    Ok(Arc::new(RelayTaskDispatcher::new(relays.clone(), relay_id.clone())))
}

fn build_capabilities(
    config: &VigilConfig,
    relays: &Arc<RelayRegistry>,
    events: &BroadcastEventSink,
) -> Result<Capabilities> {
    let settings = &config.control_loop;
    let mut capabilities = Capabilities::new().with_event_sink(Arc::new(events.clone()));

    if let Some(url) = &settings.event_bus_url {
        let sink = HttpEventSink::with_timeout(
            url.clone(),
            Duration::from_secs(settings.dispatch_timeout_secs.max(1)),
        )
        .map_err(|e| LoopError::Config(e.to_string()))?;
        capabilities = capabilities.with_event_sink(Arc::new(sink));
        info!("📡 Publishing cycle events to {}", url);
    }

    if let Some(relay_id) = &settings.digest_relay {
        if !relays.contains(relay_id) {
            return Err(LoopError::Config(format!(
                "digest relay '{}' is not configured",
                relay_id
            )));
        }
        capabilities =
            capabilities.with_observer(Arc::new(RelayCycleObserver::new(relays.clone(), relay_id.clone())));
    }

    Ok(capabilities)
}
