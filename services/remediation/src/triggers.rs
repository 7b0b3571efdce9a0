//! # Cycle Triggers
//!
//! | Trigger | Fires | Mode |
//! |---|---|---|
//! | interval | every configured period | full |
//! | request volume | every `request_threshold` recorded requests | light |
//! | error rate | every `error_threshold` recorded errors | full |
//! | deploy | on every recorded deploy | full |
//! | event | allow-listed `error`/`critical` events | full |
//!
//! Cycles requested from background tasks run in their own spawned task, so
//! stopping a trigger never cancels a cycle that is already in flight.

use crate::engine::CycleRequester;
use crate::events::{BroadcastEventSink, CycleEvent, EVENT_SOURCE};
use crate::types::{CycleMode, TriggerContext};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vigil_config::TriggerSettings;

pub const INTERVAL_TRIGGER: &str = "interval";
pub const REQUEST_VOLUME_TRIGGER: &str = "request-volume";
pub const ERROR_RATE_TRIGGER: &str = "error-rate";
pub const DEPLOY_TRIGGER: &str = "deploy";
pub const EVENT_TRIGGER: &str = "event";

fn spawn_cycle(
    requester: &Arc<dyn CycleRequester>,
    trigger: &'static str,
    context: Option<TriggerContext>,
    mode: CycleMode,
) -> JoinHandle<()> {
    let requester = requester.clone();
    tokio::spawn(async move {
        requester.request_cycle(trigger, context, mode).await;
    })
}

/// Runs a full cycle every period until stopped
pub struct IntervalTrigger {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalTrigger {
    /// Start the timer; the first cycle fires one period from now
    pub fn start(requester: Arc<dyn CycleRequester>, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                interval.tick().await;
                debug!("Interval trigger fired");
                spawn_cycle(&requester, INTERVAL_TRIGGER, None, CycleMode::Full);
            }
        });

        info!("Interval trigger started ({:?})", period);
        Self {
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            info!("Interval trigger stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for IntervalTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Counts occurrences and fires a cycle each time the threshold is reached
pub struct CounterTrigger {
    name: &'static str,
    threshold: u64,
    mode: CycleMode,
    count: AtomicU64,
    requester: Arc<dyn CycleRequester>,
}

impl CounterTrigger {
    pub fn new(
        name: &'static str,
        threshold: u64,
        mode: CycleMode,
        requester: Arc<dyn CycleRequester>,
    ) -> Self {
        Self {
            name,
            threshold: threshold.max(1),
            mode,
            count: AtomicU64::new(0),
            requester,
        }
    }

    /// Request-volume counter, fires light cycles
    pub fn request_volume(threshold: u64, requester: Arc<dyn CycleRequester>) -> Self {
        Self::new(REQUEST_VOLUME_TRIGGER, threshold, CycleMode::Light, requester)
    }

    /// Error-rate counter, fires full cycles
    pub fn error_rate(threshold: u64, requester: Arc<dyn CycleRequester>) -> Self {
        Self::new(ERROR_RATE_TRIGGER, threshold, CycleMode::Full, requester)
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Record one occurrence; returns whether a cycle was fired
    pub fn record(&self) -> bool {
        let threshold = self.threshold;
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(if count + 1 >= threshold { 0 } else { count + 1 })
            })
            .unwrap_or_default();

        if previous + 1 < threshold {
            return false;
        }

        info!("{} threshold {} reached", self.name, threshold);
        spawn_cycle(
            &self.requester,
            self.name,
            Some(TriggerContext::with_reason(self.name)),
            self.mode,
        );
        true
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }
}

/// Fires a full cycle for every recorded deploy
pub struct DeployTrigger {
    last_deploy: RwLock<Option<DateTime<Utc>>>,
    requester: Arc<dyn CycleRequester>,
}

impl DeployTrigger {
    pub fn new(requester: Arc<dyn CycleRequester>) -> Self {
        Self {
            last_deploy: RwLock::new(None),
            requester,
        }
    }

    pub fn last_deploy(&self) -> Option<DateTime<Utc>> {
        *self.last_deploy.read()
    }

    /// Record a deploy and run a full cycle for it
    pub async fn record_deploy(&self, metadata: Map<String, Value>) {
        let deployed_at = Utc::now();
        *self.last_deploy.write() = Some(deployed_at);

        let mut context = TriggerContext::with_reason(DEPLOY_TRIGGER)
            .with_metadata("deployedAt", deployed_at.to_rfc3339());
        context.metadata.extend(metadata);

        self.requester
            .request_cycle(DEPLOY_TRIGGER, Some(context), CycleMode::Full)
            .await;
    }
}

/// Fires full cycles for allow-listed, alarming events from other sources
pub struct EventTrigger {
    allow_list: HashSet<String>,
    requester: Arc<dyn CycleRequester>,
}

impl EventTrigger {
    pub fn new<I, S>(allow_list: I, requester: Arc<dyn CycleRequester>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow_list: allow_list.into_iter().map(Into::into).collect(),
            requester,
        }
    }

    pub fn accepts(&self, event: &CycleEvent) -> bool {
        event.source != EVENT_SOURCE
            && event.severity.is_alarming()
            && self.allow_list.contains(&event.event_type)
    }

    /// Run a cycle for the event if it passes the filter
    pub async fn on_event(&self, event: &CycleEvent) -> bool {
        if !self.accepts(event) {
            return false;
        }

        let context = TriggerContext::with_reason(event.event_type.clone())
            .with_metadata("eventId", event.id.to_string())
            .with_metadata("eventSource", event.source.clone())
            .with_metadata("severity", serde_json::to_value(event.severity).unwrap_or(Value::Null));
        self.requester
            .request_cycle(EVENT_TRIGGER, Some(context), CycleMode::Full)
            .await;
        true
    }

    /// Feed events from a broadcast sink into this trigger
    pub fn attach(self: &Arc<Self>, sink: &BroadcastEventSink) -> JoinHandle<()> {
        let trigger = self.clone();
        let mut receiver = sink.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if trigger.accepts(&event) {
                            let trigger = trigger.clone();
                            tokio::spawn(async move {
                                trigger.on_event(&event).await;
                            });
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event trigger lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

/// All triggers of a running service, stopped together
pub struct TriggerSet {
    interval: Option<IntervalTrigger>,
    pub request_volume: Arc<CounterTrigger>,
    pub error_rate: Arc<CounterTrigger>,
    pub deploy: Arc<DeployTrigger>,
    pub events: Arc<EventTrigger>,
    listeners: Vec<JoinHandle<()>>,
}

impl TriggerSet {
    /// Build every trigger; the interval timer starts only when a period is given
    pub fn new(
        settings: &TriggerSettings,
        requester: Arc<dyn CycleRequester>,
        interval: Option<Duration>,
    ) -> Self {
        Self {
            interval: interval.map(|period| IntervalTrigger::start(requester.clone(), period)),
            request_volume: Arc::new(CounterTrigger::request_volume(
                settings.request_threshold,
                requester.clone(),
            )),
            error_rate: Arc::new(CounterTrigger::error_rate(
                settings.error_threshold,
                requester.clone(),
            )),
            deploy: Arc::new(DeployTrigger::new(requester.clone())),
            events: Arc::new(EventTrigger::new(
                settings.event_allow_list.iter().cloned(),
                requester,
            )),
            listeners: Vec::new(),
        }
    }

    /// Close the loop between the event sink and the event trigger
    pub fn listen(&mut self, sink: &BroadcastEventSink) {
        self.listeners.push(self.events.attach(sink));
    }

    pub fn stop(&mut self) {
        if let Some(interval) = self.interval.take() {
            interval.stop();
        }
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        self.request_volume.reset();
        self.error_rate.reset();
        info!("Triggers stopped");
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingRequester;
    use super::*;
    use crate::events::{EventSeverity, EventSink};
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_counter_fires_at_threshold_and_resets() {
        let (requester, mut requests) = RecordingRequester::new();
        let trigger = CounterTrigger::request_volume(3, requester);

        assert!(!trigger.record());
        assert!(!trigger.record());
        assert!(trigger.record());
        assert_eq!(trigger.count(), 0);

        let (name, context, mode) = timeout(Duration::from_secs(1), requests.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(name, REQUEST_VOLUME_TRIGGER);
        assert_eq!(mode, CycleMode::Light);
        assert_eq!(context.unwrap().reason.as_deref(), Some(REQUEST_VOLUME_TRIGGER));

        trigger.record();
        trigger.reset();
        assert_eq!(trigger.count(), 0);
    }

    #[tokio::test]
    async fn test_counters_are_independent() {
        let (requester, _requests) = RecordingRequester::new();
        let requests_seen = CounterTrigger::request_volume(5, requester.clone());
        let errors_seen = CounterTrigger::error_rate(2, requester);

        requests_seen.record();
        assert!(!errors_seen.record());
        assert!(errors_seen.record());
        assert_eq!(requests_seen.count(), 1);
    }

    #[tokio::test]
    async fn test_deploy_context() {
        let (requester, mut requests) = RecordingRequester::new();
        let trigger = DeployTrigger::new(requester);
        let mut metadata = Map::new();
        metadata.insert("version".to_string(), Value::from("2.0.1"));

        trigger.record_deploy(metadata).await;

        let (name, context, mode) = requests.recv().await.unwrap();
        let context = context.unwrap();
        assert_eq!(name, DEPLOY_TRIGGER);
        assert_eq!(mode, CycleMode::Full);
        assert_eq!(context.reason.as_deref(), Some("deploy"));
        assert_eq!(context.metadata["version"], "2.0.1");
        assert!(context.metadata.contains_key("deployedAt"));
        assert!(trigger.last_deploy().is_some());
    }

    #[tokio::test]
    async fn test_event_filter() {
        let (requester, mut requests) = RecordingRequester::new();
        let trigger = EventTrigger::new(["deploy.failed"], requester);

        let event = |event_type: &str, severity| {
            CycleEvent::new(event_type, severity, Value::Null).with_source("deployer")
        };
        let own = CycleEvent::new("deploy.failed", EventSeverity::Critical, Value::Null);

        assert!(!trigger.on_event(&event("deploy.failed", EventSeverity::Warning)).await);
        assert!(!trigger.on_event(&event("disk.full", EventSeverity::Critical)).await);
        assert!(!trigger.on_event(&own).await);
        assert!(trigger.on_event(&event("deploy.failed", EventSeverity::Error)).await);

        let (name, context, _) = requests.recv().await.unwrap();
        assert_eq!(name, EVENT_TRIGGER);
        assert_eq!(context.unwrap().reason.as_deref(), Some("deploy.failed"));
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_event_trigger_attached_to_sink() {
        let (requester, mut requests) = RecordingRequester::new();
        let trigger = Arc::new(EventTrigger::new(["relay.overflow"], requester));
        let sink = BroadcastEventSink::new(16);
        let listener = trigger.attach(&sink);

        sink.publish(
            CycleEvent::new("relay.overflow", EventSeverity::Critical, Value::Null)
                .with_source("relay-monitor"),
        )
        .await
        .unwrap();

        let (name, _, _) = timeout(Duration::from_secs(1), requests.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(name, EVENT_TRIGGER);
        listener.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_fires_until_stopped() {
        let (requester, mut requests) = RecordingRequester::new();
        let trigger = IntervalTrigger::start(requester, Duration::from_secs(60));
        assert!(trigger.is_active());

        tokio::time::sleep(Duration::from_secs(61)).await;
        let (name, _, mode) = requests.recv().await.unwrap();
        assert_eq!(name, INTERVAL_TRIGGER);
        assert_eq!(mode, CycleMode::Full);

        trigger.stop();
        assert!(!trigger.is_active());
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(requests.try_recv().is_err());
    }
}
