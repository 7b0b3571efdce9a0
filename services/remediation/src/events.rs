//! Cycle events and optional subsystems
//!
//! Event sinks and cycle observers are optional. They are resolved once at
//! startup into [`Capabilities`] and handed to the engine; every publish or
//! notification is best-effort.

use crate::error::EventError;
use crate::types::Cycle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use message_router::Message;
use relays::RelayRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Source name attached to every event the loop emits
pub const EVENT_SOURCE: &str = "remediation-loop";
pub const CYCLE_COMPLETED: &str = "cycle.completed";
pub const WEAK_POINT_CRITICAL: &str = "cycle.weakpoint.critical";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    /// Error or critical
    pub fn is_alarming(self) -> bool {
        matches!(self, EventSeverity::Error | EventSeverity::Critical)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub event_type: String,
    pub severity: EventSeverity,
    pub payload: Value,
}

impl CycleEvent {
    pub fn new(event_type: impl Into<String>, severity: EventSeverity, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: EVENT_SOURCE.to_string(),
            event_type: event_type.into(),
            severity,
            payload,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Events describing a completed cycle
///
/// One completion event, `warning` when any weak point was found, plus one
/// `critical` event per critical weak point.
pub fn cycle_events(cycle: &Cycle) -> Vec<CycleEvent> {
    let severity = if cycle.weak_points.is_empty() {
        EventSeverity::Info
    } else {
        EventSeverity::Warning
    };

    let mut events = vec![CycleEvent::new(
        CYCLE_COMPLETED,
        severity,
        json!({
            "issuesFound": cycle.weak_points.len(),
            "tasksGenerated": cycle.generated_tasks.len(),
            "cycleId": cycle.id,
        }),
    )];

    events.extend(
        cycle
            .weak_points
            .iter()
            .filter(|point| point.severity == crate::types::Severity::Critical)
            .map(|point| {
                CycleEvent::new(
                    WEAK_POINT_CRITICAL,
                    EventSeverity::Critical,
                    json!({ "weakPoint": point, "cycleId": cycle.id }),
                )
            }),
    );

    events
}

/// Fire-and-forget event publisher
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: CycleEvent) -> Result<(), EventError>;
}

/// In-process fan-out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<CycleEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: CycleEvent) -> Result<(), EventError> {
        // No subscribers is not a failure for a fire-and-forget sink
        if self.sender.send(event).is_err() {
            debug!("Event published with no subscribers");
        }
        Ok(())
    }
}

/// Posts events as JSON to an event bus URL
#[derive(Debug, Clone)]
pub struct HttpEventSink {
    client: reqwest::Client,
    url: String,
}

impl HttpEventSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, EventError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::new(client, url))
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn publish(&self, event: CycleEvent) -> Result<(), EventError> {
        let response = self.client.post(&self.url).json(&event).send().await?;
        if !response.status().is_success() {
            return Err(EventError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Notified after every recorded cycle
#[async_trait]
pub trait CycleObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn on_cycle(&self, cycle: &Cycle) -> Result<(), EventError>;
}

/// Publishes a compact cycle digest onto a relay
pub struct RelayCycleObserver {
    relays: Arc<RelayRegistry>,
    relay_id: String,
}

impl RelayCycleObserver {
    pub fn new(relays: Arc<RelayRegistry>, relay_id: impl Into<String>) -> Self {
        Self {
            relays,
            relay_id: relay_id.into(),
        }
    }
}

#[async_trait]
impl CycleObserver for RelayCycleObserver {
    fn name(&self) -> &str {
        "relay-digest"
    }

    async fn on_cycle(&self, cycle: &Cycle) -> Result<(), EventError> {
        let message = Message::new(
            CYCLE_COMPLETED,
            json!({
                "cycleId": cycle.id,
                "mode": cycle.mode,
                "trigger": cycle.trigger,
                "summary": cycle.summary,
                "weakPoints": cycle.weak_points.len(),
            }),
        );
        self.relays.enqueue(&self.relay_id, message)?;
        Ok(())
    }
}

/// Optional subsystems available to the engine
#[derive(Clone, Default)]
pub struct Capabilities {
    event_sinks: Vec<Arc<dyn EventSink>>,
    observers: Vec<Arc<dyn CycleObserver>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sinks.push(sink);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn CycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn event_sinks(&self) -> &[Arc<dyn EventSink>] {
        &self.event_sinks
    }

    pub fn observers(&self) -> &[Arc<dyn CycleObserver>] {
        &self.observers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Issue, Severity, WeakPoint};
    use relays::{RelayDefinition, RelayOptions};

    fn cycle_with(severities: &[Severity]) -> Cycle {
        let mut cycle = Cycle::placeholder();
        cycle.weak_points = severities
            .iter()
            .enumerate()
            .filter_map(|(n, severity)| {
                WeakPoint::from_issue(&Issue::new("a", n.to_string(), *severity, "x"))
            })
            .collect();
        cycle
    }

    #[test]
    fn test_quiet_cycle_emits_info() {
        let events = cycle_events(&cycle_with(&[]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, CYCLE_COMPLETED);
        assert_eq!(events[0].severity, EventSeverity::Info);
        assert_eq!(events[0].payload["issuesFound"], 0);
    }

    #[test]
    fn test_critical_weak_points_emit_events() {
        let events = cycle_events(&cycle_with(&[
            Severity::Critical,
            Severity::Medium,
            Severity::Critical,
        ]));

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].severity, EventSeverity::Warning);
        assert_eq!(events[0].payload["issuesFound"], 3);
        assert!(events[1..]
            .iter()
            .all(|e| e.event_type == WEAK_POINT_CRITICAL && e.severity == EventSeverity::Critical));
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let sink = BroadcastEventSink::new(8);
        sink.publish(CycleEvent::new("nobody.listening", EventSeverity::Info, Value::Null))
            .await
            .unwrap();

        let mut receiver = sink.subscribe();
        sink.publish(CycleEvent::new("deploy.failed", EventSeverity::Error, Value::Null))
            .await
            .unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type, "deploy.failed");
        assert_eq!(event.source, EVENT_SOURCE);
    }

    #[tokio::test]
    async fn test_http_sink_reports_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/events")
            .with_status(500)
            .create_async()
            .await;

        let sink =
            HttpEventSink::with_timeout(format!("{}/events", server.url()), Duration::from_secs(5))
                .unwrap();
        let result = sink
            .publish(CycleEvent::new(CYCLE_COMPLETED, EventSeverity::Info, Value::Null))
            .await;

        assert!(matches!(result, Err(EventError::Rejected(500))));
    }

    #[tokio::test]
    async fn test_relay_observer_enqueues_digest() {
        let relays = Arc::new(RelayRegistry::new());
        relays
            .register(RelayDefinition::new("digest", "ops"), RelayOptions::default())
            .unwrap();
        let observer = RelayCycleObserver::new(relays.clone(), "digest");

        observer.on_cycle(&cycle_with(&[Severity::High])).await.unwrap();

        let buffered = relays.buffered_messages("digest").unwrap();
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].message.message_type(), CYCLE_COMPLETED);
        assert_eq!(buffered[0].message.payload()["weakPoints"], 1);
    }
}
