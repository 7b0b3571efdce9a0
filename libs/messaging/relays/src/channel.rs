//! Relay channel registry
//!
//! Each relay owns a bounded FIFO of envelopes plus counters. State lives in
//! the registry and is only touched under the per-entry shard lock, which is
//! never held across an `.await`.

use crate::{RelayError, RelayResult};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use message_router::{Direction, Message};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};
use vigil_config::defaults::relays::{DEFAULT_BUFFER_LIMIT, DEFAULT_DROP_POLICY};
use vigil_config::RelaySettings;

/// Static description of a relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayDefinition {
    pub id: String,
    pub label: String,
    pub direction: Direction,
    /// Channel messages are routed on when the relay is flushed
    pub channel: String,
    pub remote_hint: Option<HashMap<String, String>>,
}

impl RelayDefinition {
    pub fn new(id: impl Into<String>, channel: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            direction: Direction::Bidirectional,
            channel: channel.into(),
            remote_hint: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_remote_hint(mut self, hint: HashMap<String, String>) -> Self {
        self.remote_hint = Some(hint);
        self
    }
}

/// What to do with a new message when the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropPolicy {
    /// Evict the oldest buffered message and accept the new one
    #[default]
    DropOldest,
    /// Reject the new message
    DropNewest,
}

impl DropPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DropPolicy::DropOldest => "drop-oldest",
            DropPolicy::DropNewest => "drop-newest",
        }
    }
}

impl fmt::Display for DropPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DropPolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop-oldest" | "oldest" => Ok(DropPolicy::DropOldest),
            "drop-newest" | "newest" => Ok(DropPolicy::DropNewest),
            other => Err(RelayError::InvalidDropPolicy(other.to_string())),
        }
    }
}

/// Buffering options applied at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    pub buffer_limit: usize,
    pub drop_policy: DropPolicy,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            drop_policy: DEFAULT_DROP_POLICY.parse().unwrap_or_default(),
        }
    }
}

impl RelayOptions {
    pub fn new(buffer_limit: usize, drop_policy: DropPolicy) -> Self {
        Self {
            buffer_limit,
            drop_policy,
        }
    }
}

/// Parse a configured relay into its definition and options
pub fn definition_from_settings(
    settings: &RelaySettings,
) -> RelayResult<(RelayDefinition, RelayOptions)> {
    let direction: Direction = settings
        .direction
        .parse()
        .map_err(|e| RelayError::Config(format!("{}: {}", settings.id, e)))?;
    let drop_policy: DropPolicy = settings.drop_policy.parse()?;

    let mut definition =
        RelayDefinition::new(settings.id.clone(), settings.channel.clone()).with_direction(direction);
    if let Some(label) = &settings.label {
        definition = definition.with_label(label.clone());
    }
    if let Some(hint) = &settings.remote_hint {
        definition = definition.with_remote_hint(hint.clone());
    }

    Ok((
        definition,
        RelayOptions::new(settings.buffer_limit, drop_policy),
    ))
}

/// A buffered message
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub relay_id: String,
    pub message: Message,
    pub enqueued_at: DateTime<Utc>,
}

/// Point-in-time relay counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    pub relay_id: String,
    pub channel: String,
    pub buffer_limit: usize,
    pub buffered: usize,
    pub enqueued: u64,
    pub dropped: u64,
    pub forwarded: u64,
    pub failed: u64,
    pub denied: u64,
}

impl RelayStats {
    /// Buffer occupancy as a fraction of the limit
    pub fn utilization(&self) -> f64 {
        if self.buffer_limit == 0 {
            return 0.0;
        }
        self.buffered as f64 / self.buffer_limit as f64
    }
}

/// Counters produced by one flush pass, folded back into the relay stats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FlushCounts {
    pub forwarded: u64,
    pub failed: u64,
    pub denied: u64,
}

#[derive(Debug)]
struct RelayState {
    definition: RelayDefinition,
    options: RelayOptions,
    queue: VecDeque<Envelope>,
    enqueued: u64,
    dropped: u64,
    forwarded: u64,
    failed: u64,
    denied: u64,
}

impl RelayState {
    fn new(definition: RelayDefinition, options: RelayOptions) -> Self {
        Self {
            queue: VecDeque::with_capacity(options.buffer_limit.min(1024)),
            definition,
            options,
            enqueued: 0,
            dropped: 0,
            forwarded: 0,
            failed: 0,
            denied: 0,
        }
    }

    fn stats(&self) -> RelayStats {
        RelayStats {
            relay_id: self.definition.id.clone(),
            channel: self.definition.channel.clone(),
            buffer_limit: self.options.buffer_limit,
            buffered: self.queue.len(),
            enqueued: self.enqueued,
            dropped: self.dropped,
            forwarded: self.forwarded,
            failed: self.failed,
            denied: self.denied,
        }
    }
}

/// Registry of relay channels and their buffers
#[derive(Debug, Default)]
pub struct RelayRegistry {
    relays: DashMap<String, RelayState>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured relays
    pub fn from_settings(settings: &[RelaySettings]) -> RelayResult<Self> {
        let registry = Self::new();
        for relay in settings {
            let (definition, options) = definition_from_settings(relay)?;
            registry.register(definition, options)?;
        }
        Ok(registry)
    }

    /// Register a relay with an empty buffer
    pub fn register(&self, definition: RelayDefinition, options: RelayOptions) -> RelayResult<()> {
        if options.buffer_limit == 0 {
            return Err(RelayError::Config(format!(
                "{}: buffer_limit must be at least 1",
                definition.id
            )));
        }

        match self.relays.entry(definition.id.clone()) {
            Entry::Occupied(_) => Err(RelayError::DuplicateRelay(definition.id)),
            Entry::Vacant(slot) => {
                info!(
                    "Registered relay {} on channel {} (limit {}, {})",
                    definition.id, definition.channel, options.buffer_limit, options.drop_policy
                );
                slot.insert(RelayState::new(definition, options));
                Ok(())
            }
        }
    }

    /// Remove a relay together with its buffer and counters
    pub fn unregister(&self, relay_id: &str) -> bool {
        let removed = self.relays.remove(relay_id).is_some();
        if !removed {
            warn!("Attempted to unregister unknown relay: {}", relay_id);
        }
        removed
    }

    pub fn contains(&self, relay_id: &str) -> bool {
        self.relays.contains_key(relay_id)
    }

    pub fn definition(&self, relay_id: &str) -> Option<RelayDefinition> {
        self.relays
            .get(relay_id)
            .map(|state| state.definition.clone())
    }

    /// Buffer a message for later delivery
    ///
    /// Inbound-only relays reject messages. At the buffer limit the relay's
    /// drop policy decides between evicting the oldest message and rejecting
    /// the new one.
    pub fn enqueue(&self, relay_id: &str, message: Message) -> RelayResult<()> {
        let mut state = self
            .relays
            .get_mut(relay_id)
            .ok_or_else(|| RelayError::RelayNotFound(relay_id.to_string()))?;

        if !state.definition.direction.accepts_outbound() {
            return Err(RelayError::DirectionViolation {
                relay_id: relay_id.to_string(),
            });
        }

        let limit = state.options.buffer_limit;
        if state.queue.len() >= limit {
            match state.options.drop_policy {
                DropPolicy::DropOldest => {
                    if let Some(evicted) = state.queue.pop_front() {
                        debug!(
                            "Relay {} full, evicted {}",
                            relay_id,
                            evicted.message.id()
                        );
                    }
                    state.dropped += 1;
                }
                DropPolicy::DropNewest => {
                    state.dropped += 1;
                    warn!("Relay {} full, rejected {}", relay_id, message.id());
                    return Err(RelayError::BufferFull {
                        relay_id: relay_id.to_string(),
                        limit,
                    });
                }
            }
        }

        state.queue.push_back(Envelope {
            relay_id: relay_id.to_string(),
            message,
            enqueued_at: Utc::now(),
        });
        state.enqueued += 1;
        Ok(())
    }

    pub fn stats(&self, relay_id: &str) -> Option<RelayStats> {
        self.relays.get(relay_id).map(|state| state.stats())
    }

    /// Stats for every relay, sorted by id
    pub fn all_stats(&self) -> Vec<RelayStats> {
        let mut stats: Vec<RelayStats> = self.relays.iter().map(|state| state.stats()).collect();
        stats.sort_by(|a, b| a.relay_id.cmp(&b.relay_id));
        stats
    }

    /// Snapshot of the buffered envelopes in FIFO order
    pub fn buffered_messages(&self, relay_id: &str) -> Option<Vec<Envelope>> {
        self.relays
            .get(relay_id)
            .map(|state| state.queue.iter().cloned().collect())
    }

    pub fn relay_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.relays.iter().map(|state| state.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Detach the whole buffer, leaving the relay empty
    pub(crate) fn take_batch(
        &self,
        relay_id: &str,
    ) -> RelayResult<(RelayDefinition, VecDeque<Envelope>)> {
        let mut state = self
            .relays
            .get_mut(relay_id)
            .ok_or_else(|| RelayError::RelayNotFound(relay_id.to_string()))?;
        let batch = std::mem::take(&mut state.queue);
        Ok((state.definition.clone(), batch))
    }

    /// Fold flush results into the relay counters; no-op if the relay is gone
    pub(crate) fn record_flush(&self, relay_id: &str, counts: FlushCounts) {
        if let Some(mut state) = self.relays.get_mut(relay_id) {
            state.forwarded += counts.forwarded;
            state.failed += counts.failed;
            state.denied += counts.denied;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(n: u64) -> Message {
        Message::new("job", json!({ "n": n }))
    }

    #[test]
    fn test_drop_policy_parsing() {
        assert_eq!("drop-oldest".parse::<DropPolicy>().unwrap(), DropPolicy::DropOldest);
        assert_eq!("Drop-Newest".parse::<DropPolicy>().unwrap(), DropPolicy::DropNewest);
        assert!(matches!(
            "drop-random".parse::<DropPolicy>(),
            Err(RelayError::InvalidDropPolicy(_))
        ));
    }

    #[test]
    fn test_duplicate_relay_rejected() {
        let registry = RelayRegistry::new();
        registry
            .register(RelayDefinition::new("r1", "core"), RelayOptions::default())
            .unwrap();

        assert_eq!(
            registry.register(RelayDefinition::new("r1", "ops"), RelayOptions::default()),
            Err(RelayError::DuplicateRelay("r1".to_string()))
        );
        assert_eq!(registry.definition("r1").unwrap().channel, "core");
    }

    #[test]
    fn test_zero_limit_rejected() {
        let registry = RelayRegistry::new();
        let result = registry.register(
            RelayDefinition::new("r1", "core"),
            RelayOptions::new(0, DropPolicy::DropOldest),
        );
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[test]
    fn test_drop_newest_rejects_and_counts() {
        let registry = RelayRegistry::new();
        registry
            .register(
                RelayDefinition::new("r1", "core"),
                RelayOptions::new(2, DropPolicy::DropNewest),
            )
            .unwrap();

        registry.enqueue("r1", msg(1)).unwrap();
        registry.enqueue("r1", msg(2)).unwrap();
        let rejected = registry.enqueue("r1", msg(3));

        assert_eq!(
            rejected,
            Err(RelayError::BufferFull {
                relay_id: "r1".to_string(),
                limit: 2
            })
        );
        let stats = registry.stats("r1").unwrap();
        assert_eq!(stats.buffered, 2);
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.dropped, 1);

        let kept: Vec<u64> = registry
            .buffered_messages("r1")
            .unwrap()
            .iter()
            .map(|envelope| envelope.message.payload()["n"].as_u64().unwrap())
            .collect();
        assert_eq!(kept, vec![1, 2]);
    }

    #[test]
    fn test_unknown_relay() {
        let registry = RelayRegistry::new();
        assert_eq!(
            registry.enqueue("ghost", msg(1)),
            Err(RelayError::RelayNotFound("ghost".to_string()))
        );
        assert!(registry.stats("ghost").is_none());
        assert!(!registry.unregister("ghost"));
    }

    #[test]
    fn test_unregister_discards_state() {
        let registry = RelayRegistry::new();
        registry
            .register(RelayDefinition::new("r1", "core"), RelayOptions::default())
            .unwrap();
        registry.enqueue("r1", msg(1)).unwrap();

        assert!(registry.unregister("r1"));
        registry
            .register(RelayDefinition::new("r1", "core"), RelayOptions::default())
            .unwrap();

        let stats = registry.stats("r1").unwrap();
        assert_eq!(stats.buffered, 0);
        assert_eq!(stats.enqueued, 0);
    }

    #[test]
    fn test_from_settings() {
        let settings = vec![RelaySettings {
            id: "outbound".to_string(),
            label: Some("Outbound".to_string()),
            direction: "out".to_string(),
            channel: "ops".to_string(),
            buffer_limit: 4,
            drop_policy: "drop-newest".to_string(),
            remote_hint: None,
        }];

        let registry = RelayRegistry::from_settings(&settings).unwrap();
        let definition = registry.definition("outbound").unwrap();
        assert_eq!(definition.label, "Outbound");
        assert_eq!(definition.direction, Direction::Out);
        assert_eq!(registry.stats("outbound").unwrap().buffer_limit, 4);

        let mut bad = settings.clone();
        bad[0].direction = "sideways".to_string();
        assert!(matches!(
            RelayRegistry::from_settings(&bad),
            Err(RelayError::Config(_))
        ));
    }
}
