//! Route usage metrics
//!
//! One counter per `(channel, message type)` key, incremented whenever the
//! router has found a target endpoint, whether or not the handler succeeds.

use crate::RouteKey;
use dashmap::DashMap;
use serde::Serialize;

/// Usage count for one routing key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteUsage {
    pub key: RouteKey,
    pub count: u64,
}

/// Shared usage table
#[derive(Debug, Default)]
pub struct RouteMetrics {
    usage: DashMap<RouteKey, u64>,
}

impl RouteMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, channel: &str, message_type: &str) {
        *self
            .usage
            .entry(RouteKey::new(channel, message_type))
            .or_insert(0) += 1;
    }

    pub fn count(&self, channel: &str, message_type: &str) -> u64 {
        self.usage
            .get(&RouteKey::new(channel, message_type))
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.usage.iter().map(|entry| *entry.value()).sum()
    }

    /// Snapshot sorted by descending count, then key
    pub fn snapshot(&self) -> Vec<RouteUsage> {
        let mut usage: Vec<RouteUsage> = self
            .usage
            .iter()
            .map(|entry| RouteUsage {
                key: entry.key().clone(),
                count: *entry.value(),
            })
            .collect();
        usage.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        usage
    }

    /// Reset all counters (for testing)
    pub fn reset(&self) {
        self.usage.clear();
    }
}
