//! Relay flushing
//!
//! A flush detaches the relay's whole buffer up front, then classifies and
//! routes each message in FIFO order on the relay's channel. Per-message
//! failures are counted and logged; they never stop the batch and detached
//! messages are never re-buffered (at-most-once delivery).

use crate::channel::FlushCounts;
use crate::classify::{classify, Lane};
use crate::{RelayRegistry, RelayResult};
use futures::future::join_all;
use message_router::{MessageRouter, RouteOptions, RouteOutcome};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of flushing one relay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub relay_id: String,
    /// Messages taken from the buffer
    pub attempted: usize,
    pub forwarded: usize,
    pub failed: usize,
    pub denied: usize,
    pub fast_tracked: usize,
}

impl FlushReport {
    fn new(relay_id: &str) -> Self {
        Self {
            relay_id: relay_id.to_string(),
            ..Default::default()
        }
    }
}

/// Moves buffered relay messages through the router
#[derive(Debug, Clone)]
pub struct RelayDispatcher {
    registry: Arc<RelayRegistry>,
    router: MessageRouter,
}

impl RelayDispatcher {
    pub fn new(registry: Arc<RelayRegistry>, router: MessageRouter) -> Self {
        Self { registry, router }
    }

    pub fn registry(&self) -> &Arc<RelayRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Flush one relay
    pub async fn flush(&self, relay_id: &str) -> RelayResult<FlushReport> {
        let (definition, batch) = self.registry.take_batch(relay_id)?;
        let mut report = FlushReport::new(relay_id);

        if batch.is_empty() {
            return Ok(report);
        }

        report.attempted = batch.len();
        let options = RouteOptions::on_channel(definition.channel.clone());

        for envelope in batch {
            let message = &envelope.message;
            match classify(message) {
                Lane::Deny => {
                    warn!(
                        "Relay {} denied {} ({})",
                        relay_id,
                        message.id(),
                        message.message_type()
                    );
                    report.denied += 1;
                    continue;
                }
                Lane::FastTrack => {
                    info!(
                        "Relay {} fast-tracking {} ({})",
                        relay_id,
                        message.id(),
                        message.message_type()
                    );
                    report.fast_tracked += 1;
                }
                Lane::Normal => {}
            }

            match self.router.route_packet(message, options.clone()).await {
                Ok(RouteOutcome::Delivered(delivery)) => {
                    debug!(
                        "Relay {} delivered {} to {}",
                        relay_id,
                        message.id(),
                        delivery.endpoint_id
                    );
                    report.forwarded += 1;
                }
                Ok(RouteOutcome::Failed(error)) | Err(error) => {
                    warn!(
                        "Relay {} failed to deliver {}: {}",
                        relay_id,
                        message.id(),
                        error
                    );
                    report.failed += 1;
                }
            }
        }

        self.registry.record_flush(
            relay_id,
            FlushCounts {
                forwarded: report.forwarded as u64,
                failed: report.failed as u64,
                denied: report.denied as u64,
            },
        );

        debug!(
            "Flushed relay {}: {} forwarded, {} failed, {} denied",
            relay_id, report.forwarded, report.failed, report.denied
        );
        Ok(report)
    }

    /// Flush every registered relay concurrently
    ///
    /// Relays removed while the pass is running are skipped.
    pub async fn flush_all(&self) -> Vec<FlushReport> {
        let ids = self.registry.relay_ids();
        let results = join_all(ids.iter().map(|id| self.flush(id))).await;

        results
            .into_iter()
            .zip(ids)
            .filter_map(|(result, id)| match result {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Skipping relay {} during flush: {}", id, e);
                    None
                }
            })
            .collect()
    }
}
