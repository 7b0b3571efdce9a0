//! Endpoint registry for handler lookup
//!
//! Endpoints are named handlers bound to one channel. The registry owns them
//! exclusively and is injected into the router; endpoint ids are unique.

use crate::{Direction, Message, RoutingError, RoutingResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Error returned by an endpoint handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Consumer of routed messages
#[async_trait]
pub trait EndpointHandler: Send + Sync + Debug {
    /// Handle a single message, returning an optional reply payload
    async fn handle(&self, message: &Message) -> Result<Value, HandlerError>;
}

/// Adapter turning a synchronous closure into an [`EndpointHandler`]
pub struct FnHandler<F> {
    f: F,
}

impl<F> Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

#[async_trait]
impl<F> EndpointHandler for FnHandler<F>
where
    F: Fn(&Message) -> Result<Value, HandlerError> + Send + Sync,
{
    async fn handle(&self, message: &Message) -> Result<Value, HandlerError> {
        (self.f)(message)
    }
}

/// Wrap a closure as a shareable handler
pub fn handler_fn<F>(f: F) -> Arc<dyn EndpointHandler>
where
    F: Fn(&Message) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler { f })
}

/// A named handler bound to one channel
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: String,
    pub label: String,
    pub direction: Direction,
    pub channel: String,
    pub handler: Arc<dyn EndpointHandler>,
}

impl Endpoint {
    pub fn new(
        id: impl Into<String>,
        channel: impl Into<String>,
        handler: Arc<dyn EndpointHandler>,
    ) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            direction: Direction::Bidirectional,
            channel: channel.into(),
            handler,
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
}

/// Registry of endpoints keyed by id
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: DashMap<String, Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint; fails if the id is already taken
    pub fn register(&self, endpoint: Endpoint) -> RoutingResult<()> {
        match self.endpoints.entry(endpoint.id.clone()) {
            Entry::Occupied(_) => Err(RoutingError::DuplicateEndpoint { id: endpoint.id }),
            Entry::Vacant(slot) => {
                tracing::debug!(
                    "Registered endpoint {} on channel {} ({})",
                    endpoint.id,
                    endpoint.channel,
                    endpoint.direction
                );
                slot.insert(endpoint);
                Ok(())
            }
        }
    }

    /// Remove an endpoint, returning it if it was registered
    pub fn unregister(&self, id: &str) -> Option<Endpoint> {
        let removed = self.endpoints.remove(id).map(|(_, endpoint)| endpoint);
        if removed.is_none() {
            tracing::warn!("Attempted to unregister unknown endpoint: {}", id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Endpoint> {
        self.endpoints.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.endpoints.contains_key(id)
    }

    /// All endpoints, sorted by id
    pub fn list(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self
            .endpoints
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
