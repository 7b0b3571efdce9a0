//! Route table keyed by `(channel, message type)`

use crate::{RoutingError, RoutingResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Routing key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub channel: String,
    pub message_type: String,
}

impl RouteKey {
    pub fn new(channel: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            message_type: message_type.into(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.message_type)
    }
}

/// Mapping from a routing key to a target endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub channel: String,
    pub message_type: String,
    pub target_endpoint_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Route {
    pub fn new(
        channel: impl Into<String>,
        message_type: impl Into<String>,
        target_endpoint_id: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            message_type: message_type.into(),
            target_endpoint_id: target_endpoint_id.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn key(&self) -> RouteKey {
        RouteKey::new(self.channel.clone(), self.message_type.clone())
    }
}

/// Route table; one route per key
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: DashMap<RouteKey, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route; an existing key is kept and the new route rejected
    pub fn register(&self, route: Route) -> RoutingResult<()> {
        match self.routes.entry(route.key()) {
            Entry::Occupied(existing) => {
                tracing::warn!(
                    "Route {} already targets {}, rejecting {}",
                    existing.key(),
                    existing.get().target_endpoint_id,
                    route.target_endpoint_id
                );
                Err(RoutingError::DuplicateRoute {
                    channel: route.channel,
                    message_type: route.message_type,
                })
            }
            Entry::Vacant(slot) => {
                tracing::debug!("Registered route {} -> {}", slot.key(), route.target_endpoint_id);
                slot.insert(route);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, channel: &str, message_type: &str) -> Option<Route> {
        self.routes
            .get(&RouteKey::new(channel, message_type))
            .map(|entry| entry.value().clone())
    }

    pub fn remove(&self, channel: &str, message_type: &str) -> Option<Route> {
        self.routes
            .remove(&RouteKey::new(channel, message_type))
            .map(|(_, route)| route)
    }

    /// All routes, sorted by key
    pub fn routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self
            .routes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        routes.sort_by_key(Route::key);
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
