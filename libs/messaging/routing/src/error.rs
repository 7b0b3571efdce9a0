//! # Routing Error Types

use thiserror::Error;

/// Message routing and registration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No override, default channel or metadata hint was available
    #[error("no channel resolvable for message type '{message_type}'")]
    NoChannel { message_type: String },

    #[error("route not found for ({channel}, {message_type})")]
    RouteNotFound {
        channel: String,
        message_type: String,
    },

    #[error("endpoint not found: {endpoint_id}")]
    EndpointNotFound { endpoint_id: String },

    /// The endpoint handler returned an error or panicked
    #[error("handler failed at {endpoint_id}: {reason}")]
    HandlerFailed { endpoint_id: String, reason: String },

    #[error("route already registered for ({channel}, {message_type})")]
    DuplicateRoute {
        channel: String,
        message_type: String,
    },

    #[error("endpoint already registered: {id}")]
    DuplicateEndpoint { id: String },

    #[error("invalid direction: {0}")]
    InvalidDirection(String),
}

impl RoutingError {
    /// Short machine-friendly category
    pub fn kind(&self) -> &'static str {
        match self {
            RoutingError::NoChannel { .. } => "no channel",
            RoutingError::RouteNotFound { .. } => "route not found",
            RoutingError::EndpointNotFound { .. } => "endpoint not found",
            RoutingError::HandlerFailed { .. } => "handler failed",
            RoutingError::DuplicateRoute { .. } => "duplicate route",
            RoutingError::DuplicateEndpoint { .. } => "duplicate endpoint",
            RoutingError::InvalidDirection(_) => "invalid direction",
        }
    }
}

/// Result type for routing operations
pub type RoutingResult<T> = std::result::Result<T, RoutingError>;
