use crate::{
    EndpointRegistry, Message, Route, RouteMetrics, RouteTable, RoutingError, RoutingResult,
};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};
use vigil_config::RoutingSettings;

/// Router behaviour
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Channel used when the caller passes no override
    pub default_channel: Option<String>,
    /// Retry the lookup on the default channel when the effective channel has no route
    pub allow_fallback: bool,
    /// Return failures as `Err` instead of `RouteOutcome::Failed`
    pub strict: bool,
}

impl RouterConfig {
    pub fn with_default_channel(mut self, channel: impl Into<String>) -> Self {
        self.default_channel = Some(channel.into());
        self
    }

    pub fn with_fallback(mut self, allow: bool) -> Self {
        self.allow_fallback = allow;
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    fn default_channel(&self) -> Option<&str> {
        self.default_channel
            .as_deref()
            .filter(|channel| !channel.is_empty())
    }
}

impl From<&RoutingSettings> for RouterConfig {
    fn from(settings: &RoutingSettings) -> Self {
        Self {
            default_channel: settings.default_channel.clone(),
            allow_fallback: settings.allow_fallback,
            strict: settings.strict,
        }
    }
}

/// Per-call routing options
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Explicit channel, takes precedence over every other source
    pub channel: Option<String>,
}

impl RouteOptions {
    pub fn on_channel(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
        }
    }
}

/// Successful delivery details
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Channel the route was found on
    pub channel: String,
    pub endpoint_id: String,
    /// Whether the route came from the default-channel fallback
    pub via_fallback: bool,
    pub reply: Value,
}

/// Result of a lenient routing attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Delivered(Delivery),
    Failed(RoutingError),
}

impl RouteOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, RouteOutcome::Delivered(_))
    }

    /// Failure reason, `None` when delivered
    pub fn reason(&self) -> Option<String> {
        match self {
            RouteOutcome::Delivered(_) => None,
            RouteOutcome::Failed(error) => Some(error.to_string()),
        }
    }

    pub fn delivery(&self) -> Option<&Delivery> {
        match self {
            RouteOutcome::Delivered(delivery) => Some(delivery),
            RouteOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RoutingError> {
        match self {
            RouteOutcome::Delivered(_) => None,
            RouteOutcome::Failed(error) => Some(error),
        }
    }
}

/// Resolves channels and routes, then invokes endpoint handlers
///
/// The route table, endpoint registry and metrics are shared stores injected
/// at construction so several routers (or tests) can work on isolated state.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    config: RouterConfig,
    routes: Arc<RouteTable>,
    endpoints: Arc<EndpointRegistry>,
    metrics: Arc<RouteMetrics>,
}

impl MessageRouter {
    pub fn new(
        config: RouterConfig,
        routes: Arc<RouteTable>,
        endpoints: Arc<EndpointRegistry>,
    ) -> Self {
        Self::with_metrics(config, routes, endpoints, Arc::new(RouteMetrics::new()))
    }

    pub fn with_metrics(
        config: RouterConfig,
        routes: Arc<RouteTable>,
        endpoints: Arc<EndpointRegistry>,
        metrics: Arc<RouteMetrics>,
    ) -> Self {
        Self {
            config,
            routes,
            endpoints,
            metrics,
        }
    }

    /// Router with fresh, empty stores
    pub fn standalone(config: RouterConfig) -> Self {
        Self::new(
            config,
            Arc::new(RouteTable::new()),
            Arc::new(EndpointRegistry::new()),
        )
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn endpoints(&self) -> &Arc<EndpointRegistry> {
        &self.endpoints
    }

    pub fn metrics(&self) -> &Arc<RouteMetrics> {
        &self.metrics
    }

    /// Register a route; fails if `(channel, type)` is already present
    pub fn register_route(&self, route: Route) -> RoutingResult<()> {
        self.routes.register(route)
    }

    /// Effective channel: override, then default channel, then metadata hint
    pub fn resolve_channel(&self, message: &Message, options: &RouteOptions) -> Option<String> {
        options
            .channel
            .as_deref()
            .filter(|channel| !channel.is_empty())
            .or_else(|| self.config.default_channel())
            .or_else(|| message.channel_hint())
            .map(str::to_string)
    }

    /// Route a message to its endpoint handler
    ///
    /// Lenient routers always return `Ok`, with failures reported as
    /// [`RouteOutcome::Failed`]; strict routers return them as `Err`.
    pub async fn route_packet(
        &self,
        message: &Message,
        options: RouteOptions,
    ) -> RoutingResult<RouteOutcome> {
        match self.deliver(message, &options).await {
            Ok(delivery) => Ok(RouteOutcome::Delivered(delivery)),
            Err(error) if self.config.strict => {
                warn!("Strict routing failure for {}: {}", message.id(), error);
                Err(error)
            }
            Err(error) => {
                debug!("Routing failure for {}: {}", message.id(), error);
                Ok(RouteOutcome::Failed(error))
            }
        }
    }

    async fn deliver(&self, message: &Message, options: &RouteOptions) -> RoutingResult<Delivery> {
        let message_type = message.message_type();

        let channel = self
            .resolve_channel(message, options)
            .ok_or_else(|| RoutingError::NoChannel {
                message_type: message_type.to_string(),
            })?;

        let (route, via_fallback) = self.find_route(&channel, message_type)?;

        let endpoint = self
            .endpoints
            .get(&route.target_endpoint_id)
            .ok_or_else(|| RoutingError::EndpointNotFound {
                endpoint_id: route.target_endpoint_id.clone(),
            })?;

        // Counted before invocation so failing handlers still show usage
        self.metrics.record(&route.channel, message_type);

        debug!(
            "Routing {} ({}) via {} to {}",
            message.id(),
            message_type,
            route.channel,
            endpoint.id
        );

        let invocation = AssertUnwindSafe(endpoint.handler.handle(message))
            .catch_unwind()
            .await;

        let reply = match invocation {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                return Err(RoutingError::HandlerFailed {
                    endpoint_id: endpoint.id,
                    reason: error.to_string(),
                })
            }
            Err(panic) => {
                return Err(RoutingError::HandlerFailed {
                    endpoint_id: endpoint.id,
                    reason: panic_reason(panic.as_ref()),
                })
            }
        };

        Ok(Delivery {
            channel: route.channel,
            endpoint_id: endpoint.id,
            via_fallback,
            reply,
        })
    }

    fn find_route(&self, channel: &str, message_type: &str) -> RoutingResult<(Route, bool)> {
        if let Some(route) = self.routes.lookup(channel, message_type) {
            return Ok((route, false));
        }

        if self.config.allow_fallback {
            if let Some(default) = self.config.default_channel() {
                if default != channel {
                    if let Some(route) = self.routes.lookup(default, message_type) {
                        debug!(
                            "No route on {} for {}, falling back to {}",
                            channel, message_type, default
                        );
                        return Ok((route, true));
                    }
                }
            }
        }

        Err(RoutingError::RouteNotFound {
            channel: channel.to_string(),
            message_type: message_type.to_string(),
        })
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(reason) = panic.downcast_ref::<&str>() {
        (*reason).to_string()
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        reason.clone()
    } else {
        "handler panicked".to_string()
    }
}
