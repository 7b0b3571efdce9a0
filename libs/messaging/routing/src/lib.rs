//! # Vigil Message Routing
//!
//! ## Purpose
//! Logical channel routing for in-process messages. Producers hand a
//! [`Message`] to the [`MessageRouter`], which resolves an effective channel,
//! looks up the `(channel, message type)` route and invokes the handler of the
//! target endpoint.
//!
//! ## Architecture Role
//!
//! ```text
//! Producer → Message → MessageRouter → RouteTable → EndpointRegistry → Handler
//!                          ↓               ↓              ↓
//!                    channel resolution  (channel,type)  endpoint id
//!                          ↓
//!                     RouteMetrics (usage per key)
//! ```
//!
//! ## Channel Resolution
//! 1. explicit override passed with [`RouteOptions`]
//! 2. configured default channel
//! 3. `channel` hint in the message metadata
//!
//! When the effective channel has no route and fallback is enabled the lookup
//! is retried on the default channel.
//!
//! ## Failure Policy
//! Lenient routers report every failure as [`RouteOutcome::Failed`]; strict
//! routers return the same [`RoutingError`] as `Err`. Handler errors and
//! handler panics are both converted into `HandlerFailed`.

pub mod endpoint;
pub mod error;
pub mod message;
pub mod metrics;
pub mod route;
pub mod router;
pub mod test_utils;

pub use endpoint::{handler_fn, Endpoint, EndpointHandler, EndpointRegistry, HandlerError};
pub use error::{RoutingError, RoutingResult};
pub use message::{Direction, Message};
pub use metrics::{RouteMetrics, RouteUsage};
pub use route::{Route, RouteKey, RouteTable};
pub use router::{Delivery, MessageRouter, RouteOptions, RouteOutcome, RouterConfig};
