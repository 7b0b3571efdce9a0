//! # Vigil Relays
//!
//! ## Purpose
//! Bounded, buffered relay channels layered on message routing. Producers
//! enqueue messages on a relay; a later flush classifies them and routes them
//! through the [`message_router::MessageRouter`] on the relay's channel.
//!
//! ## Architecture Role
//!
//! ```text
//! Producer → RelayRegistry::enqueue → bounded FIFO
//!                                         ↓ flush
//!                 classify (deny / fast-track / normal)
//!                                         ↓
//!                        MessageRouter::route_packet(relay channel)
//! ```
//!
//! ## Delivery Semantics
//! At-most-once. A flush detaches the buffer before routing; messages that
//! fail to route are logged and counted, never re-buffered. Messages enqueued
//! while a flush is running wait for the next flush.

pub mod channel;
pub mod classify;
pub mod dispatcher;
pub mod error;

pub use channel::{
    definition_from_settings, DropPolicy, Envelope, RelayDefinition, RelayOptions, RelayRegistry,
    RelayStats,
};
pub use classify::{classify, Lane};
pub use dispatcher::{FlushReport, RelayDispatcher};
pub use error::{RelayError, RelayResult};
