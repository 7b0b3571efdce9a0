//! # Vigil Centralized Configuration
//!
//! This crate provides centralized configuration management and defaults
//! for all Vigil services, eliminating duplication across the codebase.
//!
//! ## Features
//!
//! - **Defaults**: Routing, relay, control loop, probe and trigger defaults
//! - **Service Configuration**: TOML files with environment overrides
//!
//! ## Usage
//!
//! ```rust,no_run
//! use vigil_config::{defaults, load_config};
//!
//! let config = load_config(None).unwrap();
//! assert!(config.control_loop.history_limit <= defaults::control_loop::HISTORY_LIMIT);
//! ```

pub mod defaults;
pub mod service_config;

// Re-export commonly used types
pub use service_config::{
    load_config, GlobalConfig, LoopSettings, ProbeSettings, RelaySettings, RoutingSettings,
    TriggerSettings, VigilConfig,
};
