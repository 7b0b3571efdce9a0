//! Service Configuration Module
//!
//! Provides configuration loading and management for Vigil services.
//! Supports loading from TOML files with environment-specific overrides.

use crate::defaults;
use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main service configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct VigilConfig {
    /// Global settings
    pub global: GlobalConfig,

    /// Message router behaviour
    pub routing: RoutingSettings,

    /// Relays registered at startup
    pub relays: Vec<RelaySettings>,

    /// Control loop engine
    pub control_loop: LoopSettings,

    /// Reference analyzer probes
    pub probes: ProbeSettings,

    /// Trigger thresholds and filters
    pub triggers: TriggerSettings,
}

/// Global configuration settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GlobalConfig {
    pub log_level: String,
    pub working_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RoutingSettings {
    pub default_channel: Option<String>,
    pub allow_fallback: bool,
    pub strict: bool,
}

/// Relay definition; direction and drop policy are parsed by the relay crate
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RelaySettings {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_direction")]
    pub direction: String,
    pub channel: String,
    #[serde(default = "default_buffer_limit")]
    pub buffer_limit: usize,
    #[serde(default = "default_drop_policy")]
    pub drop_policy: String,
    #[serde(default)]
    pub remote_hint: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoopSettings {
    pub interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub worker_pool_base: String,
    pub dispatch_timeout_secs: u64,
    /// Optional relay used for task dispatch instead of direct HTTP
    pub dispatch_relay: Option<String>,
    pub event_bus_url: Option<String>,
    /// Optional relay that receives a digest of every cycle
    pub digest_relay: Option<String>,
    /// Background relay flush period; 0 flushes only at shutdown
    pub relay_flush_secs: u64,
    pub history_path: PathBuf,
    pub history_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ProbeSettings {
    pub api_base: String,
    pub health_paths: Vec<String>,
    pub env_snapshots: Vec<String>,
    pub typecheck_command: Vec<String>,
    pub lint_command: Vec<String>,
    pub latency_budget_ms: u64,
    pub heartbeat_stale_secs: u64,
    /// Processes expected to report heartbeats
    pub expected_processes: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TriggerSettings {
    pub request_threshold: u64,
    pub error_threshold: u64,
    pub event_allow_list: Vec<String>,
}

fn default_direction() -> String {
    defaults::relays::DEFAULT_DIRECTION.to_string()
}

fn default_buffer_limit() -> usize {
    defaults::relays::DEFAULT_BUFFER_LIMIT
}

fn default_drop_policy() -> String {
    defaults::relays::DEFAULT_DROP_POLICY.to_string()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            working_dir: PathBuf::from("."),
        }
    }
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            default_channel: Some(defaults::routing::DEFAULT_CHANNEL.to_string()),
            allow_fallback: defaults::routing::ALLOW_FALLBACK,
            strict: false,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval_secs: defaults::control_loop::INTERVAL_SECS,
            probe_timeout_secs: defaults::control_loop::PROBE_TIMEOUT_SECS,
            worker_pool_base: defaults::control_loop::WORKER_POOL_BASE.to_string(),
            dispatch_timeout_secs: defaults::control_loop::DISPATCH_TIMEOUT_SECS,
            dispatch_relay: None,
            event_bus_url: None,
            digest_relay: None,
            relay_flush_secs: defaults::relays::FLUSH_INTERVAL_SECS,
            history_path: PathBuf::from(defaults::control_loop::HISTORY_PATH),
            history_limit: defaults::control_loop::HISTORY_LIMIT,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            api_base: defaults::probes::API_BASE.to_string(),
            health_paths: strings(&defaults::probes::HEALTH_PATHS),
            env_snapshots: strings(&defaults::probes::ENV_SNAPSHOTS),
            typecheck_command: strings(&defaults::probes::TYPECHECK_COMMAND),
            lint_command: strings(&defaults::probes::LINT_COMMAND),
            latency_budget_ms: defaults::probes::LATENCY_BUDGET_MS,
            heartbeat_stale_secs: defaults::probes::HEARTBEAT_STALE_SECS,
            expected_processes: Vec::new(),
        }
    }
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            request_threshold: defaults::triggers::REQUEST_THRESHOLD,
            error_threshold: defaults::triggers::ERROR_THRESHOLD,
            event_allow_list: strings(&defaults::triggers::EVENT_ALLOW_LIST),
        }
    }
}

impl VigilConfig {
    /// Load configuration from files with environment overrides
    ///
    /// Missing files fall back to defaults; `VIGIL__SECTION__KEY` variables
    /// override file values.
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new("config/vigil.toml"));

        let mut builder = Config::builder().add_source(File::from(base).required(false));

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = PathBuf::from("config/environments").join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (VIGIL__ prefix)
        builder = builder.add_source(
            Environment::with_prefix("VIGIL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("probes.health_paths")
                .with_list_parse_key("probes.env_snapshots")
                .with_list_parse_key("probes.expected_processes")
                .with_list_parse_key("triggers.event_allow_list"),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.apply_legacy_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("Failed to parse TOML configuration")
    }

    /// Apply the plain variables operators already export for the loop
    ///
    /// `WORKER_POOL_BASE`, `HEALTH_PATHS` and `ENV_SNAPSHOTS` (comma separated).
    pub fn apply_legacy_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup("WORKER_POOL_BASE") {
            debug!("WORKER_POOL_BASE override: {}", base);
            self.control_loop.worker_pool_base = base;
        }
        if let Some(paths) = lookup("HEALTH_PATHS").map(|raw| split_list(&raw)) {
            if !paths.is_empty() {
                self.probes.health_paths = paths;
            }
        }
        if let Some(snapshots) = lookup("ENV_SNAPSHOTS").map(|raw| split_list(&raw)) {
            if !snapshots.is_empty() {
                self.probes.env_snapshots = snapshots;
            }
        }
    }

    /// Get settings for a specific relay
    pub fn get_relay(&self, id: &str) -> Option<&RelaySettings> {
        self.relays.iter().find(|relay| relay.id == id)
    }

    /// Expand environment variables in path and URL values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let history = self.control_loop.history_path.to_string_lossy().to_string();
        let expanded = shellexpand::full(&history).context("Failed to expand history path")?;
        self.control_loop.history_path = PathBuf::from(expanded.as_ref());

        let working_dir = self.global.working_dir.to_string_lossy().to_string();
        let expanded = shellexpand::full(&working_dir).context("Failed to expand working dir")?;
        self.global.working_dir = PathBuf::from(expanded.as_ref());

        let base = shellexpand::env(&self.control_loop.worker_pool_base)
            .context("Failed to expand worker pool URL")?;
        self.control_loop.worker_pool_base = base.to_string();

        let api_base =
            shellexpand::env(&self.probes.api_base).context("Failed to expand API base URL")?;
        self.probes.api_base = api_base.to_string();

        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Convenience function to load configuration with defaults
pub fn load_config(environment: Option<&str>) -> Result<VigilConfig> {
    let mut config = VigilConfig::load(None, environment)?;
    config.expand_env_vars()?;
    Ok(config)
}
