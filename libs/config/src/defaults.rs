//! Service configuration defaults
//!
//! This module contains default configuration values and constants
//! used across Vigil services for consistency.

/// Message routing defaults
pub mod routing {
    /// Channel used when neither the caller nor the message names one
    pub const DEFAULT_CHANNEL: &str = "core";

    /// Retry route lookup on the default channel when the effective channel has no route
    pub const ALLOW_FALLBACK: bool = true;

    /// Metadata key carrying a producer's channel hint
    pub const CHANNEL_HINT_KEY: &str = "channel";
}

/// Relay service defaults
pub mod relays {
    /// Maximum buffered envelopes per relay
    pub const DEFAULT_BUFFER_LIMIT: usize = 256;

    /// Drop policy applied when a relay buffer is full
    pub const DEFAULT_DROP_POLICY: &str = "drop-oldest";

    /// Default relay direction
    pub const DEFAULT_DIRECTION: &str = "bidirectional";

    /// Period of the background flush of every relay (seconds, 0 disables)
    pub const FLUSH_INTERVAL_SECS: u64 = 5;
}

/// Control loop defaults
pub mod control_loop {
    /// Interval trigger period (seconds)
    pub const INTERVAL_SECS: u64 = 300;

    /// Upper bound for a single analyzer run (seconds)
    pub const PROBE_TIMEOUT_SECS: u64 = 10;

    /// Worker pool base URL; tasks are posted to `{base}/tasks`
    pub const WORKER_POOL_BASE: &str = "http://127.0.0.1:5000/api/workers";

    /// Worker pool request timeout (seconds)
    pub const DISPATCH_TIMEOUT_SECS: u64 = 15;

    /// Cycle history file
    pub const HISTORY_PATH: &str = "data/cycle-history.json";

    /// Maximum number of cycles retained in history
    pub const HISTORY_LIMIT: usize = 200;
}

/// Probe defaults for the reference analyzers
pub mod probes {
    /// Base URL for external endpoint probes
    pub const API_BASE: &str = "http://127.0.0.1:5000";

    /// Health paths probed when none are configured
    pub const HEALTH_PATHS: [&str; 4] = ["/health", "/api/health", "/api/status", "/ready"];

    /// Configuration snapshots compared by the drift probe; the first is the baseline
    pub const ENV_SNAPSHOTS: [&str; 2] = ["development", "production"];

    /// Type-check command for build verification
    pub const TYPECHECK_COMMAND: [&str; 3] = ["cargo", "check", "--quiet"];

    /// Lint command for build verification
    pub const LINT_COMMAND: [&str; 3] = ["cargo", "clippy", "--quiet"];

    /// Probes slower than this are reported (milliseconds)
    pub const LATENCY_BUDGET_MS: u64 = 1_500;

    /// Heartbeats older than this mark a process stale (seconds)
    pub const HEARTBEAT_STALE_SECS: u64 = 120;

    /// Trailing characters of command output attached to build issues
    pub const OUTPUT_TAIL_CHARS: usize = 2_000;
}

/// Trigger defaults
pub mod triggers {
    /// Requests recorded before a request-volume cycle fires
    pub const REQUEST_THRESHOLD: u64 = 1_000;

    /// Errors recorded before an error-rate cycle fires
    pub const ERROR_THRESHOLD: u64 = 25;

    /// Upstream event types the event-filtered trigger reacts to
    pub const EVENT_ALLOW_LIST: [&str; 3] = ["deploy.failed", "relay.overflow", "endpoint.down"];
}
