use relays::RelayError;
use thiserror::Error;

/// Analyzer failures; the engine turns these into empty results with `error` set
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("analyzer {analyzer} timed out after {millis}ms")]
    Timeout { analyzer: String, millis: u64 },

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("analyzer panicked: {0}")]
    Panicked(String),
}

/// Task dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("relay rejected task: {0}")]
    Relay(#[from] RelayError),

    #[error("failed to encode task: {0}")]
    Encode(#[from] serde_json::Error),
}

/// History store errors
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history file is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Event sink and cycle observer errors
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event bus rejected event: HTTP {0}")]
    Rejected(u16),

    #[error("event bus unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("relay rejected event: {0}")]
    Relay(#[from] RelayError),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Top-level control loop errors
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("routing error: {0}")]
    Routing(#[from] message_router::RoutingError),

    #[error("history error: {0}")]
    History(#[from] HistoryError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, LoopError>;
