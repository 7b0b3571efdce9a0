use thiserror::Error;

/// Relay operation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("relay not found: {0}")]
    RelayNotFound(String),

    #[error("relay {relay_id} is inbound-only and rejects enqueue")]
    DirectionViolation { relay_id: String },

    #[error("relay {relay_id} buffer full ({limit}), message dropped")]
    BufferFull { relay_id: String, limit: usize },

    #[error("relay already registered: {0}")]
    DuplicateRelay(String),

    #[error("invalid drop policy: {0}")]
    InvalidDropPolicy(String),

    #[error("invalid relay definition: {0}")]
    Config(String),
}

/// Result type for relay operations
pub type RelayResult<T> = std::result::Result<T, RelayError>;
