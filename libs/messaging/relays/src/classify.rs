use message_router::Message;
use std::fmt;

/// Delivery lane chosen for a buffered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Discard without routing
    Deny,
    /// Deliver, flagged as priority traffic
    FastTrack,
    Normal,
}

impl Lane {
    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Deny => "deny",
            Lane::FastTrack => "fast-track",
            Lane::Normal => "normal",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a message from its own metadata and type
pub fn classify(message: &Message) -> Lane {
    if message.metadata_str("sentiment") == Some("malicious") {
        return Lane::Deny;
    }

    if message.metadata_str("priority") == Some("high")
        || message.message_type().starts_with("payment")
    {
        return Lane::FastTrack;
    }

    Lane::Normal
}
