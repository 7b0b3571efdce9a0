use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::RoutingError;
use vigil_config::defaults::routing::CHANNEL_HINT_KEY;

/// Immutable message envelope
///
/// Fields are only reachable through accessors; the `with_*` builders consume
/// the message, so an envelope cannot change once it has been handed to a
/// router or relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,

    #[serde(rename = "type")]
    message_type: String,

    payload: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<HashMap<String, Value>>,

    /// Creation time, milliseconds since the Unix epoch
    timestamp: i64,
}

impl Message {
    /// Create a new message with a fresh id and the current timestamp
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type: message_type.into(),
            payload,
            metadata: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set the channel hint consulted when no default channel is configured
    pub fn with_channel_hint(self, channel: impl Into<String>) -> Self {
        self.with_metadata(CHANNEL_HINT_KEY, channel.into())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn metadata(&self) -> Option<&HashMap<String, Value>> {
        self.metadata.as_ref()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Metadata value as a string slice, if present and a string
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get(key))
            .and_then(Value::as_str)
    }

    /// Channel hint carried in the metadata
    pub fn channel_hint(&self) -> Option<&str> {
        self.metadata_str(CHANNEL_HINT_KEY)
            .filter(|channel| !channel.is_empty())
    }
}

/// Declared communication direction of an endpoint or relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Receive-only
    In,
    /// Send-only
    Out,
    #[default]
    Bidirectional,
}

impl Direction {
    /// Whether producers may push messages through this direction
    pub fn accepts_outbound(self) -> bool {
        !matches!(self, Direction::In)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
            Direction::Bidirectional => "bidirectional",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            "bidirectional" | "both" => Ok(Direction::Bidirectional),
            other => Err(RoutingError::InvalidDirection(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("task.created", json!({"id": 7}))
            .with_metadata("priority", "high")
            .with_channel_hint("ops");

        assert_eq!(msg.message_type(), "task.created");
        assert_eq!(msg.payload()["id"], 7);
        assert_eq!(msg.metadata_str("priority"), Some("high"));
        assert_eq!(msg.channel_hint(), Some("ops"));
        assert!(msg.timestamp() > 0);
    }

    #[test]
    fn test_unique_ids() {
        let a = Message::new("x", Value::Null);
        let b = Message::new("x", Value::Null);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_wire_format_uses_type_key() {
        let msg = Message::new("ping", json!("hello"));
        let encoded = serde_json::to_value(&msg).unwrap();

        assert_eq!(encoded["type"], "ping");
        assert!(encoded.get("metadata").is_none());
    }

    #[test]
    fn test_empty_channel_hint_ignored() {
        let msg = Message::new("x", Value::Null).with_channel_hint("");
        assert_eq!(msg.channel_hint(), None);
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("in".parse::<Direction>().unwrap(), Direction::In);
        assert_eq!(" OUT ".parse::<Direction>().unwrap(), Direction::Out);
        assert_eq!(
            "bidirectional".parse::<Direction>().unwrap(),
            Direction::Bidirectional
        );
        assert!("sideways".parse::<Direction>().is_err());
        assert!(!Direction::In.accepts_outbound());
        assert!(Direction::Out.accepts_outbound());
    }
}
