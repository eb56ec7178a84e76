//! Topic layout for climate devices
//!
//! Every device owns three topics:
//! - `devices/{id}/telemetry` : periodic sensor/actuator snapshot
//! - `devices/{id}/commands`  : remote mode changes
//! - `devices/{id}/status`    : online/offline announcements
//!
//! Topics are parsed into a [`DeviceTopic`] as soon as they come off the wire so
//! that routing never depends on string suffixes.

use std::fmt;
use std::str::FromStr;

/// Root segment shared by all device topics
pub const TOPIC_ROOT: &str = "devices";

/// Single level wildcard
pub const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Multi level wildcard (must be the last segment of a filter)
pub const MULTI_LEVEL_WILDCARD: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("topic '{0}' is not under 'devices/'")]
    UnknownRoot(String),
    #[error("topic '{0}' must have exactly three segments")]
    WrongShape(String),
    #[error("topic '{0}' has an empty device id")]
    EmptyDeviceId(String),
    #[error("unknown message kind '{0}'")]
    UnknownKind(String),
}

/// Kind of message carried by a device topic (last topic segment)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Telemetry,
    Commands,
    Status,
}

impl MessageKind {
    pub const ALL: [MessageKind; 3] = [
        MessageKind::Telemetry,
        MessageKind::Commands,
        MessageKind::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Telemetry => "telemetry",
            MessageKind::Commands => "commands",
            MessageKind::Status => "status",
        }
    }

    /// Subscription pattern matching this kind for every device
    /// Ex: `MessageKind::Status.wildcard()` -> `devices/+/status`
    pub fn wildcard(&self) -> String {
        format!("{TOPIC_ROOT}/{SINGLE_LEVEL_WILDCARD}/{}", self.as_str())
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telemetry" => Ok(MessageKind::Telemetry),
            "commands" => Ok(MessageKind::Commands),
            "status" => Ok(MessageKind::Status),
            other => Err(TopicError::UnknownKind(other.to_string())),
        }
    }
}

/// A concrete device topic split into its device id and message kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceTopic {
    pub device_id: String,
    pub kind: MessageKind,
}

impl DeviceTopic {
    pub fn new<S: Into<String>>(device_id: S, kind: MessageKind) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
        }
    }

    pub fn telemetry<S: Into<String>>(device_id: S) -> Self {
        Self::new(device_id, MessageKind::Telemetry)
    }

    pub fn commands<S: Into<String>>(device_id: S) -> Self {
        Self::new(device_id, MessageKind::Commands)
    }

    pub fn status<S: Into<String>>(device_id: S) -> Self {
        Self::new(device_id, MessageKind::Status)
    }

    /// Parse `devices/{id}/{kind}`
    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.first() != Some(&TOPIC_ROOT) {
            return Err(TopicError::UnknownRoot(topic.to_string()));
        }
        if parts.len() != 3 {
            return Err(TopicError::WrongShape(topic.to_string()));
        }
        if parts[1].is_empty() {
            return Err(TopicError::EmptyDeviceId(topic.to_string()));
        }

        Ok(Self {
            device_id: parts[1].to_string(),
            kind: parts[2].parse()?,
        })
    }

    pub fn to_topic(&self) -> String {
        format!("{TOPIC_ROOT}/{}/{}", self.device_id, self.kind)
    }
}

impl fmt::Display for DeviceTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TOPIC_ROOT}/{}/{}", self.device_id, self.kind)
    }
}

impl FromStr for DeviceTopic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceTopic::parse(s)
    }
}

/// Matches a concrete topic name against a subscription filter.
/// `+` matches exactly one level, `#` matches the remaining levels (last segment only).
pub fn matches(topic: &str, filter: &str) -> bool {
    if topic.is_empty() || topic.contains('+') || topic.contains('#') {
        return false;
    }
    if topic == filter || filter == MULTI_LEVEL_WILDCARD {
        return true;
    }

    let topic_parts: Vec<&str> = topic.split('/').collect();
    let filter_parts: Vec<&str> = filter.split('/').collect();
    match_parts(&topic_parts, &filter_parts)
}

fn match_parts(topic_parts: &[&str], filter_parts: &[&str]) -> bool {
    match (topic_parts.first(), filter_parts.first()) {
        (None, None) => true,
        (_, Some(&MULTI_LEVEL_WILDCARD)) => filter_parts.len() == 1,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(&topic_part), Some(&filter_part)) => {
            (filter_part == SINGLE_LEVEL_WILDCARD || filter_part == topic_part)
                && match_parts(&topic_parts[1..], &filter_parts[1..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_topic() {
        let topic = DeviceTopic::parse("devices/SIM-001/commands").unwrap();
        assert_eq!(topic.device_id, "SIM-001");
        assert_eq!(topic.kind, MessageKind::Commands);
        assert_eq!(topic.to_topic(), "devices/SIM-001/commands");
    }

    #[test]
    fn test_parse_rejects_foreign_topics() {
        assert!(matches!(
            DeviceTopic::parse("home/hvac/heartbeat"),
            Err(TopicError::UnknownRoot(_))
        ));
        assert!(matches!(
            DeviceTopic::parse("devices/D1/telemetry/extra"),
            Err(TopicError::WrongShape(_))
        ));
        assert!(matches!(
            DeviceTopic::parse("devices//status"),
            Err(TopicError::EmptyDeviceId(_))
        ));
        assert!(matches!(
            DeviceTopic::parse("devices/D1/metrics"),
            Err(TopicError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(MessageKind::Telemetry.wildcard(), "devices/+/telemetry");
        assert!(matches("devices/D1/telemetry", "devices/+/telemetry"));
        assert!(matches("devices/D1/status", "devices/#"));
        assert!(!matches("devices/D1/status", "devices/+/telemetry"));
        assert!(!matches("devices/D1/a/telemetry", "devices/+/telemetry"));
        assert!(!matches("devices/+/telemetry", "devices/+/telemetry"));
    }
}
