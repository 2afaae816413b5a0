//! # Notification
//!
//! The immutable event record that flows from producers, through the broker
//! and the hub, to every connection of the target user.
//!
//! Wire format (one JSON object per queue message and per WebSocket frame):
//!
//! ```json
//! { "user_id": "u-1", "event_type": "progress", "video_id": "v-9",
//!   "service_name": "transcoder", "description": "50%",
//!   "timestamp": "2025-03-01T10:00:00Z" }
//! ```
//!
//! A timestamp may be absent, `null`, or the Go zero instant
//! (`0001-01-01T00:00:00Z`); all three mean "unset" and are filled with the
//! current time by [`Notification::stamped`] before the event is processed.
//! A timestamp that arrived on the wire is written back out exactly as it was
//! received; only one filled in locally is rendered here.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::NotificationError;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Success,
    Error,
    Progress,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Success => "success",
            EventType::Error => "error",
            EventType::Progress => "progress",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(EventType::Success),
            "error" => Ok(EventType::Error),
            "progress" => Ok(EventType::Progress),
            other => Err(NotificationError::UnknownEventType(other.to_string())),
        }
    }
}

/// # Notification
///
/// Fields are private: a notification is built once (via [`Notification::new`]
/// and the `with_*` builders, or decoded from the wire) and never mutated in
/// place afterwards. [`Notification::stamped`] consumes the value and returns
/// a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    user_id: String,
    event_type: EventType,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    video_id: Option<String>,
    service_name: String,
    description: String,
    #[serde(default, with = "wire_timestamp")]
    timestamp: Option<WireTimestamp>,
}

/// A set timestamp: the instant, plus the exact text it was decoded from.
/// Equality looks at the instant only.
#[derive(Debug, Clone)]
struct WireTimestamp {
    instant: DateTime<FixedOffset>,
    text: Option<String>,
}

impl WireTimestamp {
    fn local(instant: DateTime<FixedOffset>) -> Self {
        WireTimestamp { instant, text: None }
    }
}

impl PartialEq for WireTimestamp {
    fn eq(&self, other: &Self) -> bool {
        self.instant == other.instant
    }
}

impl Eq for WireTimestamp {}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        event_type: EventType,
        service_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            event_type,
            video_id: None,
            service_name: service_name.into(),
            description: description.into(),
            timestamp: None,
        }
    }

    pub fn with_video_id(mut self, video_id: impl Into<String>) -> Self {
        let video_id = video_id.into();
        self.video_id = if video_id.is_empty() { None } else { Some(video_id) };
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = if is_zero_instant(&timestamp) {
            None
        } else {
            Some(WireTimestamp::local(timestamp))
        };
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video_id.as_deref()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp.as_ref().map(|ts| ts.instant)
    }

    pub fn is_stamped(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Returns the notification with an unset timestamp replaced by the
    /// current time. A set timestamp is kept as is.
    pub fn stamped(mut self) -> Self {
        if self.timestamp.is_none() {
            self.timestamp = Some(WireTimestamp::local(Utc::now().fixed_offset()));
        }
        self
    }

    /// Decodes and validates one wire payload.
    pub fn decode(payload: &[u8]) -> Result<Self, NotificationError> {
        let notification: Notification =
            serde_json::from_slice(payload).map_err(NotificationError::Malformed)?;
        notification.validate()?;
        Ok(notification)
    }

    /// Queue payload form of [`Notification::to_frame`].
    pub fn encode(&self) -> Result<Vec<u8>, NotificationError> {
        Ok(self.to_frame()?.into_bytes())
    }

    /// Text form used for one outbound WebSocket frame.
    pub fn to_frame(&self) -> Result<String, NotificationError> {
        serde_json::to_string(self).map_err(NotificationError::Encode)
    }

    pub fn validate(&self) -> Result<(), NotificationError> {
        if self.user_id.is_empty() {
            return Err(NotificationError::MissingUserId);
        }
        Ok(())
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty()))
}

// Go's time.Time zero value, the way Go producers serialize an unset timestamp.
const ZERO_INSTANT: &str = "0001-01-01T00:00:00Z";

fn is_zero_instant(timestamp: &DateTime<FixedOffset>) -> bool {
    use chrono::Datelike;
    timestamp.year() <= 1
}

mod wire_timestamp {
    use chrono::{DateTime, FixedOffset, SecondsFormat};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{is_zero_instant, WireTimestamp, ZERO_INSTANT};

    pub fn serialize<S>(value: &Option<WireTimestamp>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(WireTimestamp { text: Some(text), .. }) => serializer.serialize_str(text),
            Some(WireTimestamp { instant, text: None }) => {
                serializer.serialize_str(&instant.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            None => serializer.serialize_str(ZERO_INSTANT),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<WireTimestamp>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        let Some(raw) = raw.filter(|r| !r.is_empty()) else {
            return Ok(None);
        };
        let parsed = DateTime::parse_from_rfc3339(&raw).map_err(serde::de::Error::custom)?;
        if is_zero_instant(&parsed) {
            return Ok(None);
        }
        Ok(Some(WireTimestamp {
            instant: parsed,
            text: Some(raw),
        }))
    }
}
