//! Core domain types for beacon
//!
//! These types represent the records that flow through the queue:
//! an [`Event`] is built once by the collector, persisted verbatim, and read
//! back in [`Batch`]es for delivery.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Wire format for event timestamps (always UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================
// Event type
// ============================================

/// Kind of tracked event, serialized as its integer code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum EventType {
    /// The application was launched
    OpenedApp,
    /// A user signed in
    Login,
    /// A tracked link was displayed
    ViewedLink,
    /// A tracked link was shared
    SharedLink,
    /// Any code without a named variant
    Other(i32),
}

impl EventType {
    /// Integer code sent on the wire
    pub fn code(self) -> i32 {
        match self {
            EventType::OpenedApp => 5,
            EventType::Login => 6,
            EventType::ViewedLink => 11,
            EventType::SharedLink => 12,
            EventType::Other(code) => code,
        }
    }

    /// Parse from a CLI-style name (`opened-app`) or a bare integer code
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "opened-app" => Some(EventType::OpenedApp),
            "login" => Some(EventType::Login),
            "viewed-link" => Some(EventType::ViewedLink),
            "shared-link" => Some(EventType::SharedLink),
            other => other.parse::<i32>().ok().map(EventType::from),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::OpenedApp => "opened-app",
            EventType::Login => "login",
            EventType::ViewedLink => "viewed-link",
            EventType::SharedLink => "shared-link",
            EventType::Other(_) => "other",
        }
    }
}

impl From<i32> for EventType {
    fn from(code: i32) -> Self {
        match code {
            5 => EventType::OpenedApp,
            6 => EventType::Login,
            11 => EventType::ViewedLink,
            12 => EventType::SharedLink,
            other => EventType::Other(other),
        }
    }
}

impl From<EventType> for i32 {
    fn from(event_type: EventType) -> Self {
        event_type.code()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Other(code) => write!(f, "{}", code),
            named => f.write_str(named.as_str()),
        }
    }
}

// ============================================
// Event record
// ============================================

/// A single collected event.
///
/// The serialized form is both the stored representation and the element
/// type of the outbound `payload` array. Records are never modified after
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind
    pub event_type: EventType,

    /// Tracked link or loop this event refers to
    #[serde(rename = "link_name")]
    pub subject: Option<String>,

    /// Optional sub-classification of the subject
    pub channel: Option<String>,

    /// UTC creation time, `yyyy-MM-dd HH:mm:ss`
    pub timestamp: String,

    /// Random per-event token used for server-side de-duplication
    #[serde(rename = "event_identifier")]
    pub identifier: String,

    /// Caller-supplied properties; omitted from JSON when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_properties: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Event {
    /// Build a new event stamped with the current time and a fresh identifier.
    ///
    /// `properties` must serialize to a JSON object.
    pub fn new<P>(
        event_type: EventType,
        subject: Option<&str>,
        channel: Option<&str>,
        properties: Option<&P>,
    ) -> std::result::Result<Self, ValidationError>
    where
        P: Serialize + ?Sized,
    {
        let external_properties = properties.map(properties_to_map).transpose()?;

        Ok(Event {
            event_type,
            subject: subject.map(str::to_string),
            channel: channel.map(str::to_string),
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            identifier: uuid::Uuid::new_v4().to_string(),
            external_properties,
        })
    }
}

fn properties_to_map<P>(
    properties: &P,
) -> std::result::Result<serde_json::Map<String, serde_json::Value>, ValidationError>
where
    P: Serialize + ?Sized,
{
    match serde_json::to_value(properties).map_err(ValidationError::Properties)? {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Err(ValidationError::NotAnObject("null")),
        serde_json::Value::Bool(_) => Err(ValidationError::NotAnObject("boolean")),
        serde_json::Value::Number(_) => Err(ValidationError::NotAnObject("number")),
        serde_json::Value::String(_) => Err(ValidationError::NotAnObject("string")),
        serde_json::Value::Array(_) => Err(ValidationError::NotAnObject("array")),
    }
}

// ============================================
// Cursor and batch
// ============================================

/// Position of a stored event; strictly increasing in append order.
///
/// A cursor handed out by a read means "everything up to and including
/// this position may be removed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(pub i64);

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The oldest pending events, read for one delivery attempt.
///
/// Not persisted: if the process dies before the batch is removed, the same
/// records are read again by the next flush.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Events in insertion order
    pub events: Vec<Event>,
    /// Cursor of the last record covered by this batch
    pub cursor: Cursor,
    /// Records covered by the batch, including any that failed to decode
    pub records: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
