//! Realtime user events pushed by the registration API.
//!
//! This crate defines the wire vocabulary of the `/api/users/events` stream:
//!
//! - **EventKind**: the four named events the server emits
//! - **UserEvent**: the payload shape carried by each kind
//! - **EventEnvelope**: a decoded payload plus the frame id and receipt time
//!
//! Decoding lives here so that both the stream client and the store agree on
//! how a raw `event:`/`data:` frame becomes a typed event.

use chrono::{DateTime, Utc};
use entity::users::User;
use entity::Id;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;

/// Event name of frames that carry no `event:` field.
pub const DEFAULT_EVENT_NAME: &str = "message";

/// Trait for getting the SSE event type name
pub trait EventType {
    fn event_type(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "user.created")]
    UserCreated,
    #[serde(rename = "user.updated")]
    UserUpdated,
    #[serde(rename = "user.deleted")]
    UserDeleted,
    #[serde(rename = "users.stats_updated")]
    StatsUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::UserCreated,
        EventKind::UserUpdated,
        EventKind::UserDeleted,
        EventKind::StatsUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::UserCreated => "user.created",
            EventKind::UserUpdated => "user.updated",
            EventKind::UserDeleted => "user.deleted",
            EventKind::StatsUpdated => "users.stats_updated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DecodeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| DecodeError::UnknownEvent(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    pub user: User,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdated {
    pub user: User,
    /// Fields of the record before the change. The server only sends the ones it
    /// considers relevant, so this stays an untyped JSON object.
    #[serde(default)]
    pub previous_user: Map<String, Value>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleted {
    pub user_id: Id,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub message: String,
}

/// Aggregate counters the server recomputes after registrations change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_users: u64,
    pub active_users: u64,
    pub new_users_this_month: u64,
}

/// Payload of a users event, tagged on the wire by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UserEvent {
    #[serde(rename = "user.created")]
    Created(UserCreated),
    #[serde(rename = "user.updated")]
    Updated(UserUpdated),
    #[serde(rename = "user.deleted")]
    Deleted(UserDeleted),
    #[serde(rename = "users.stats_updated")]
    StatsUpdated(StatsUpdated),
}

/// Stats payload including the human readable message the server attaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsUpdated {
    #[serde(flatten)]
    pub stats: UserStats,
    #[serde(default)]
    pub message: String,
}

impl UserEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            UserEvent::Created(_) => EventKind::UserCreated,
            UserEvent::Updated(_) => EventKind::UserUpdated,
            UserEvent::Deleted(_) => EventKind::UserDeleted,
            UserEvent::StatsUpdated(_) => EventKind::StatsUpdated,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            UserEvent::Created(data) => &data.message,
            UserEvent::Updated(data) => &data.message,
            UserEvent::Deleted(data) => &data.message,
            UserEvent::StatsUpdated(data) => &data.message,
        }
    }
}

impl EventType for UserEvent {
    fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// A decoded event together with the frame metadata it arrived with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEnvelope {
    /// The frame's `id:` field, when the server set one.
    pub id: Option<String>,
    pub payload: UserEvent,
    pub received_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(id: Option<String>, payload: UserEvent) -> Self {
        Self {
            id,
            payload,
            received_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Decodes one SSE frame.
    ///
    /// The event name comes from the frame's `event:` field, falling back to the
    /// payload's own `type` tag for frames sent on the default `message` channel.
    /// Payloads without a `type` tag get the resolved name inserted so that
    /// servers which only name the frame still decode.
    pub fn decode(id: Option<String>, event_name: &str, data: &str) -> Result<Self, DecodeError> {
        let mut value: Value =
            serde_json::from_str(data).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

        let object = value
            .as_object_mut()
            .ok_or_else(|| DecodeError::InvalidJson("payload is not a JSON object".to_string()))?;

        let tagged = object
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);

        let named = Some(event_name).filter(|name| !name.is_empty() && *name != DEFAULT_EVENT_NAME);

        let kind: EventKind = match (named, tagged.as_deref()) {
            (Some(name), Some(tag)) if name != tag => {
                return Err(DecodeError::Mismatch {
                    event: name.to_string(),
                    tag: tag.to_string(),
                })
            }
            (Some(name), _) => name.parse()?,
            (None, Some(tag)) => tag.parse()?,
            (None, None) => return Err(DecodeError::UnknownEvent(event_name.to_string())),
        };

        if tagged.is_none() {
            object.insert("type".to_string(), Value::from(kind.as_str()));
        }

        let payload: UserEvent = serde_json::from_value(value).map_err(|e| {
            DecodeError::InvalidPayload {
                kind,
                reason: e.to_string(),
            }
        })?;

        Ok(Self::new(id.filter(|id| !id.is_empty()), payload))
    }
}

impl EventType for EventEnvelope {
    fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The frame's data was not a JSON object.
    InvalidJson(String),
    /// The event name is not one this stream understands.
    UnknownEvent(String),
    /// The frame's `event:` field and the payload's `type` tag disagree.
    Mismatch { event: String, tag: String },
    /// The JSON was well formed but did not match the shape of its event kind.
    InvalidPayload { kind: EventKind, reason: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::InvalidJson(reason) => write!(f, "invalid event JSON: {reason}"),
            DecodeError::UnknownEvent(name) => write!(f, "unknown event type '{name}'"),
            DecodeError::Mismatch { event, tag } => {
                write!(f, "event '{event}' carries a payload tagged '{tag}'")
            }
            DecodeError::InvalidPayload { kind, reason } => {
                write!(f, "malformed {kind} payload: {reason}")
            }
        }
    }
}

impl StdError for DecodeError {}
