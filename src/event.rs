//! The event model: what the engine's sketches are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The category of an event, driving which sketches it feeds (see
/// [`crate::processor`]'s fan-out table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A user authenticating successfully.
    UserLogin,
    /// A user ending a session.
    UserLogout,
    /// An API call.
    ApiAccess,
    /// A database read or write.
    DatabaseAccess,
    /// A file read, write, or deletion.
    FileAccess,
    /// A security-relevant event (failed login, permission denial, etc).
    SecurityEvent,
    /// An application error.
    ErrorEvent,
    /// An administrative action.
    AdminAction,
    /// Any event type not covered by the named variants above.
    Custom(String),
}

impl EventType {
    /// The canonical string form, used in storage keys and serialized payloads.
    pub fn as_str(&self) -> &str {
        match self {
            EventType::UserLogin => "user_login",
            EventType::UserLogout => "user_logout",
            EventType::ApiAccess => "api_access",
            EventType::DatabaseAccess => "database_access",
            EventType::FileAccess => "file_access",
            EventType::SecurityEvent => "security_event",
            EventType::ErrorEvent => "error_event",
            EventType::AdminAction => "admin_action",
            EventType::Custom(name) => name,
        }
    }
}

/// A single observed event, the unit of input to [`crate::processor::EventProcessor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// The event's category.
    pub event_type: EventType,

    /// When the event occurred, in UTC.
    pub timestamp: DateTime<Utc>,

    /// The system (service, region, tenant) the event originated from.
    pub system: String,

    /// Opaque user identifier, when the event is attributable to a user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Opaque session identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Source IP address, as a string. Never interpreted, only hashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// API endpoint path, when `event_type` is `ApiAccess`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Free-form structured metadata the caller wants carried alongside the
    /// event (not interpreted by the engine itself).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Builds a minimal event with no optional fields set.
    pub fn new(event_type: EventType, timestamp: DateTime<Utc>, system: impl Into<String>) -> Self {
        Event {
            event_type,
            timestamp,
            system: system.into(),
            user_id: None,
            session_id: None,
            ip_address: None,
            endpoint: None,
            metadata: HashMap::new(),
        }
    }
}

/// A batch of events submitted together, bounded by
/// [`crate::config::EngineConfig::max_batch_size`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEventRequest {
    /// The events in this batch.
    pub events: Vec<Event>,
}
