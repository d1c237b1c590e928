//! The `Event` resource — spec §3.5 / §4.7.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    FileChange,
    LockAcquired,
    LockReleased,
    LockConflict,
    ContextShared,
    Warning,
}

impl EventType {
    /// Event types an `Interest` with level `LocksOnly` retains (spec §4.7).
    pub fn is_lock_related(&self) -> bool {
        matches!(
            self,
            EventType::LockAcquired | EventType::LockReleased | EventType::LockConflict
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Active,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: EventType,
    pub source_id: String,
    pub source_name: String,
    pub timestamp: DateTime<Utc>,
    pub file_path: Option<String>,
    pub payload: Option<Value>,
    pub embedding: Option<Vec<f32>>,
    pub status: EventStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub superseded_by: Option<String>,
}

impl Event {
    pub fn new(type_: EventType, source_id: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            type_,
            source_id: source_id.into(),
            source_name: source_name.into(),
            timestamp: Utc::now(),
            file_path: None,
            payload: None,
            embedding: None,
            status: EventStatus::Active,
            expires_at: None,
            superseded_by: None,
        }
    }

    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// `Publish` broadcasts only when `file_path` is unset (spec §4.7).
    pub fn is_broadcast(&self) -> bool {
        self.file_path.is_none()
    }
}

/// Query parameters accepted by `EventLog::query`, spec §4.7.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub types: Option<Vec<EventType>>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub file_path: Option<String>,
    pub source_id: Option<String>,
    pub include_all: bool,
}
