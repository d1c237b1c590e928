//! The `Delta` audit record — spec §3.6 / §4.8.

use crate::clock::VectorClock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delta {
    pub id: String,
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub vector_clock: VectorClock,
    pub payload: Value,
}

impl Delta {
    pub fn new(source_id: impl Into<String>, vector_clock: VectorClock, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            timestamp: Utc::now(),
            vector_clock,
            payload,
        }
    }

    /// Primary key ordering: `(source, ts, id)`, for per-source range scans.
    pub fn by_source_key(&self) -> (String, DateTime<Utc>, String) {
        (self.source_id.clone(), self.timestamp, self.id.clone())
    }

    /// Secondary key ordering: `(ts, source, id)`, for cluster-wide time
    /// range scans.
    pub fn by_time_key(&self) -> (DateTime<Utc>, String, String) {
        (self.timestamp, self.source_id.clone(), self.id.clone())
    }
}
