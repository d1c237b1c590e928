//! The `Interest` resource — spec §3.4 / §4.7.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterestLevel {
    None,
    LocksOnly,
    Direct,
    All,
}

/// Not a store [`crate::meta::Resource`] with spec/status — interests are a
/// flat registration record, matching spec §3.4's description ("keyed by an
/// opaque id, holds ...").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interest {
    pub id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub patterns: Vec<String>,
    pub level: InterestLevel,
    #[serde(default)]
    pub track_dependencies: bool,
    #[serde(default)]
    pub remote: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Interest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}
