//! Common object metadata shared by every resource kind the store holds.
//!
//! Every stored entity (Lock, Context, Agent, Interest, Event...) embeds an
//! [`ObjectMeta`] the same way Kubernetes-style controllers do: a unique name,
//! an opaque uid assigned once, a monotonic resource version stamped by the
//! store on every mutation, and the bookkeeping fields (labels, annotations,
//! finalizers, owner references) controllers use to coordinate cleanup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Metadata common to all resource kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub resource_version: String,
    /// Bumped only when `spec` changes; distinguishes desired-state churn
    /// from the status-only writes that dominate watch traffic.
    #[serde(default)]
    pub generation: u64,
    #[serde(default = "Utc::now")]
    pub creation_timestamp: DateTime<Utc>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub finalizers: Vec<String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: Uuid::new_v4().to_string(),
            resource_version: String::new(),
            generation: 0,
            creation_timestamp: Utc::now(),
            deletion_timestamp: None,
            labels: HashMap::new(),
            annotations: HashMap::new(),
            finalizers: Vec::new(),
            owner_references: Vec::new(),
        }
    }

    /// True if every `key=value` pair in `selector` matches a label.
    pub fn matches_labels(&self, selector: &HashMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).map(|lv| lv == v).unwrap_or(false))
    }
}

/// A back-reference to the resource that logically owns this one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub block_owner_deletion: bool,
}

/// Tri-state observation used by [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single typed state observation on a resource's status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// An ordered list of conditions with upsert-by-type semantics.
///
/// `last_transition_time` only advances when `status` actually changes —
/// re-asserting the same status with a new reason/message does not reset it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConditionSet(#[serde(default)] pub Vec<Condition>);

impl ConditionSet {
    pub fn set(&mut self, type_: &str, status: ConditionStatus, reason: &str, message: &str) {
        let now = Utc::now();
        if let Some(existing) = self.0.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.last_transition_time = now;
            }
            existing.status = status;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
        } else {
            self.0.push(Condition {
                type_: type_.to_string(),
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
            });
        }
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    pub fn is_true(&self, type_: &str) -> bool {
        matches!(self.get(type_), Some(c) if c.status == ConditionStatus::True)
    }
}

/// Trait implemented by every resource kind stored in a [`crate::store::Store`].
///
/// Kept as a compile-time generic bound (not a runtime tagged dispatcher)
/// since every kind in this crate is known ahead of time; a plugin-loaded
/// kind system would need the dynamic variant instead.
pub trait Resource: Clone + Send + Sync + 'static {
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        &self.meta().name
    }
}
