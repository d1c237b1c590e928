//! The `Context` resource — spec §3.2 / §4.6.

use crate::clock::VectorClock;
use crate::meta::{ConditionSet, ObjectMeta, Resource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextType {
    File,
    Delta,
    Message,
    Symbol,
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOperation {
    Add,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextDelta {
    pub operation: DeltaOperation,
    #[serde(default)]
    pub old_content: String,
    #[serde(default)]
    pub new_content: String,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    #[serde(default)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextSpec {
    #[serde(rename = "type")]
    pub type_: ContextType,
    pub source_agent_id: String,
    pub file_path: String,
    pub content: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub vector_clock: VectorClock,
    pub delta: Option<ContextDelta>,
    #[serde(default, with = "humantime_serde::option")]
    pub ttl: Option<std::time::Duration>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ContextSpec {
    /// Lowercase hex SHA-256 of `content`, computed if `content_hash` is
    /// empty. Idempotent: calling this twice never changes an already-set
    /// hash (spec §3.2 invariant).
    pub fn ensure_content_hash(&mut self) {
        if self.content_hash.is_empty() {
            self.content_hash = Self::hash(&self.content);
        }
    }

    pub fn hash(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextPhase {
    Pending,
    Syncing,
    Synced,
    Embedding,
    Ready,
    Failed,
}

impl Default for ContextPhase {
    fn default() -> Self {
        ContextPhase::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncedTo {
    pub agent_id: String,
    pub synced_at: DateTime<Utc>,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingInfo {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub embedded_at: DateTime<Utc>,
    pub collection_id: String,
    pub document_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ContextStatus {
    pub phase: Option<ContextPhase>,
    #[serde(default)]
    pub synced_to: Vec<SyncedTo>,
    pub embedding: Option<EmbeddingInfo>,
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub conditions: ConditionSet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Context {
    pub meta: ObjectMeta,
    pub spec: ContextSpec,
    #[serde(default)]
    pub status: ContextStatus,
}

impl Context {
    pub fn new(name: impl Into<String>, spec: ContextSpec) -> Self {
        Self {
            meta: ObjectMeta::new(name),
            spec,
            status: ContextStatus {
                phase: Some(ContextPhase::Pending),
                ..Default::default()
            },
        }
    }
}

impl Resource for Context {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

/// Pub/sub payload broadcast when a locally-sourced context enters `Syncing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSyncMessage {
    pub name: String,
    pub content_hash: String,
    pub spec: ContextSpec,
    pub vector_clock: VectorClock,
}

/// Sent back to the originator once a peer accepts (or dedupes) a sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextAck {
    pub name: String,
    pub agent_id: String,
    pub acknowledged: bool,
}
