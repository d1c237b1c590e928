//! The `Agent` resource — spec §3.3 / §4.5.

use crate::meta::{ConditionSet, ObjectMeta, Resource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Embedding,
    Completion,
    CodeEdit,
    CodeReview,
    Chat,
    ToolUse,
    Vision,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub capabilities: HashSet<Capability>,
    pub peer_id: String,
    pub display_name: String,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: u32,
}

fn default_max_concurrent() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentPhase {
    Pending,
    Connecting,
    Online,
    Busy,
    Offline,
    Error,
    Terminating,
}

impl Default for AgentPhase {
    fn default() -> Self {
        AgentPhase::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkInfo {
    pub address: String,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AgentStatus {
    pub phase: Option<AgentPhase>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub current_task: Option<String>,
    pub token_usage: Option<TokenUsage>,
    pub network_info: Option<NetworkInfo>,
    #[serde(default)]
    pub conditions: ConditionSet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub meta: ObjectMeta,
    pub spec: AgentSpec,
    #[serde(default)]
    pub status: AgentStatus,
}

impl Agent {
    pub fn new(name: impl Into<String>, spec: AgentSpec) -> Self {
        Self {
            meta: ObjectMeta::new(name),
            spec,
            status: AgentStatus {
                phase: Some(AgentPhase::Pending),
                ..Default::default()
            },
        }
    }
}

impl Resource for Agent {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

/// Heartbeat payload published on `.../agent/heartbeat`, spec §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub agent_id: String,
    pub phase: AgentPhase,
    pub current_task: Option<String>,
    pub token_usage: Option<TokenUsage>,
    pub timestamp: DateTime<Utc>,
}
