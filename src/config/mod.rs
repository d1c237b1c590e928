//! Runtime configuration for the resource controller runtime: project
//! identity, per-subsystem tuning (store watch buffers, queue backoff, lock
//! negotiation window, event log compaction bounds), and the embedding
//! backend to use.
//!
//! Grounded on the teacher's `config` module shape (one `Config` struct of
//! nested section structs, TOML via the `toml` crate, a `ConfigLoader` with
//! hierarchical search paths, a separate `ConfigValidator`), trimmed from
//! UI/editor/shell settings down to this crate's subsystems.

pub mod defaults;
pub mod loader;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub lock: LockConfig,
    pub interest: InterestConfig,
    pub event: EventConfig,
    pub audit: AuditConfig,
    pub embedding: EmbeddingConfig,
    pub logging: crate::logging::LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Topic namespace prefix: `/agent-collab/{project}/...`.
    pub project: String,
    /// This node's own agent/holder identity.
    pub local_agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub watch_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(with = "humantime_serde")]
    pub negotiation_window: Duration,
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestConfig {
    pub default_level: String,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub max_events_per_file: usize,
    pub max_size: usize,
    pub similarity_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub max_entries: usize,
    pub channel_capacity: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "local" or "openai" — must match a compiled-in feature.
    pub provider: String,
    pub model: String,
}

/// How long an environment-seeded interest lives before `sweep_expired`
/// drops it, spec §6.
pub const ENV_INTEREST_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Interest seed read from the environment at startup, spec §6:
/// `AGENT_COLLAB_INTERESTS` (comma-separated glob patterns) and
/// `AGENT_COLLAB_INTEREST_LEVEL` (one of `none|locks_only|direct|all`).
#[derive(Debug, Clone)]
pub struct EnvInterestSeed {
    pub patterns: Vec<String>,
    pub level: crate::resources::interest::InterestLevel,
}

pub fn interest_seed_from_env() -> Option<EnvInterestSeed> {
    let raw = std::env::var("AGENT_COLLAB_INTERESTS").ok()?;
    let patterns: Vec<String> = raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    if patterns.is_empty() {
        return None;
    }
    let level = match std::env::var("AGENT_COLLAB_INTEREST_LEVEL").as_deref() {
        Ok("none") => crate::resources::interest::InterestLevel::None,
        Ok("locks_only") => crate::resources::interest::InterestLevel::LocksOnly,
        Ok("all") => crate::resources::interest::InterestLevel::All,
        _ => crate::resources::interest::InterestLevel::Direct,
    };
    Some(EnvInterestSeed { patterns, level })
}

/// Reads the environment interest seed (if any) and registers it with
/// `manager` under `agent_id`, stamped with the spec's 7-day TTL. Called once
/// at startup, alongside `ConfigLoader::load_with_fallback`, to seed an
/// agent's own interest before any peer traffic arrives. Returns the
/// registered interest's id.
pub fn seed_interests_from_env(
    manager: &crate::interest::InterestManager,
    agent_id: impl Into<String>,
    agent_name: impl Into<String>,
) -> Option<String> {
    let seed = interest_seed_from_env()?;
    let expires_at = chrono::Utc::now() + chrono::Duration::from_std(ENV_INTEREST_TTL).unwrap_or_else(|_| chrono::Duration::zero());
    let interest = crate::resources::interest::Interest {
        id: Uuid::new_v4().to_string(),
        agent_id: agent_id.into(),
        agent_name: agent_name.into(),
        patterns: seed.patterns,
        level: seed.level,
        track_dependencies: false,
        remote: false,
        expires_at: Some(expires_at),
    };
    Some(manager.register(interest))
}
