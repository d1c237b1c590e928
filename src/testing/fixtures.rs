//! Common test data builders for the resource kinds this crate stores.
//!
//! Grounded on the teacher's `testing::fixtures` (`AgentFixtures`,
//! `ProjectFixtures` — one zero-sized builder struct per domain concept,
//! constructing realistic-but-minimal objects), retargeted at `Lock`,
//! `Agent`, and `Context`.

use crate::resources::{
    Agent, AgentPhase, AgentSpec, Capability, ContextSpec, ContextType, Lock, LockSpec, LockTarget,
};
use std::collections::HashSet;
use std::time::Duration;

pub struct LockFixtures;

impl LockFixtures {
    pub fn file_lock(name: &str, holder_id: &str, file_path: &str) -> Lock {
        Lock::new(
            name,
            LockSpec {
                target: LockTarget::File {
                    file_path: file_path.to_string(),
                },
                holder_id: holder_id.to_string(),
                intention: "editing".to_string(),
                ttl: Duration::from_secs(300),
                priority: 0,
                exclusive: true,
            },
        )
    }

    pub fn line_range_lock(name: &str, holder_id: &str, file_path: &str, start_line: u32, end_line: u32) -> Lock {
        Lock::new(
            name,
            LockSpec {
                target: LockTarget::LineRange {
                    file_path: file_path.to_string(),
                    start_line,
                    end_line,
                },
                holder_id: holder_id.to_string(),
                intention: "editing".to_string(),
                ttl: Duration::from_secs(300),
                priority: 0,
                exclusive: true,
            },
        )
    }

    pub fn with_ttl(mut lock: Lock, ttl: Duration) -> Lock {
        lock.spec.ttl = ttl;
        lock
    }

    pub fn with_priority(mut lock: Lock, priority: i32) -> Lock {
        lock.spec.priority = priority;
        lock
    }
}

pub struct AgentFixtures;

impl AgentFixtures {
    pub fn pending(name: &str, peer_id: &str) -> Agent {
        Agent::new(
            name,
            AgentSpec {
                provider: "anthropic".to_string(),
                model: "claude".to_string(),
                capabilities: HashSet::from([Capability::CodeEdit, Capability::Chat]),
                peer_id: peer_id.to_string(),
                display_name: name.to_string(),
                heartbeat_interval: Duration::from_secs(10),
                max_concurrent_tasks: 1,
            },
        )
    }

    pub fn online(name: &str, peer_id: &str) -> Agent {
        let mut agent = Self::pending(name, peer_id);
        agent.status.phase = Some(AgentPhase::Online);
        agent.status.last_heartbeat = Some(chrono::Utc::now());
        agent
    }

    pub fn with_heartbeat_interval(mut agent: Agent, interval: Duration) -> Agent {
        agent.spec.heartbeat_interval = interval;
        agent
    }
}

pub struct ContextFixtures;

impl ContextFixtures {
    pub fn file_context(source_agent_id: &str, file_path: &str, content: &str) -> ContextSpec {
        ContextSpec {
            type_: ContextType::File,
            source_agent_id: source_agent_id.to_string(),
            file_path: file_path.to_string(),
            content: content.to_string(),
            summary: String::new(),
            content_hash: String::new(),
            vector_clock: crate::clock::VectorClock::default(),
            delta: None,
            ttl: None,
            tags: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_lock_targets_the_given_path() {
        let lock = LockFixtures::file_lock("lock-1", "agent-a", "src/main.rs");
        assert_eq!(lock.spec.target.file_path(), "src/main.rs");
        assert!(lock.spec.target.is_file());
    }

    #[test]
    fn online_agent_has_recent_heartbeat() {
        let agent = AgentFixtures::online("agent-a", "peer-1");
        assert_eq!(agent.status.phase, Some(AgentPhase::Online));
        assert!(agent.status.last_heartbeat.is_some());
    }

    #[test]
    fn file_context_spec_has_empty_hash_until_computed() {
        let mut spec = ContextFixtures::file_context("agent-a", "src/lib.rs", "fn main() {}");
        assert!(spec.content_hash.is_empty());
        spec.ensure_content_hash();
        assert!(!spec.content_hash.is_empty());
    }
}
