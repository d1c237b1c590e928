//! Agent presence and heartbeat tracking — spec §3.3 / §4.5.
//!
//! [`AgentPresenceController`] drives local agents through
//! `Pending -> Connecting -> Online/Busy`, and demotes to `Offline` when a
//! heartbeat is missed. [`run_heartbeat_publisher`] sends the local agent's
//! own heartbeat out on an interval; [`run_heartbeat_listener`] is the
//! receiving half, turning inbound heartbeat broadcasts into status updates
//! and creating a non-authoritative mirror `Agent` the first time an
//! unfamiliar peer is heard from (the same "advisory mirror" treatment locks
//! give remote acquisitions).
//!
//! Grounded on the teacher's `system_bus` heartbeat/presence plumbing,
//! generalized onto [`crate::controller::Reconciler`].

use crate::error::{CoreError, CoreResult};
use crate::meta::{ConditionStatus, ObjectMeta};
use crate::pubsub::{topics, PubSub};
use crate::queue::WorkQueue;
use crate::resources::agent::{Agent, AgentPhase, AgentSpec, AgentStatus, Capability, HeartbeatMessage};
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::controller::{ReconcileResult, Reconciler};

/// Heartbeats older than `3 * heartbeat_interval` demote the agent to Offline.
const MISSED_HEARTBEAT_FACTOR: i32 = 3;

pub struct AgentPresenceController {
    local_agent_id: String,
}

impl AgentPresenceController {
    pub fn new(local_agent_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            local_agent_id: local_agent_id.into(),
        })
    }
}

#[async_trait]
impl Reconciler<Agent> for AgentPresenceController {
    async fn reconcile(&self, store: &Store<Agent>, name: &str) -> Result<ReconcileResult, CoreError> {
        let mut agent = match store.get(name).await {
            Ok(a) => a,
            Err(CoreError::NotFound(_)) => return Ok(ReconcileResult::done()),
            Err(e) => return Err(e),
        };

        let phase = agent.status.phase.unwrap_or_default();
        if phase == AgentPhase::Terminating {
            return Ok(ReconcileResult::done());
        }

        let interval = agent.spec.heartbeat_interval;
        let timeout = interval * MISSED_HEARTBEAT_FACTOR as u32;
        let now = Utc::now();
        let overdue = agent
            .status
            .last_heartbeat
            .map(|last| now.signed_duration_since(last).to_std().unwrap_or_default() > timeout)
            .unwrap_or(false);

        if matches!(phase, AgentPhase::Online | AgentPhase::Busy) && overdue {
            agent.status.phase = Some(AgentPhase::Offline);
            agent.status.conditions.set(
                "Connected",
                ConditionStatus::False,
                "HeartbeatTimeout",
                "no heartbeat within the missed-beat window",
            );
            store.update(agent).await?;
            warn!(agent = name, "agent marked offline on missed heartbeat");
            return Ok(ReconcileResult::requeue_after(interval));
        }

        if phase == AgentPhase::Pending {
            agent.status.phase = Some(AgentPhase::Connecting);
            agent.status.conditions.set(
                "Connected",
                ConditionStatus::Unknown,
                "AwaitingHeartbeat",
                "waiting for first heartbeat",
            );
            store.update(agent).await?;
        }

        Ok(ReconcileResult::requeue_after(interval))
    }
}

/// Subscribe to the project's heartbeat topic and apply each message to the
/// store: update the matching agent's status, or create a mirror if it's
/// the first time this peer has been heard from. Runs until the
/// subscription closes.
pub async fn run_heartbeat_listener(
    project: String,
    pubsub: Arc<dyn PubSub>,
    store: Arc<Store<Agent>>,
    queue: Arc<WorkQueue>,
) -> CoreResult<()> {
    let mut sub = pubsub.subscribe(&topics::agent_heartbeat(&project)).await?;
    tokio::spawn(async move {
        while let Some(value) = sub.next().await {
            let beat: HeartbeatMessage = match serde_json::from_value(value) {
                Ok(b) => b,
                Err(e) => {
                    debug!(error = %e, "ignoring malformed heartbeat");
                    continue;
                }
            };
            apply_heartbeat(&store, &queue, beat).await;
        }
    });
    Ok(())
}

/// Periodically publish the local agent's own status as a heartbeat on the
/// project's heartbeat topic (spec §4.5: "each agent publishes its own
/// heartbeat on an interval"), reading current phase/task/token usage from
/// the store each tick rather than caching them. Runs until `local_agent_id`
/// is removed from the store.
pub async fn run_heartbeat_publisher(
    project: String,
    local_agent_id: String,
    pubsub: Arc<dyn PubSub>,
    store: Arc<Store<Agent>>,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let agent = match store.get(&local_agent_id).await {
                Ok(a) => a,
                Err(CoreError::NotFound(_)) => break,
                Err(_) => continue,
            };
            let beat = HeartbeatMessage {
                agent_id: local_agent_id.clone(),
                phase: agent.status.phase.unwrap_or_default(),
                current_task: agent.status.current_task.clone(),
                token_usage: agent.status.token_usage.clone(),
                timestamp: Utc::now(),
            };
            if let Err(e) = pubsub.publish_json(&topics::agent_heartbeat(&project), &beat).await {
                debug!(error = %e, "heartbeat publish failed");
            }
        }
    });
}

async fn apply_heartbeat(store: &Store<Agent>, queue: &WorkQueue, beat: HeartbeatMessage) {
    match store.get(&beat.agent_id).await {
        Ok(mut agent) => {
            agent.status.phase = Some(beat.phase);
            agent.status.last_heartbeat = Some(beat.timestamp);
            agent.status.last_seen_at = Some(beat.timestamp);
            agent.status.current_task = beat.current_task;
            if beat.token_usage.is_some() {
                agent.status.token_usage = beat.token_usage;
            }
            agent.status.conditions.set(
                "Connected",
                ConditionStatus::True,
                "HeartbeatReceived",
                "heartbeat received within window",
            );
            if store.update(agent).await.is_ok() {
                queue.add(&beat.agent_id);
            }
        }
        Err(CoreError::NotFound(_)) => {
            let mut mirror = Agent::new(
                beat.agent_id.clone(),
                AgentSpec {
                    provider: "unknown".to_string(),
                    model: "unknown".to_string(),
                    capabilities: HashSet::<Capability>::new(),
                    peer_id: beat.agent_id.clone(),
                    display_name: beat.agent_id.clone(),
                    heartbeat_interval: Duration::from_secs(30),
                    max_concurrent_tasks: 1,
                },
            );
            mirror.meta = ObjectMeta::new(beat.agent_id.clone());
            mirror.meta.labels.insert("mirror".to_string(), "true".to_string());
            mirror.status = AgentStatus {
                phase: Some(beat.phase),
                last_heartbeat: Some(beat.timestamp),
                last_seen_at: Some(beat.timestamp),
                current_task: beat.current_task,
                token_usage: beat.token_usage,
                ..Default::default()
            };
            if store.create(mirror).await.is_ok() {
                info!(agent = %beat.agent_id, "created mirror agent from first heartbeat");
                queue.add(&beat.agent_id);
            }
        }
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::LocalPubSub;
    use tokio::time::{sleep, Duration as TokioDuration};

    fn spec() -> AgentSpec {
        AgentSpec {
            provider: "anthropic".to_string(),
            model: "claude".to_string(),
            capabilities: HashSet::new(),
            peer_id: "peer-1".to_string(),
            display_name: "agent-a".to_string(),
            heartbeat_interval: Duration::from_millis(20),
            max_concurrent_tasks: 1,
        }
    }

    #[tokio::test]
    async fn pending_agent_moves_to_connecting() {
        let store = Store::<Agent>::new();
        let controller = AgentPresenceController::new("agent-a");
        store.create(Agent::new("agent-a", spec())).await.unwrap();

        controller.reconcile(&store, "agent-a").await.unwrap();
        let updated = store.get("agent-a").await.unwrap();
        assert_eq!(updated.status.phase, Some(AgentPhase::Connecting));
    }

    #[tokio::test]
    async fn stale_online_agent_goes_offline() {
        let store = Store::<Agent>::new();
        let controller = AgentPresenceController::new("agent-a");
        let mut agent = Agent::new("agent-a", spec());
        agent.status.phase = Some(AgentPhase::Online);
        agent.status.last_heartbeat = Some(Utc::now() - chrono::Duration::seconds(10));
        store.create(agent).await.unwrap();

        controller.reconcile(&store, "agent-a").await.unwrap();
        let updated = store.get("agent-a").await.unwrap();
        assert_eq!(updated.status.phase, Some(AgentPhase::Offline));
    }

    #[tokio::test]
    async fn unknown_heartbeat_creates_mirror_agent() {
        let store = Store::<Agent>::new();
        let queue = WorkQueue::new(Arc::new(crate::queue::rate_limiter::ExponentialBackoff::default()));
        let pubsub = LocalPubSub::new();
        run_heartbeat_listener("proj".to_string(), pubsub.clone(), Arc::clone(&store), Arc::clone(&queue))
            .await
            .unwrap();

        pubsub
            .publish_json(
                &topics::agent_heartbeat("proj"),
                &HeartbeatMessage {
                    agent_id: "peer-remote".to_string(),
                    phase: AgentPhase::Online,
                    current_task: None,
                    token_usage: None,
                    timestamp: Utc::now(),
                },
            )
            .await
            .unwrap();

        sleep(TokioDuration::from_millis(20)).await;
        let mirrored = store.get("peer-remote").await.unwrap();
        assert_eq!(mirrored.status.phase, Some(AgentPhase::Online));
        assert_eq!(mirrored.meta.labels.get("mirror"), Some(&"true".to_string()));
    }

    #[tokio::test]
    async fn heartbeat_publisher_reports_current_store_state_each_tick() {
        let store = Store::<Agent>::new();
        let mut agent = Agent::new("agent-a", spec());
        agent.status.phase = Some(AgentPhase::Busy);
        agent.status.current_task = Some("refactor-foo".to_string());
        store.create(agent).await.unwrap();

        let pubsub = LocalPubSub::new();
        let mut sub = pubsub.subscribe(&topics::agent_heartbeat("proj")).await.unwrap();
        run_heartbeat_publisher(
            "proj".to_string(),
            "agent-a".to_string(),
            pubsub.clone(),
            Arc::clone(&store),
            Duration::from_millis(10),
        )
        .await;

        let value = tokio::time::timeout(TokioDuration::from_millis(100), sub.next())
            .await
            .unwrap()
            .unwrap();
        let beat: HeartbeatMessage = serde_json::from_value(value).unwrap();
        assert_eq!(beat.agent_id, "agent-a");
        assert_eq!(beat.phase, AgentPhase::Busy);
        assert_eq!(beat.current_task.as_deref(), Some("refactor-foo"));
    }
}
