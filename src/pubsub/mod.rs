//! Publish/subscribe contract the lock, context, agent-presence, and event
//! controllers speak, and an in-process implementation of it.
//!
//! The real transport (a libp2p-style mesh over WireGuard) is an external
//! collaborator per spec §1/§6 — this crate only needs its contract.
//! [`LocalPubSub`] is a same-process implementation of that contract (topic
//! string -> `tokio::sync::broadcast` channel), grounded on the teacher's
//! `system_bus::SystemBus`, generalized from one fixed `SystemEvent` enum to
//! arbitrary JSON payloads addressed by topic.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Builds the `/agent-collab/{project}/<subsystem>/<verb>` topic names from
/// spec §4/§6.
pub mod topics {
    pub fn lock(project: &str, verb: &str) -> String {
        format!("/agent-collab/{project}/lock/{verb}")
    }

    pub fn agent_heartbeat(project: &str) -> String {
        format!("/agent-collab/{project}/agent/heartbeat")
    }

    pub fn context(project: &str, verb: &str) -> String {
        format!("/agent-collab/{project}/context/{verb}")
    }

    pub fn events() -> String {
        "/agent-collab/events".to_string()
    }
}

/// A live subscription handle.
pub struct Subscription {
    rx: broadcast::Receiver<Value>,
}

impl Subscription {
    /// Returns `None` only if the publishing side has gone away; malformed
    /// payloads are surfaced as `Err` and should be swallowed by the caller
    /// (spec §7: subscription read loops ignore malformed messages and do
    /// not count them toward backoff).
    pub async fn next(&mut self) -> Option<Value> {
        loop {
            match self.rx.recv().await {
                Ok(v) => return Some(v),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The publish/subscribe contract a transport must satisfy.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> CoreResult<()>;
    async fn subscribe(&self, topic: &str) -> CoreResult<Subscription>;
}

/// In-process pub/sub over per-topic broadcast channels. Suitable for single
/// node tests and for embedders that don't need real networking.
pub struct LocalPubSub {
    topics: RwLock<HashMap<String, broadcast::Sender<Value>>>,
    capacity: usize,
}

impl LocalPubSub {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        })
    }

    async fn sender_for(&self, topic: &str) -> broadcast::Sender<Value> {
        if let Some(tx) = self.topics.read().await.get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub async fn publish_json<T: Serialize + Sync>(&self, topic: &str, payload: &T) -> CoreResult<()> {
        let value = serde_json::to_value(payload)?;
        self.publish(topic, value).await
    }
}

#[async_trait]
impl PubSub for LocalPubSub {
    async fn publish(&self, topic: &str, payload: Value) -> CoreResult<()> {
        let tx = self.sender_for(topic).await;
        // A topic with no subscribers yet is not an error: the event is
        // still recorded by whatever local log called us (spec §7,
        // PublishError only covers transport rejection).
        let _ = tx.send(payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> CoreResult<Subscription> {
        let tx = self.sender_for(topic).await;
        Ok(Subscription { rx: tx.subscribe() })
    }
}

/// Thrown by callers that track their own "only one subscriber per topic per
/// node" policy (spec §7 `SubscribeAlreadyActive`); `LocalPubSub` itself
/// allows any number of subscribers, so this is surfaced by subsystem-level
/// wrappers (e.g. the lock controller subscribing to its own intent topic
/// exactly once).
pub fn subscribe_once_guard(active: &mut std::collections::HashSet<String>, topic: &str) -> CoreResult<()> {
    if !active.insert(topic.to_string()) {
        return Err(CoreError::SubscribeAlreadyActive(topic.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_then_subscribe_receives_message() {
        let bus = LocalPubSub::new();
        let mut sub = bus.subscribe("topic-a").await.unwrap();
        bus.publish("topic-a", json!({"hello": "world"})).await.unwrap();
        let msg = sub.next().await.unwrap();
        assert_eq!(msg["hello"], "world");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = LocalPubSub::new();
        let mut sub_b = bus.subscribe("topic-b").await.unwrap();
        bus.publish("topic-a", json!({"x": 1})).await.unwrap();
        bus.publish("topic-b", json!({"x": 2})).await.unwrap();
        let msg = sub_b.next().await.unwrap();
        assert_eq!(msg["x"], 2);
    }

    #[test]
    fn topic_namespace_matches_spec() {
        assert_eq!(topics::lock("proj1", "intent"), "/agent-collab/proj1/lock/intent");
        assert_eq!(topics::agent_heartbeat("proj1"), "/agent-collab/proj1/agent/heartbeat");
        assert_eq!(topics::events(), "/agent-collab/events");
    }

    #[test]
    fn subscribe_once_guard_rejects_second_subscription() {
        let mut active = std::collections::HashSet::new();
        subscribe_once_guard(&mut active, "t").unwrap();
        let err = subscribe_once_guard(&mut active, "t").unwrap_err();
        assert!(matches!(err, CoreError::SubscribeAlreadyActive(_)));
    }
}
