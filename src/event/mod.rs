//! Event log and interest-gated router — spec §3.5 / §4.7.
//!
//! [`EventLog`] is a bounded, in-memory append log with a two-stage
//! compaction policy (archive past `max_events_per_file`, hard-drop past
//! `max_size`) plus an independent background compactor that drops entries
//! past their `expires_at` on a fixed interval — two mechanisms kept
//! deliberately separate (SPEC_FULL.md §9: "do not merge"). [`EventRouter`]
//! combines the log with [`crate::interest::InterestManager`] and an
//! optional embedding service/vector store to compute, per published event,
//! which agents should be notified, and to answer semantic-similarity
//! queries over event history.

use crate::context_pipeline::embeddings::EmbeddingService;
use crate::context_pipeline::vector_store::VectorStore;
use crate::error::CoreResult;
use crate::interest::InterestManager;
use crate::pubsub::{topics, PubSub};
use crate::resources::event::{Event, EventQuery, EventStatus, EventType};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

const EVENT_COLLECTION: &str = "events";

/// Archive-then-compact bounds for one project's event log.
#[derive(Debug, Clone)]
pub struct EventLogOptions {
    /// Soft cap: past this many live events the oldest are archived.
    pub max_events_per_file: usize,
    /// Hard cap: past this many total (live + archived) events, archived
    /// ones are dropped oldest-first regardless of TTL.
    pub max_size: usize,
}

impl Default for EventLogOptions {
    fn default() -> Self {
        Self {
            max_events_per_file: 500,
            max_size: 5000,
        }
    }
}

struct State {
    events: Vec<Event>,
}

/// Bounded append log of [`Event`]s with label/type/time filtering.
pub struct EventLog {
    state: RwLock<State>,
    options: EventLogOptions,
}

impl EventLog {
    pub fn new(options: EventLogOptions) -> Self {
        Self {
            state: RwLock::new(State { events: Vec::new() }),
            options,
        }
    }

    pub fn append(&self, event: Event) {
        let mut state = self.state.write().unwrap();
        state.events.push(event);
        self.compact_locked(&mut state);
    }

    pub fn query(&self, q: &EventQuery) -> Vec<Event> {
        let state = self.state.read().unwrap();
        let mut results: Vec<Event> = state
            .events
            .iter()
            .filter(|e| q.include_all || e.status != EventStatus::Archived)
            .filter(|e| q.types.as_ref().map(|ts| ts.contains(&e.type_)).unwrap_or(true))
            .filter(|e| q.since.map(|since| e.timestamp >= since).unwrap_or(true))
            .filter(|e| {
                q.file_path
                    .as_ref()
                    .map(|p| e.file_path.as_deref() == Some(p.as_str()))
                    .unwrap_or(true)
            })
            .filter(|e| q.source_id.as_ref().map(|s| &e.source_id == s).unwrap_or(true))
            .cloned()
            .collect();
        results.sort_by_key(|e| e.timestamp);
        if let Some(limit) = q.limit {
            results.truncate(limit);
        }
        results
    }

    /// Archive events per file past `max_events_per_file` (oldest-first, per
    /// file path), then hard-drop the oldest archived events once the total
    /// log exceeds `max_size`.
    fn compact_locked(&self, state: &mut State) {
        // Walk newest-first so the most recent `max_events_per_file` events
        // per path stay live and the rest are archived.
        let mut seen: HashMap<String, usize> = HashMap::new();
        for event in state.events.iter_mut().rev() {
            if event.status == EventStatus::Archived {
                continue;
            }
            if let Some(path) = &event.file_path {
                let count = seen.entry(path.clone()).or_insert(0);
                *count += 1;
                if *count > self.options.max_events_per_file {
                    event.status = EventStatus::Archived;
                }
            }
        }

        if state.events.len() > self.options.max_size {
            state.events.sort_by_key(|e| e.timestamp);
            let overflow = state.events.len() - self.options.max_size;
            let mut dropped = 0;
            state.events.retain(|e| {
                if dropped < overflow && e.status == EventStatus::Archived {
                    dropped += 1;
                    false
                } else {
                    true
                }
            });
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().events.len()
    }

    pub fn find(&self, id: &str) -> Option<Event> {
        self.state.read().unwrap().events.iter().find(|e| e.id == id).cloned()
    }

    /// Drop entries whose `expires_at` has passed. Independent of the
    /// per-file/`max_size` archive-and-drop policy above.
    pub fn expire(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.write().unwrap();
        let before = state.events.len();
        state
            .events
            .retain(|e| e.expires_at.map(|exp| now < exp).unwrap_or(true));
        before - state.events.len()
    }

    /// Spawns the background TTL compactor at `CompactInterval`. Runs until
    /// the log itself is dropped (the task holds only a weak reference).
    pub fn spawn_compactor(self: &Arc<Self>, interval: Duration) {
        let log = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(log) = log.upgrade() else { break };
                let removed = log.expire();
                if removed > 0 {
                    debug!(removed, "ttl compaction removed expired events");
                }
            }
        });
    }
}

/// Computes recipients for a published event and forwards it over
/// per-agent pub/sub topics.
pub struct EventRouter {
    project: String,
    pubsub: Arc<dyn PubSub>,
    interests: Arc<InterestManager>,
    log: Arc<EventLog>,
    vector_store: Arc<VectorStore>,
    embedding_service: Option<Arc<dyn EmbeddingService>>,
    similarity_threshold: f32,
}

impl EventRouter {
    pub fn new(
        project: impl Into<String>,
        pubsub: Arc<dyn PubSub>,
        interests: Arc<InterestManager>,
        log: Arc<EventLog>,
        vector_store: Arc<VectorStore>,
    ) -> Self {
        Self {
            project: project.into(),
            pubsub,
            interests,
            log,
            vector_store,
            embedding_service: None,
            similarity_threshold: 0.75,
        }
    }

    pub fn with_embedding_service(mut self, embedding_service: Arc<dyn EmbeddingService>) -> Self {
        self.embedding_service = Some(embedding_service);
        self
    }

    /// Record the event, compute its recipient set, push to each recipient's
    /// channel, then (unlike `handle_remote_event`) broadcast it to peers on
    /// `/agent-collab/events` (spec §4.7 step 5).
    pub async fn publish(&self, event: Event) -> CoreResult<Vec<String>> {
        let recipients = self.deliver(event.clone()).await;
        self.pubsub.publish(&topics::events(), serde_json::to_value(&event)?).await?;
        Ok(recipients)
    }

    /// Apply an event received from a peer: same delivery as `publish`, but
    /// never re-broadcasts. The only way inbound events enter the log
    /// (spec §4.7).
    pub async fn handle_remote_event(&self, payload: Value) -> CoreResult<Vec<String>> {
        let event: Event = serde_json::from_value(payload)?;
        Ok(self.deliver(event).await)
    }

    async fn deliver(&self, event: Event) -> Vec<String> {
        self.log.append(event.clone());

        if let Some(vec) = &event.embedding {
            self.vector_store.upsert(&event.id, EVENT_COLLECTION, vec.clone());
        }

        // A broadcast (empty file_path) reaches every local subscriber
        // regardless of level; otherwise the interest manager's glob/level
        // rules decide (spec §4.7).
        let recipients = if event.is_broadcast() {
            self.interests.all_agent_ids()
        } else {
            self.interests.matching_agents(&event)
        };

        for agent_id in &recipients {
            let topic = format!("/agent-collab/{}/agent/{}/events", self.project, agent_id);
            if let Ok(value) = serde_json::to_value(&event) {
                let _ = self.pubsub.publish(&topic, value).await;
            }
        }

        recipients
    }

    /// Embeds `query`, searches the vector store's event collection, and
    /// resolves each hit's id back through the log, most similar first
    /// (spec §4.7 `SearchSimilar`).
    pub async fn search_similar(&self, query: &str, k: usize) -> CoreResult<Vec<Event>> {
        let Some(embedding_service) = &self.embedding_service else {
            return Ok(Vec::new());
        };
        let output = embedding_service
            .embed(query)
            .await
            .map_err(|e| crate::error::CoreError::EmbeddingError(e.to_string()))?;
        let hits = self
            .vector_store
            .search(EVENT_COLLECTION, &output.vector, self.similarity_threshold, k);
        Ok(hits.into_iter().filter_map(|(id, _score)| self.log.find(&id)).collect())
    }

    pub fn query(&self, q: &EventQuery) -> Vec<Event> {
        self.log.query(q)
    }

    /// Like `query`, but when `q.include_all` is false the results are
    /// intersected with `agent_id`'s own registered interests — only events
    /// that would actually have been routed to this agent are returned
    /// (spec §4.7).
    pub fn query_for_agent(&self, agent_id: &str, q: &EventQuery) -> Vec<Event> {
        let results = self.log.query(q);
        if q.include_all {
            return results;
        }
        results
            .into_iter()
            .filter(|e| e.source_id == agent_id || self.interests.matching_agents(e).iter().any(|a| a == agent_id))
            .collect()
    }
}
