//! Context sync-and-embed pipeline — spec §3.2 / §4.6.
//!
//! [`ContextPipelineController`] drives a `Context` through
//! `Pending -> Syncing -> Synced -> Embedding -> Ready`, or `Failed` if
//! embedding errors out. Cross-peer replication correctness is a non-goal
//! (SPEC_FULL.md §9: last-writer-wins by vector clock, no consensus), so
//! `Syncing -> Synced` only waits on local broadcast, not peer
//! acknowledgement quorum; acks that do arrive are recorded for observability
//! via [`run_ack_listener`].

pub mod embeddings;
pub mod vector_store;

use crate::clock::{ClockOrdering, VectorClock};
use crate::error::{CoreError, CoreResult};
use crate::event::EventRouter;
use crate::meta::ConditionStatus;
use crate::pubsub::{topics, PubSub};
use crate::resources::context::{Context, ContextAck, ContextPhase, ContextSyncMessage, EmbeddingInfo};
use crate::resources::event::{Event, EventType};
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use embeddings::EmbeddingService;
use std::sync::Arc;
use tracing::{debug, warn};
use vector_store::VectorStore;

use crate::controller::{ReconcileResult, Reconciler};

const CONTEXT_COLLECTION: &str = "context";

pub struct ContextPipelineController {
    project: String,
    local_agent_id: String,
    pubsub: Arc<dyn PubSub>,
    /// `None` when no embedding plugin is configured: `Synced` then
    /// short-circuits straight to `Ready` (SPEC_FULL.md §4.6).
    embedding_service: Option<Arc<dyn EmbeddingService>>,
    vector_store: Arc<VectorStore>,
    event_router: Option<Arc<EventRouter>>,
}

impl ContextPipelineController {
    pub fn new(
        project: impl Into<String>,
        local_agent_id: impl Into<String>,
        pubsub: Arc<dyn PubSub>,
        embedding_service: Option<Arc<dyn EmbeddingService>>,
        vector_store: Arc<VectorStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            project: project.into(),
            local_agent_id: local_agent_id.into(),
            pubsub,
            embedding_service,
            vector_store,
            event_router: None,
        })
    }

    /// Feed `ContextShared` events to the project's router so context
    /// updates participate in interest-gated routing alongside locks.
    pub fn with_event_router(mut self: Arc<Self>, router: Arc<EventRouter>) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_event_router called before sharing the controller")
            .event_router = Some(router);
        self
    }

    async fn emit_shared_event(&self, ctx: &Context) {
        let Some(router) = &self.event_router else { return };
        let event = Event::new(EventType::ContextShared, &self.local_agent_id, &self.local_agent_id)
            .with_file_path(ctx.spec.file_path.clone())
            .with_payload(serde_json::json!({ "context": ctx.name() }));
        if let Err(e) = router.publish(event).await {
            debug!(error = %e, context = %ctx.name(), "failed to publish context-shared event");
        }
    }
}

#[async_trait]
impl Reconciler<Context> for ContextPipelineController {
    async fn reconcile(&self, store: &Store<Context>, name: &str) -> Result<ReconcileResult, CoreError> {
        let mut ctx = match store.get(name).await {
            Ok(c) => c,
            Err(CoreError::NotFound(_)) => return Ok(ReconcileResult::done()),
            Err(e) => return Err(e),
        };

        let phase = ctx.status.phase.unwrap_or_default();
        match phase {
            ContextPhase::Pending => {
                ctx.spec.ensure_content_hash();
                ctx.spec
                    .vector_clock
                    .increment(&self.local_agent_id);
                let broadcast_locally_sourced = ctx.spec.source_agent_id == self.local_agent_id;
                ctx.status.phase = Some(ContextPhase::Syncing);
                let saved = store.update(ctx).await?;
                if broadcast_locally_sourced {
                    self.broadcast_sync(&saved).await?;
                    self.emit_shared_event(&saved).await;
                }
                Ok(ReconcileResult::requeue())
            }
            ContextPhase::Syncing => {
                ctx.status.phase = Some(ContextPhase::Synced);
                ctx.status.last_sync_time = Some(Utc::now());
                store.update(ctx).await?;
                Ok(ReconcileResult::requeue())
            }
            ContextPhase::Synced => {
                ctx.status.phase = if self.embedding_service.is_some() {
                    Some(ContextPhase::Embedding)
                } else {
                    Some(ContextPhase::Ready)
                };
                store.update(ctx).await?;
                Ok(ReconcileResult::requeue())
            }
            ContextPhase::Embedding => self.embed(store, ctx).await,
            ContextPhase::Ready | ContextPhase::Failed => Ok(ReconcileResult::done()),
        }
    }
}

impl ContextPipelineController {
    async fn broadcast_sync(&self, ctx: &Context) -> Result<(), CoreError> {
        let message = ContextSyncMessage {
            name: ctx.name().to_string(),
            content_hash: ctx.spec.content_hash.clone(),
            spec: ctx.spec.clone(),
            vector_clock: ctx.spec.vector_clock.clone(),
        };
        self.pubsub
            .publish(&topics::context(&self.project, "sync"), serde_json::to_value(&message)?)
            .await
    }

    async fn embed(&self, store: &Store<Context>, mut ctx: Context) -> Result<ReconcileResult, CoreError> {
        // `Synced` only routes here when an embedding service is configured.
        let Some(embedding_service) = self.embedding_service.as_ref() else {
            ctx.status.phase = Some(ContextPhase::Ready);
            store.update(ctx).await?;
            return Ok(ReconcileResult::done());
        };
        let text = ctx.spec.content.clone();
        match embedding_service.embed(&text).await {
            Ok(output) => {
                let document_id = ctx.name().to_string();
                self.vector_store.upsert(&document_id, CONTEXT_COLLECTION, output.vector);
                ctx.status.embedding = Some(EmbeddingInfo {
                    provider: output.provider,
                    model: output.model,
                    dimensions: output.dimensions,
                    embedded_at: Utc::now(),
                    collection_id: CONTEXT_COLLECTION.to_string(),
                    document_id,
                });
                ctx.status.phase = Some(ContextPhase::Ready);
                ctx.status.conditions.set(
                    "Embedded",
                    ConditionStatus::True,
                    "EmbeddingComplete",
                    "content embedded and indexed",
                );
                store.update(ctx).await?;
                Ok(ReconcileResult::done())
            }
            Err(e) => {
                ctx.status.phase = Some(ContextPhase::Failed);
                ctx.status.message = e.to_string();
                ctx.status.conditions.set(
                    "Embedded",
                    ConditionStatus::False,
                    "EmbeddingFailed",
                    &e.to_string(),
                );
                store.update(ctx).await?;
                warn!(error = %e, "context embedding failed");
                Ok(ReconcileResult::done())
            }
        }
    }
}

/// Apply peer `ContextAck`s to `synced_to`; observability only, does not
/// gate the `Syncing -> Synced` transition (see module docs).
pub async fn run_ack_listener(project: String, pubsub: Arc<dyn PubSub>, store: Arc<Store<Context>>) -> Result<(), CoreError> {
    let mut sub = pubsub.subscribe(&topics::context(&project, "ack")).await?;
    tokio::spawn(async move {
        while let Some(value) = sub.next().await {
            let ack: ContextAck = match serde_json::from_value(value) {
                Ok(a) => a,
                Err(e) => {
                    debug!(error = %e, "ignoring malformed context ack");
                    continue;
                }
            };
            if let Ok(mut ctx) = store.get(&ack.name).await {
                if !ctx.status.synced_to.iter().any(|s| s.agent_id == ack.agent_id) {
                    ctx.status.synced_to.push(crate::resources::context::SyncedTo {
                        agent_id: ack.agent_id,
                        synced_at: Utc::now(),
                        acknowledged: ack.acknowledged,
                    });
                    let _ = store.update(ctx).await;
                }
            }
        }
    });
    Ok(())
}

/// Subscribe to the project's context-sync topic and apply peer
/// `ContextSyncMessage`s: same name and `content_hash` acks and exits; a
/// differing hash resolves last-writer-wins by vector clock, surfacing a
/// `ConflictDetected` condition when the clocks are concurrent rather than
/// causally ordered (SPEC_FULL.md §9); an unknown name creates a new
/// `Context` in `Pending`. This is the only way inbound context syncs enter
/// the local store.
pub async fn run_sync_listener(
    project: String,
    local_agent_id: String,
    pubsub: Arc<dyn PubSub>,
    store: Arc<Store<Context>>,
    event_router: Option<Arc<EventRouter>>,
) -> CoreResult<()> {
    let mut sub = pubsub.subscribe(&topics::context(&project, "sync")).await?;
    tokio::spawn(async move {
        while let Some(value) = sub.next().await {
            let sync: ContextSyncMessage = match serde_json::from_value(value) {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, "ignoring malformed context sync");
                    continue;
                }
            };
            handle_context_sync(&pubsub, &store, &project, &local_agent_id, event_router.as_ref(), sync).await;
        }
    });
    Ok(())
}

async fn emit_shared_event_for(router: Option<&Arc<EventRouter>>, local_agent_id: &str, ctx: &Context) {
    let Some(router) = router else { return };
    let event = Event::new(EventType::ContextShared, local_agent_id, local_agent_id)
        .with_file_path(ctx.spec.file_path.clone())
        .with_payload(serde_json::json!({ "context": ctx.name() }));
    if let Err(e) = router.publish(event).await {
        debug!(error = %e, context = %ctx.name(), "failed to publish context-shared event");
    }
}

async fn handle_context_sync(
    pubsub: &Arc<dyn PubSub>,
    store: &Store<Context>,
    project: &str,
    local_agent_id: &str,
    event_router: Option<&Arc<EventRouter>>,
    sync: ContextSyncMessage,
) {
    match store.get(&sync.name).await {
        Ok(mut existing) => {
            if existing.spec.content_hash == sync.content_hash {
                send_ack(pubsub, project, &sync.name, local_agent_id, true).await;
                return;
            }
            match sync.vector_clock.compare(&existing.spec.vector_clock) {
                ClockOrdering::After => {
                    existing.spec = sync.spec;
                    existing.spec.vector_clock.merge(&sync.vector_clock);
                    existing.status.phase = Some(ContextPhase::Pending);
                    existing.status.conditions.set(
                        "ConflictDetected",
                        ConditionStatus::False,
                        "LastWriterWins",
                        "adopted a causally later sync",
                    );
                    if let Ok(saved) = store.update(existing).await {
                        emit_shared_event_for(event_router, local_agent_id, &saved).await;
                    }
                    send_ack(pubsub, project, &sync.name, local_agent_id, true).await;
                }
                ClockOrdering::Before | ClockOrdering::Equal => {
                    // Local copy is already at least as new; nothing to adopt.
                    send_ack(pubsub, project, &sync.name, local_agent_id, true).await;
                }
                ClockOrdering::Concurrent => {
                    existing.spec.vector_clock.merge(&sync.vector_clock);
                    existing.status.conditions.set(
                        "ConflictDetected",
                        ConditionStatus::True,
                        "ConcurrentWrite",
                        "peer sync diverged with a concurrent vector clock; keeping local content",
                    );
                    let _ = store.update(existing).await;
                    send_ack(pubsub, project, &sync.name, local_agent_id, false).await;
                }
            }
        }
        Err(CoreError::NotFound(_)) => {
            let mut ctx = Context::new(sync.name.clone(), sync.spec);
            ctx.spec.content_hash = sync.content_hash;
            match store.create(ctx).await {
                Ok(saved) => {
                    emit_shared_event_for(event_router, local_agent_id, &saved).await;
                    send_ack(pubsub, project, &sync.name, local_agent_id, true).await;
                }
                Err(_) => send_ack(pubsub, project, &sync.name, local_agent_id, false).await,
            }
        }
        Err(_) => {}
    }
}

async fn send_ack(pubsub: &Arc<dyn PubSub>, project: &str, name: &str, agent_id: &str, acknowledged: bool) {
    let ack = ContextAck {
        name: name.to_string(),
        agent_id: agent_id.to_string(),
        acknowledged,
    };
    if let Ok(value) = serde_json::to_value(&ack) {
        let _ = pubsub.publish(&topics::context(project, "ack"), value).await;
    }
}
