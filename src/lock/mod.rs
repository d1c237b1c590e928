//! Distributed lock state machine — spec §3.1 / §4.4.
//!
//! [`LockController`] drives each `Lock` this node owns through
//! `Pending -> Negotiating -> Active -> Releasing -> Released`, or
//! `Negotiating -> Failed` / `Active -> Expired` on the losing paths. A lock
//! "belongs" to this node when `spec.holder_id` matches the controller's own
//! `local_holder_id`; locks mirroring another peer's acquisition carry a
//! different holder and are left alone by reconcile (their status only ever
//! moves by whatever wrote the mirror), matching the "remote acquisitions are
//! advisory, non-authoritative mirrors" resolution in SPEC_FULL.md §9.
//!
//! Grounded on the teacher's `agents::orchestrator` coordination pattern
//! (propose -> wait -> commit/abort) generalized onto [`crate::controller::Reconciler`].

use crate::error::{CoreError, CoreResult};
use crate::event::EventRouter;
use crate::meta::ConditionStatus;
use crate::pubsub::{topics, PubSub};
use crate::queue::WorkQueue;
use crate::resources::event::{Event, EventType};
use crate::resources::lock::{
    targets_overlap, ConflictingLock, Lock, LockAcquisition, LockIntent, LockPhase, LockRelease, LockSpec,
};
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::controller::{ReconcileResult, Reconciler};

/// How long a lock stays `Negotiating` before conflicts are judged settled.
const DEFAULT_NEGOTIATION_WINDOW: Duration = Duration::from_millis(500);

/// Drives the lock state machine for every `Lock` this node originates.
pub struct LockController {
    project: String,
    local_holder_id: String,
    pubsub: Arc<dyn PubSub>,
    event_router: Option<Arc<EventRouter>>,
    fencing_counter: Arc<AtomicU64>,
    negotiation_window: Duration,
    negotiation_started: Mutex<HashMap<String, Instant>>,
}

impl LockController {
    pub fn new(project: impl Into<String>, local_holder_id: impl Into<String>, pubsub: Arc<dyn PubSub>) -> Arc<Self> {
        Arc::new(Self {
            project: project.into(),
            local_holder_id: local_holder_id.into(),
            pubsub,
            event_router: None,
            fencing_counter: Arc::new(AtomicU64::new(0)),
            negotiation_window: DEFAULT_NEGOTIATION_WINDOW,
            negotiation_started: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_negotiation_window(mut self: Arc<Self>, window: Duration) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_negotiation_window called before sharing the controller")
            .negotiation_window = window;
        self
    }

    /// Feed `LockAcquired`/`LockReleased`/`LockConflict` events to the
    /// project's router so locks participate in interest-gated routing
    /// (spec §2's controllers-feed-the-event-router data flow).
    pub fn with_event_router(mut self: Arc<Self>, router: Arc<EventRouter>) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_event_router called before sharing the controller")
            .event_router = Some(router);
        self
    }

    async fn emit_event(&self, type_: EventType, lock: &Lock) {
        let Some(router) = &self.event_router else { return };
        let event = Event::new(type_, &self.local_holder_id, &self.local_holder_id)
            .with_file_path(lock.spec.target.file_path().to_string())
            .with_payload(serde_json::json!({ "lock": lock.name() }));
        if let Err(e) = router.publish(event).await {
            debug!(error = %e, lock = %lock.name(), "failed to publish lock event");
        }
    }

    fn owns(&self, lock: &Lock) -> bool {
        lock.spec.holder_id == self.local_holder_id
    }

    fn next_fencing_token(&self) -> u64 {
        self.fencing_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn publish_intent(&self, lock: &Lock) -> CoreResult<()> {
        let intent = LockIntent {
            lock_name: lock.name().to_string(),
            holder_id: lock.spec.holder_id.clone(),
            target: lock.spec.target.clone(),
            intention: lock.spec.intention.clone(),
            priority: lock.spec.priority,
            timestamp: Utc::now(),
        };
        self.pubsub
            .publish(&topics::lock(&self.project, "intent"), serde_json::to_value(&intent)?)
            .await
    }

    async fn publish_acquisition(&self, lock: &Lock) -> CoreResult<()> {
        let acquisition = LockAcquisition {
            lock_name: lock.name().to_string(),
            holder_id: lock.spec.holder_id.clone(),
            target: lock.spec.target.clone(),
            fencing_token: lock.status.fencing_token,
            acquired_at: lock.status.acquired_at.unwrap_or_else(Utc::now),
            expires_at: lock.status.expires_at.unwrap_or_else(Utc::now),
        };
        self.pubsub
            .publish(
                &topics::lock(&self.project, "acquired"),
                serde_json::to_value(&acquisition)?,
            )
            .await
    }

    async fn publish_release(&self, lock: &Lock) -> CoreResult<()> {
        let release = LockRelease {
            lock_name: lock.name().to_string(),
            holder_id: lock.spec.holder_id.clone(),
            released_at: Utc::now(),
        };
        self.pubsub
            .publish(&topics::lock(&self.project, "released"), serde_json::to_value(&release)?)
            .await
    }

    /// Subscribe to peer intent/release broadcasts and feed conflicts back
    /// into the store, waking reconcile via `queue`. Call once after
    /// `Controller::run`; runs until the pub/sub subscription closes.
    pub async fn run_conflict_listener(self: Arc<Self>, store: Arc<Store<Lock>>, queue: Arc<WorkQueue>) -> CoreResult<()> {
        let mut intents = self.pubsub.subscribe(&topics::lock(&self.project, "intent")).await?;
        let mut releases = self.pubsub.subscribe(&topics::lock(&self.project, "released")).await?;
        let mut acquisitions = self.pubsub.subscribe(&topics::lock(&self.project, "acquired")).await?;

        let this = Arc::clone(&self);
        let intent_store = Arc::clone(&store);
        let intent_queue = Arc::clone(&queue);
        tokio::spawn(async move {
            while let Some(value) = intents.next().await {
                let intent: LockIntent = match serde_json::from_value(value) {
                    Ok(i) => i,
                    Err(e) => {
                        debug!(error = %e, "ignoring malformed lock intent");
                        continue;
                    }
                };
                this.handle_peer_intent(&intent_store, &intent_queue, intent).await;
            }
        });

        let acquisition_this = Arc::clone(&self);
        let acquisition_store = Arc::clone(&store);
        tokio::spawn(async move {
            while let Some(value) = acquisitions.next().await {
                let acquisition: LockAcquisition = match serde_json::from_value(value) {
                    Ok(a) => a,
                    Err(e) => {
                        debug!(error = %e, "ignoring malformed lock acquisition");
                        continue;
                    }
                };
                acquisition_this.handle_peer_acquisition(&acquisition_store, acquisition).await;
            }
        });

        tokio::spawn(async move {
            while let Some(value) = releases.next().await {
                let release: LockRelease = match serde_json::from_value(value) {
                    Ok(r) => r,
                    Err(e) => {
                        debug!(error = %e, "ignoring malformed lock release");
                        continue;
                    }
                };
                self.handle_peer_release(&store, &queue, release).await;
            }
        });

        Ok(())
    }

    /// A peer acquired a lock: persist it as a non-authoritative mirror so
    /// local queries can see who holds what, without ever feeding this
    /// node's own fencing counter (SPEC_FULL.md §9: remote acquisition
    /// accounting is advisory only).
    async fn handle_peer_acquisition(&self, store: &Store<Lock>, acquisition: LockAcquisition) {
        if acquisition.holder_id == self.local_holder_id {
            return;
        }
        match store.get(&acquisition.lock_name).await {
            Ok(mut existing) => {
                if self.owns(&existing) {
                    return;
                }
                existing.spec.holder_id = acquisition.holder_id.clone();
                existing.spec.target = acquisition.target.clone();
                existing.status.phase = Some(LockPhase::Active);
                existing.status.fencing_token = acquisition.fencing_token;
                existing.status.acquired_at = Some(acquisition.acquired_at);
                existing.status.expires_at = Some(acquisition.expires_at);
                let _ = store.update(existing).await;
            }
            Err(CoreError::NotFound(_)) => {
                let ttl = (acquisition.expires_at - acquisition.acquired_at)
                    .to_std()
                    .unwrap_or_default();
                let mut mirror = Lock::new(
                    acquisition.lock_name.clone(),
                    LockSpec {
                        target: acquisition.target.clone(),
                        holder_id: acquisition.holder_id.clone(),
                        intention: String::new(),
                        ttl,
                        priority: 0,
                        exclusive: true,
                    },
                );
                mirror.meta.labels.insert("mirror".to_string(), "true".to_string());
                mirror.status.phase = Some(LockPhase::Active);
                mirror.status.fencing_token = acquisition.fencing_token;
                mirror.status.acquired_at = Some(acquisition.acquired_at);
                mirror.status.expires_at = Some(acquisition.expires_at);
                if store.create(mirror).await.is_ok() {
                    debug!(lock = %acquisition.lock_name, "created mirror lock from peer acquisition");
                }
            }
            Err(_) => {}
        }
    }

    /// A peer is contending for a target. Any of our own non-terminal locks
    /// whose target overlaps get the conflict recorded and are re-queued so
    /// reconcile re-evaluates them against the (possibly now-widened)
    /// conflict set.
    async fn handle_peer_intent(&self, store: &Store<Lock>, queue: &WorkQueue, intent: LockIntent) {
        if intent.holder_id == self.local_holder_id {
            return;
        }
        let locks = match store.list(&Default::default()).await {
            Ok(l) => l,
            Err(_) => return,
        };
        for lock in locks {
            if !self.owns(&lock) || lock.status.phase.unwrap_or_default().is_terminal() {
                continue;
            }
            if !targets_overlap(&lock.spec.target, &intent.target) {
                continue;
            }
            let mut updated = lock.clone();
            if updated
                .status
                .conflicting_locks
                .iter()
                .any(|c| c.name == intent.lock_name)
            {
                continue;
            }
            updated.status.conflicting_locks.push(ConflictingLock {
                name: intent.lock_name.clone(),
                holder: intent.holder_id.clone(),
                target: intent.target.clone(),
            });
            let name = updated.name().to_string();
            if let Ok(saved) = store.update(updated).await {
                self.emit_event(EventType::LockConflict, &saved).await;
                queue.add(&name);
            }
        }
    }

    /// A peer released (or lost) a contending lock: drop it from any of our
    /// locks' conflict lists and re-queue them, they may now be free to settle.
    async fn handle_peer_release(&self, store: &Store<Lock>, queue: &WorkQueue, release: LockRelease) {
        let locks = match store.list(&Default::default()).await {
            Ok(l) => l,
            Err(_) => return,
        };
        for lock in locks {
            if !self.owns(&lock) {
                continue;
            }
            if !lock
                .status
                .conflicting_locks
                .iter()
                .any(|c| c.name == release.lock_name)
            {
                continue;
            }
            let mut updated = lock.clone();
            updated
                .status
                .conflicting_locks
                .retain(|c| c.name != release.lock_name);
            let name = updated.name().to_string();
            if store.update(updated).await.is_ok() {
                queue.add(&name);
            }
        }
    }
}

#[async_trait]
impl Reconciler<Lock> for LockController {
    async fn reconcile(&self, store: &Store<Lock>, name: &str) -> Result<ReconcileResult, CoreError> {
        let lock = match store.get(name).await {
            Ok(l) => l,
            Err(CoreError::NotFound(_)) => return Ok(ReconcileResult::done()),
            Err(e) => return Err(e),
        };

        if !self.owns(&lock) {
            // A mirror of another peer's lock: nothing for this node to drive.
            return Ok(ReconcileResult::done());
        }

        let phase = lock.status.phase.unwrap_or_default();
        if phase.is_terminal() {
            self.negotiation_started.lock().unwrap().remove(name);
            return Ok(ReconcileResult::done());
        }

        match phase {
            LockPhase::Pending => self.start_negotiating(store, lock).await,
            LockPhase::Negotiating => self.continue_negotiating(store, lock).await,
            LockPhase::Active | LockPhase::Releasing => self.drive_active(store, lock, phase).await,
            LockPhase::Released | LockPhase::Expired | LockPhase::Failed => unreachable!("handled above"),
        }
    }
}

impl LockController {
    async fn start_negotiating(&self, store: &Store<Lock>, mut lock: Lock) -> Result<ReconcileResult, CoreError> {
        self.negotiation_started
            .lock()
            .unwrap()
            .insert(lock.name().to_string(), Instant::now());
        lock.status.phase = Some(LockPhase::Negotiating);
        lock.status.conditions.set(
            "Negotiating",
            ConditionStatus::True,
            "IntentBroadcast",
            "broadcasting lock intent to peers",
        );
        let saved = store.update(lock).await?;
        self.publish_intent(&saved).await?;
        Ok(ReconcileResult::requeue_after(self.negotiation_window))
    }

    async fn continue_negotiating(&self, store: &Store<Lock>, mut lock: Lock) -> Result<ReconcileResult, CoreError> {
        let started = self
            .negotiation_started
            .lock()
            .unwrap()
            .get(lock.name())
            .copied()
            .unwrap_or_else(Instant::now);
        let elapsed = started.elapsed();
        if elapsed < self.negotiation_window {
            return Ok(ReconcileResult::requeue_after(self.negotiation_window - elapsed));
        }

        self.negotiation_started.lock().unwrap().remove(lock.name());

        if lock.status.conflicting_locks.is_empty() {
            let now = Utc::now();
            lock.status.phase = Some(LockPhase::Active);
            lock.status.fencing_token = self.next_fencing_token();
            lock.status.acquired_at = Some(now);
            lock.status.expires_at = Some(now + chrono::Duration::from_std(lock.spec.ttl).unwrap_or_else(|_| chrono::Duration::zero()));
            lock.status.last_renewed_at = Some(now);
            lock.status.conditions.set(
                "Acquired",
                ConditionStatus::True,
                "NoConflicts",
                "negotiation window elapsed with no surviving conflicts",
            );
            let saved = store.update(lock).await?;
            self.publish_acquisition(&saved).await?;
            self.emit_event(EventType::LockAcquired, &saved).await;
            info!(lock = %saved.name(), fencing_token = saved.status.fencing_token, "lock acquired");
            let ttl = saved
                .status
                .expires_at
                .map(|exp| (exp - Utc::now()).to_std().unwrap_or_default())
                .unwrap_or(lock_ttl_fallback());
            Ok(ReconcileResult::requeue_after(ttl))
        } else {
            lock.status.phase = Some(LockPhase::Failed);
            lock.status.message = format!("{} conflicting lock(s) at negotiation deadline", lock.status.conflicting_locks.len());
            lock.status.conditions.set(
                "Acquired",
                ConditionStatus::False,
                "Conflict",
                &lock.status.message.clone(),
            );
            let saved = store.update(lock).await?;
            self.emit_event(EventType::LockConflict, &saved).await;
            Ok(ReconcileResult::done())
        }
    }

    async fn drive_active(&self, store: &Store<Lock>, mut lock: Lock, phase: LockPhase) -> Result<ReconcileResult, CoreError> {
        let now = Utc::now();
        let expired = lock.status.expires_at.map(|exp| now >= exp).unwrap_or(false);

        if expired {
            lock.status.phase = Some(LockPhase::Expired);
            lock.status.conditions.set(
                "Acquired",
                ConditionStatus::False,
                "Expired",
                "ttl elapsed without renewal",
            );
            let saved = store.update(lock).await?;
            self.publish_release(&saved).await?;
            self.emit_event(EventType::LockReleased, &saved).await;
            warn!(lock = %saved.name(), "lock expired");
            return Ok(ReconcileResult::done());
        }

        if phase == LockPhase::Releasing {
            lock.status.phase = Some(LockPhase::Released);
            lock.status.conditions.set(
                "Acquired",
                ConditionStatus::False,
                "Released",
                "holder requested release",
            );
            let saved = store.update(lock).await?;
            self.publish_release(&saved).await?;
            self.emit_event(EventType::LockReleased, &saved).await;
            return Ok(ReconcileResult::done());
        }

        let remaining = lock
            .status
            .expires_at
            .map(|exp| (exp - now).to_std().unwrap_or_default())
            .unwrap_or(lock_ttl_fallback());
        Ok(ReconcileResult::requeue_after(remaining))
    }
}

fn lock_ttl_fallback() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_pipeline::vector_store::VectorStore;
    use crate::event::{EventLog, EventLogOptions};
    use crate::interest::InterestManager;
    use crate::pubsub::LocalPubSub;
    use crate::resources::event::EventQuery;
    use crate::resources::lock::{LockSpec, LockTarget};
    use tokio::time::{sleep, Duration as TokioDuration};

    fn lock_spec(holder: &str, path: &str) -> LockSpec {
        LockSpec {
            target: LockTarget::File {
                file_path: path.to_string(),
            },
            holder_id: holder.to_string(),
            intention: "edit".to_string(),
            ttl: Duration::from_secs(60),
            priority: 0,
            exclusive: true,
        }
    }

    #[tokio::test]
    async fn uncontended_lock_reaches_active() {
        let store = Store::<Lock>::new();
        let pubsub = LocalPubSub::new();
        let controller = LockController::new("proj", "agent-a", pubsub).with_negotiation_window(Duration::from_millis(10));

        let created = store.create(Lock::new("l1", lock_spec("agent-a", "a.rs"))).await.unwrap();

        let r1 = controller.reconcile(&store, created.name()).await.unwrap();
        assert!(r1.requeue_after.is_some());
        let negotiating = store.get("l1").await.unwrap();
        assert_eq!(negotiating.status.phase, Some(LockPhase::Negotiating));

        sleep(TokioDuration::from_millis(15)).await;
        controller.reconcile(&store, "l1").await.unwrap();
        let active = store.get("l1").await.unwrap();
        assert_eq!(active.status.phase, Some(LockPhase::Active));
        assert!(active.status.fencing_token > 0);
    }

    #[tokio::test]
    async fn conflicting_lock_fails_after_window() {
        let store = Store::<Lock>::new();
        let pubsub = LocalPubSub::new();
        let controller = LockController::new("proj", "agent-a", pubsub).with_negotiation_window(Duration::from_millis(10));

        store.create(Lock::new("l1", lock_spec("agent-a", "a.rs"))).await.unwrap();
        controller.reconcile(&store, "l1").await.unwrap();

        let mut negotiating = store.get("l1").await.unwrap();
        negotiating.status.conflicting_locks.push(ConflictingLock {
            name: "l-remote".to_string(),
            holder: "agent-b".to_string(),
            target: LockTarget::File {
                file_path: "a.rs".to_string(),
            },
        });
        store.update(negotiating).await.unwrap();

        sleep(TokioDuration::from_millis(15)).await;
        controller.reconcile(&store, "l1").await.unwrap();
        let failed = store.get("l1").await.unwrap();
        assert_eq!(failed.status.phase, Some(LockPhase::Failed));
    }

    #[tokio::test]
    async fn peer_acquisition_creates_advisory_mirror_lock() {
        let store = Store::<Lock>::new();
        let pubsub = LocalPubSub::new();
        let controller = LockController::new("proj", "agent-a", pubsub);

        let now = Utc::now();
        controller
            .handle_peer_acquisition(
                &store,
                LockAcquisition {
                    lock_name: "l-remote".to_string(),
                    holder_id: "agent-b".to_string(),
                    target: LockTarget::File {
                        file_path: "a.rs".to_string(),
                    },
                    fencing_token: 7,
                    acquired_at: now,
                    expires_at: now + chrono::Duration::seconds(30),
                },
            )
            .await;

        let mirror = store.get("l-remote").await.unwrap();
        assert_eq!(mirror.status.phase, Some(LockPhase::Active));
        assert_eq!(mirror.status.fencing_token, 7);
        assert_eq!(mirror.meta.labels.get("mirror"), Some(&"true".to_string()));
        // A mirror never feeds this node's own fencing counter.
        assert_eq!(controller.next_fencing_token(), 1);
    }

    #[tokio::test]
    async fn acquiring_a_lock_emits_a_lock_acquired_event() {
        let store = Store::<Lock>::new();
        let pubsub = LocalPubSub::new();
        let log = Arc::new(EventLog::new(EventLogOptions::default()));
        let router = Arc::new(EventRouter::new(
            "proj",
            Arc::clone(&pubsub) as Arc<dyn PubSub>,
            Arc::new(InterestManager::new()),
            Arc::clone(&log),
            Arc::new(VectorStore::new()),
        ));
        let controller = LockController::new("proj", "agent-a", pubsub)
            .with_negotiation_window(Duration::from_millis(10))
            .with_event_router(router);

        store.create(Lock::new("l1", lock_spec("agent-a", "a.rs"))).await.unwrap();
        controller.reconcile(&store, "l1").await.unwrap();
        sleep(TokioDuration::from_millis(15)).await;
        controller.reconcile(&store, "l1").await.unwrap();

        let events = log.query(&EventQuery {
            types: Some(vec![EventType::LockAcquired]),
            ..Default::default()
        });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].file_path.as_deref(), Some("a.rs"));
    }

    #[tokio::test]
    async fn mirrored_remote_lock_is_left_alone() {
        let store = Store::<Lock>::new();
        let pubsub = LocalPubSub::new();
        let controller = LockController::new("proj", "agent-a", pubsub);

        store.create(Lock::new("l1", lock_spec("agent-b", "a.rs"))).await.unwrap();
        let result = controller.reconcile(&store, "l1").await.unwrap();
        assert!(!result.requeue);
        assert!(result.requeue_after.is_none());
        let unchanged = store.get("l1").await.unwrap();
        assert_eq!(unchanged.status.phase, Some(LockPhase::Pending));
    }
}
