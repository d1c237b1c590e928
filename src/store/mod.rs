//! In-memory, thread-safe typed resource store with optimistic-concurrency
//! CRUD, label-selector queries, secondary indexes, and a watch stream.
//!
//! Generic over one resource kind `T` (spec §9's "polymorphism over resource
//! kinds", implemented as a compile-time generic rather than a runtime tagged
//! dispatcher since every kind this crate stores — Lock, Context, Agent — is
//! known ahead of time). Grounded on the teacher's `Arc<RwLock<HashMap<_>>>`
//! registries (`agents::system::AgentSystem`, `context::embeddings::VectorStore`),
//! generalized into one reusable store type.

pub mod index;
pub mod watch;

use crate::error::{CoreError, CoreResult};
use crate::meta::Resource;
use index::{Indexer, KeyFn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use watch::{WatchEvent, Watcher};

const DEFAULT_WATCH_BUFFER: usize = 100;

/// Options accepted by [`Store::list`] and [`Store::watch`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub label_selector: HashMap<String, String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub label_selector: HashMap<String, String>,
    pub send_initial_events: bool,
}

struct Inner<T> {
    objects: HashMap<String, T>,
    indexers: HashMap<String, Indexer<T>>,
}

struct WatcherEntry<T> {
    tx: mpsc::Sender<WatchEvent<T>>,
    label_selector: HashMap<String, String>,
}

/// A generic, thread-safe store for one resource kind.
pub struct Store<T: Resource> {
    data: RwLock<Inner<T>>,
    /// Watcher set is guarded separately from `data` to avoid priority
    /// inversion between a writer racing to publish and a reader registering
    /// a new watch, per spec §4.1's concurrency note.
    watchers: RwLock<HashMap<u64, WatcherEntry<T>>>,
    next_watcher_id: AtomicU64,
    version_counter: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
    watch_buffer: usize,
    stop_tx: mpsc::UnboundedSender<u64>,
    stop_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<u64>>,
}

impl<T: Resource> Store<T> {
    pub fn new() -> Arc<Self> {
        Self::with_watch_buffer(DEFAULT_WATCH_BUFFER)
    }

    pub fn with_watch_buffer(watch_buffer: usize) -> Arc<Self> {
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            data: RwLock::new(Inner {
                objects: HashMap::new(),
                indexers: HashMap::new(),
            }),
            watchers: RwLock::new(HashMap::new()),
            next_watcher_id: AtomicU64::new(0),
            version_counter: AtomicU64::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
            watch_buffer,
            stop_tx,
            stop_rx: tokio::sync::Mutex::new(stop_rx),
        })
    }

    fn check_closed(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CoreError::StoreClosed)
        } else {
            Ok(())
        }
    }

    fn next_version(&self) -> String {
        // Strictly monotonic across all mutations of the store (spec §4.1,
        // property 1 in §8): a single atomic counter backs every Create,
        // Update, and Delete.
        (self.version_counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub async fn create(&self, mut obj: T) -> CoreResult<T> {
        self.check_closed()?;
        let mut inner = self.data.write().await;
        let name = obj.name().to_string();
        if inner.objects.contains_key(&name) {
            return Err(CoreError::AlreadyExists(name));
        }
        obj.meta_mut().resource_version = self.next_version();
        obj.meta_mut().generation = 1;
        for indexer in inner.indexers.values_mut() {
            indexer.add(&name, &obj);
        }
        inner.objects.insert(name.clone(), obj.clone());
        drop(inner);
        self.notify(WatchEvent::Added(obj.clone())).await;
        Ok(obj)
    }

    pub async fn update(&self, mut obj: T) -> CoreResult<T> {
        self.check_closed()?;
        let mut inner = self.data.write().await;
        let name = obj.name().to_string();
        let existing = inner
            .objects
            .get(&name)
            .ok_or_else(|| CoreError::NotFound(name.clone()))?;

        let incoming_version = obj.meta().resource_version.clone();
        if !incoming_version.is_empty() && incoming_version != existing.meta().resource_version {
            return Err(CoreError::Conflict {
                name,
                expected: existing.meta().resource_version.clone(),
                actual: incoming_version,
            });
        }

        let old = existing.clone();
        obj.meta_mut().resource_version = self.next_version();
        if old.meta().labels != obj.meta().labels || spec_changed(&old, &obj) {
            obj.meta_mut().generation = old.meta().generation + 1;
        } else {
            obj.meta_mut().generation = old.meta().generation;
        }

        for indexer in inner.indexers.values_mut() {
            indexer.update(&name, &old, &obj);
        }
        inner.objects.insert(name, obj.clone());
        drop(inner);
        self.notify(WatchEvent::Modified(obj.clone())).await;
        Ok(obj)
    }

    pub async fn delete(&self, name: &str) -> CoreResult<T> {
        self.check_closed()?;
        let mut inner = self.data.write().await;
        let obj = inner
            .objects
            .remove(name)
            .ok_or_else(|| CoreError::NotFound(name.to_string()))?;
        for indexer in inner.indexers.values_mut() {
            indexer.remove(name, &obj);
        }
        drop(inner);
        self.notify(WatchEvent::Deleted(obj.clone())).await;
        Ok(obj)
    }

    pub async fn get(&self, name: &str) -> CoreResult<T> {
        self.check_closed()?;
        let inner = self.data.read().await;
        inner
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(name.to_string()))
    }

    pub async fn list(&self, opts: &ListOptions) -> CoreResult<Vec<T>> {
        self.check_closed()?;
        let inner = self.data.read().await;
        let mut results: Vec<T> = inner
            .objects
            .values()
            .filter(|o| o.meta().matches_labels(&opts.label_selector))
            .cloned()
            .collect();
        if let Some(limit) = opts.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    /// Register a new indexer under `name`, scanning existing objects to
    /// build its initial mapping. Fails if `name` is already registered.
    pub async fn add_indexer(&self, name: &str, key_fn: KeyFn<T>) -> CoreResult<()> {
        let mut inner = self.data.write().await;
        if inner.indexers.contains_key(name) {
            return Err(CoreError::IndexerAlreadyExists(name.to_string()));
        }
        let mut indexer = Indexer::new(key_fn);
        for (obj_name, obj) in inner.objects.iter() {
            indexer.add(obj_name, obj);
        }
        inner.indexers.insert(name.to_string(), indexer);
        Ok(())
    }

    pub async fn by_index(&self, name: &str, value: &str) -> CoreResult<Vec<T>> {
        let inner = self.data.read().await;
        let indexer = inner
            .indexers
            .get(name)
            .ok_or_else(|| CoreError::IndexNotFound(name.to_string()))?;
        let names = indexer.by_value(value);
        Ok(names
            .iter()
            .filter_map(|n| inner.objects.get(n).cloned())
            .collect())
    }

    pub async fn watch(&self, opts: WatchOptions) -> CoreResult<Watcher<T>> {
        self.check_closed()?;
        let (tx, rx) = mpsc::channel(self.watch_buffer);
        let id = self.next_watcher_id.fetch_add(1, Ordering::SeqCst);

        if opts.send_initial_events {
            let inner = self.data.read().await;
            for obj in inner.objects.values() {
                if obj.meta().matches_labels(&opts.label_selector) {
                    // Initial replay is best-effort against the bounded
                    // channel like any other delivery; a watcher that can't
                    // keep up should re-list.
                    let _ = tx.try_send(WatchEvent::Added(obj.clone()));
                }
            }
        }

        self.watchers.write().await.insert(
            id,
            WatcherEntry {
                tx,
                label_selector: opts.label_selector,
            },
        );

        Ok(Watcher {
            id,
            rx,
            stopped: false,
            stop_tx: Some(self.stop_tx.clone()),
        })
    }

    /// Drop any watchers that have called `stop()` since the last sweep.
    /// Called opportunistically around notification; idempotent.
    async fn reap_stopped(&self) {
        let mut stop_rx = self.stop_rx.lock().await;
        let mut ids = Vec::new();
        while let Ok(id) = stop_rx.try_recv() {
            ids.push(id);
        }
        drop(stop_rx);
        if !ids.is_empty() {
            let mut watchers = self.watchers.write().await;
            for id in ids {
                watchers.remove(&id);
            }
        }
    }

    async fn notify(&self, event: WatchEvent<T>) {
        self.reap_stopped().await;
        let watchers = self.watchers.read().await;
        for entry in watchers.values() {
            if entry
                .label_selector
                .is_empty() || event.object().meta().matches_labels(&entry.label_selector)
            {
                // Non-blocking: a full channel drops the event for that
                // watcher only, per spec §4.1.
                let _ = entry.tx.try_send(event.clone());
            }
        }
    }

    /// Close the store: reject further mutations and propagate closure to
    /// every live watcher (their channel is closed, `next()` returns `None`).
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut watchers = self.watchers.write().await;
        watchers.clear();
    }
}

fn spec_changed<T: Resource>(_old: &T, _new: &T) -> bool {
    // Generation tracking is a structural aid for controllers that want to
    // skip pure-status reconciles; without per-kind spec/status separation
    // visible to the store itself, conservatively treat every update as a
    // potential spec change. Kind-specific controllers compare their own
    // spec field when they need the distinction.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ObjectMeta;

    #[derive(Debug, Clone)]
    struct Widget {
        meta: ObjectMeta,
        color: String,
    }

    impl Resource for Widget {
        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }
    }

    fn widget(name: &str, color: &str) -> Widget {
        Widget {
            meta: ObjectMeta::new(name),
            color: color.to_string(),
        }
    }

    #[tokio::test]
    async fn create_assigns_version_and_emits_added() {
        let store = Store::new();
        let mut watcher = store
            .watch(WatchOptions::default())
            .await
            .unwrap();
        let created = store.create(widget("w1", "red")).await.unwrap();
        assert!(!created.meta.resource_version.is_empty());

        let ev = watcher.next().await.unwrap();
        match ev {
            WatchEvent::Added(w) => assert_eq!(w.meta.name, "w1"),
            _ => panic!("expected Added"),
        }
    }

    #[tokio::test]
    async fn create_twice_fails_already_exists() {
        let store = Store::new();
        store.create(widget("w1", "red")).await.unwrap();
        let err = store.create(widget("w1", "blue")).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_conflict_on_stale_version() {
        let store = Store::new();
        let created = store.create(widget("w1", "red")).await.unwrap();
        let mut stale = created.clone();
        stale.color = "green".to_string();
        // Advance the object once more so `created`'s version is now stale.
        let mut fresh = created.clone();
        fresh.color = "blue".to_string();
        store.update(fresh).await.unwrap();

        let err = store.update(stale).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn blind_update_with_empty_version_succeeds() {
        let store = Store::new();
        store.create(widget("w1", "red")).await.unwrap();
        let mut blind = widget("w1", "purple");
        blind.meta.resource_version = String::new();
        let updated = store.update(blind).await.unwrap();
        assert_eq!(updated.color, "purple");
    }

    #[tokio::test]
    async fn delete_emits_last_known_object() {
        let store = Store::new();
        let created = store.create(widget("w1", "red")).await.unwrap();
        let mut watcher = store.watch(WatchOptions::default()).await.unwrap();
        let deleted = store.delete("w1").await.unwrap();
        assert_eq!(deleted.meta.resource_version, created.meta.resource_version);
        match watcher.next().await.unwrap() {
            WatchEvent::Deleted(w) => assert_eq!(w.meta.name, "w1"),
            _ => panic!("expected Deleted"),
        }
    }

    #[tokio::test]
    async fn versions_strictly_increase_across_mutations() {
        let store = Store::new();
        let c1 = store.create(widget("w1", "red")).await.unwrap();
        let c2 = store.create(widget("w2", "blue")).await.unwrap();
        let v1: u64 = c1.meta.resource_version.parse().unwrap();
        let v2: u64 = c2.meta.resource_version.parse().unwrap();
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn indexer_rejects_duplicate_name() {
        let store = Store::new();
        store
            .add_indexer("by-color", Box::new(|w: &Widget| vec![w.color.clone()]))
            .await
            .unwrap();
        let err = store
            .add_indexer("by-color", Box::new(|w: &Widget| vec![w.color.clone()]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::IndexerAlreadyExists(_)));
    }

    #[tokio::test]
    async fn by_index_finds_matching_objects() {
        let store = Store::new();
        store
            .add_indexer("by-color", Box::new(|w: &Widget| vec![w.color.clone()]))
            .await
            .unwrap();
        store.create(widget("w1", "red")).await.unwrap();
        store.create(widget("w2", "red")).await.unwrap();
        store.create(widget("w3", "blue")).await.unwrap();

        let reds = store.by_index("by-color", "red").await.unwrap();
        assert_eq!(reds.len(), 2);
    }

    #[tokio::test]
    async fn watch_send_initial_events_then_live() {
        let store = Store::new();
        store.create(widget("w1", "red")).await.unwrap();

        let mut watcher = store
            .watch(WatchOptions {
                send_initial_events: true,
                ..Default::default()
            })
            .await
            .unwrap();

        match watcher.next().await.unwrap() {
            WatchEvent::Added(w) => assert_eq!(w.meta.name, "w1"),
            _ => panic!("expected initial Added"),
        }

        store.create(widget("w2", "blue")).await.unwrap();
        match watcher.next().await.unwrap() {
            WatchEvent::Added(w) => assert_eq!(w.meta.name, "w2"),
            _ => panic!("expected live Added"),
        }
    }

    #[tokio::test]
    async fn watcher_stop_is_idempotent_and_closes_channel() {
        let store = Store::new();
        let mut watcher = store.watch(WatchOptions::default()).await.unwrap();
        watcher.stop();
        watcher.stop();
        assert!(watcher.next().await.is_none());
    }

    #[tokio::test]
    async fn closed_store_rejects_mutations() {
        let store = Store::new();
        store.create(widget("w1", "red")).await.unwrap();
        store.close().await;
        let err = store.create(widget("w2", "blue")).await.unwrap_err();
        assert!(matches!(err, CoreError::StoreClosed));
    }
}
