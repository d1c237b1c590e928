//! Cache layer on top of a [`Store`]/watch pair with periodic resync and
//! delta delivery, so multiple consumers can read a local cache instead of
//! each issuing their own `List`.

use crate::error::CoreResult;
use crate::meta::Resource;
use crate::store::watch::WatchEvent;
use crate::store::{ListOptions, Store, WatchOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// A delta delivered to informer subscribers: what changed, derived either
/// from the live watch stream or from a periodic resync diff.
#[derive(Debug, Clone)]
pub enum Delta<T: Resource> {
    Added(T),
    Updated(T),
    Deleted(T),
}

pub struct Informer<T: Resource> {
    store: Arc<Store<T>>,
    cache: RwLock<HashMap<String, T>>,
    subscribers: RwLock<Vec<mpsc::Sender<Delta<T>>>>,
    resync_interval: Duration,
}

impl<T: Resource> Informer<T> {
    pub fn new(store: Arc<Store<T>>, resync_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            store,
            cache: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            resync_interval,
        })
    }

    pub async fn subscribe(&self) -> mpsc::Receiver<Delta<T>> {
        let (tx, rx) = mpsc::channel(100);
        self.subscribers.write().await.push(tx);
        rx
    }

    async fn publish(&self, delta: Delta<T>) {
        let subs = self.subscribers.read().await;
        for tx in subs.iter() {
            let _ = tx.try_send(delta.clone());
        }
    }

    pub async fn get(&self, name: &str) -> Option<T> {
        self.cache.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<T> {
        self.cache.read().await.values().cloned().collect()
    }

    /// Run the cache: seed from an initial list, stream live watch events
    /// into the cache and out to subscribers, and periodically resync by
    /// re-listing the store and diffing against the cache (catching
    /// mutations that arrived while a watcher's buffer was full and
    /// silently dropped an event, per spec §4.1).
    pub async fn run(self: &Arc<Self>) -> CoreResult<()> {
        let initial = self.store.list(&ListOptions::default()).await?;
        {
            let mut cache = self.cache.write().await;
            for obj in initial {
                cache.insert(obj.name().to_string(), obj);
            }
        }

        let mut watcher = self
            .store
            .watch(WatchOptions {
                send_initial_events: false,
                ..Default::default()
            })
            .await?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = watcher.next().await {
                this.apply(event).await;
            }
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.resync_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = this.resync().await {
                    debug!(error = %e, "informer resync failed");
                }
            }
        });

        Ok(())
    }

    async fn apply(&self, event: WatchEvent<T>) {
        let mut cache = self.cache.write().await;
        match event {
            WatchEvent::Added(obj) => {
                cache.insert(obj.name().to_string(), obj.clone());
                drop(cache);
                self.publish(Delta::Added(obj)).await;
            }
            WatchEvent::Modified(obj) => {
                cache.insert(obj.name().to_string(), obj.clone());
                drop(cache);
                self.publish(Delta::Updated(obj)).await;
            }
            WatchEvent::Deleted(obj) => {
                cache.remove(obj.name());
                drop(cache);
                self.publish(Delta::Deleted(obj)).await;
            }
        }
    }

    async fn resync(&self) -> CoreResult<()> {
        let fresh = self.store.list(&ListOptions::default()).await?;
        let fresh_names: std::collections::HashSet<String> =
            fresh.iter().map(|o| o.name().to_string()).collect();

        let mut cache = self.cache.write().await;
        let stale: Vec<String> = cache
            .keys()
            .filter(|n| !fresh_names.contains(*n))
            .cloned()
            .collect();
        for name in stale {
            if let Some(obj) = cache.remove(&name) {
                drop(cache);
                self.publish(Delta::Deleted(obj)).await;
                cache = self.cache.write().await;
            }
        }

        for obj in fresh {
            let changed = cache
                .get(obj.name())
                .map(|existing| existing.meta().resource_version != obj.meta().resource_version)
                .unwrap_or(true);
            if changed {
                cache.insert(obj.name().to_string(), obj.clone());
                drop(cache);
                self.publish(Delta::Updated(obj)).await;
                cache = self.cache.write().await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ObjectMeta;

    #[derive(Debug, Clone)]
    struct Widget {
        meta: ObjectMeta,
    }

    impl Resource for Widget {
        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }
    }

    #[tokio::test]
    async fn informer_caches_initial_list_and_live_updates() {
        let store = Store::new();
        store
            .create(Widget {
                meta: ObjectMeta::new("w1"),
            })
            .await
            .unwrap();

        let informer = Informer::new(Arc::clone(&store), Duration::from_secs(30));
        informer.run().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(informer.get("w1").await.is_some());

        store
            .create(Widget {
                meta: ObjectMeta::new("w2"),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(informer.get("w2").await.is_some());
    }
}
