//! Reconcile-loop driver: watches a store, enqueues names, dispatches to a
//! reconciler with panic recovery.
//!
//! Grounded on the teacher's worker-pool dispatch pattern
//! (`agents::orchestrator`, `agents::system::AgentSystem`'s task-processing
//! loop) generalized to the generic `Store<T>`/`WorkQueue` pair built above.

pub mod informer;

use crate::error::CoreError;
use crate::meta::Resource;
use crate::queue::rate_limiter::{ExponentialBackoff, RateLimiter};
use crate::queue::WorkQueue;
use crate::store::{Store, WatchOptions};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// What a reconciler wants to happen next to the item it just processed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileResult {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    pub fn requeue_after(d: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: Some(d),
        }
    }
}

/// Implemented by whatever drives one resource kind toward its desired
/// state. `reconcile` reads the named object from the store, compares
/// spec/status, performs observable effects, and writes status back.
#[async_trait]
pub trait Reconciler<T: Resource>: Send + Sync {
    async fn reconcile(&self, store: &Store<T>, name: &str) -> Result<ReconcileResult, CoreError>;
}

#[derive(Clone)]
pub struct ControllerOptions {
    pub name: String,
    pub max_concurrent_reconciles: usize,
    pub recover_panic: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            name: "controller".to_string(),
            max_concurrent_reconciles: 1,
            recover_panic: true,
        }
    }
}

/// Owns one store (of one kind), a reconciler, and a work queue.
pub struct Controller<T: Resource> {
    store: Arc<Store<T>>,
    queue: Arc<WorkQueue>,
    reconciler: Arc<dyn Reconciler<T>>,
    options: ControllerOptions,
}

impl<T: Resource> Controller<T> {
    pub fn new(
        store: Arc<Store<T>>,
        reconciler: Arc<dyn Reconciler<T>>,
        options: ControllerOptions,
    ) -> Arc<Self> {
        let limiter: Arc<dyn RateLimiter> = Arc::new(ExponentialBackoff::default());
        Arc::new(Self {
            store,
            queue: WorkQueue::new(limiter),
            reconciler,
            options,
        })
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Start the controller: open the initial watch, spawn the watcher
    /// feeder task, and spawn `max_concurrent_reconciles` worker tasks.
    /// Returns immediately; call `shutdown` to stop.
    pub async fn run(self: &Arc<Self>) -> Result<(), CoreError> {
        let mut watcher = self
            .store
            .watch(WatchOptions {
                send_initial_events: true,
                ..Default::default()
            })
            .await?;

        let queue = self.queue();
        let name = self.options.name.clone();
        tokio::spawn(async move {
            while let Some(event) = watcher.next().await {
                queue.add(event.object().name());
            }
            info!(controller = %name, "watch stream closed");
        });

        for worker_id in 0..self.options.max_concurrent_reconciles.max(1) {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.worker_loop(worker_id).await;
            });
        }

        Ok(())
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        loop {
            let item = match self.queue.get().await {
                Some(item) => item,
                None => break,
            };
            self.dispatch(&item).await;
            self.queue.done(&item);
        }
        info!(controller = %self.options.name, worker_id, "worker stopped");
    }

    async fn dispatch(self: &Arc<Self>, name: &str) {
        let reconcile_fut = self.reconciler.reconcile(&self.store, name);

        let outcome = if self.options.recover_panic {
            match AssertUnwindSafe(reconcile_fut).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic);
                    error!(controller = %self.options.name, item = name, %message, "reconcile panicked");
                    Err(CoreError::ReconcilePanic(message))
                }
            }
        } else {
            reconcile_fut.await
        };

        match outcome {
            Err(e) => {
                warn!(controller = %self.options.name, item = name, error = %e, "reconcile failed, requeueing");
                self.queue.add_rate_limited(name);
            }
            Ok(ReconcileResult {
                requeue: false,
                requeue_after: None,
            }) => {
                self.queue.forget(name);
            }
            Ok(ReconcileResult {
                requeue: true,
                requeue_after: _,
            }) => {
                self.queue.forget(name);
                self.queue.add(name);
            }
            Ok(ReconcileResult {
                requeue: false,
                requeue_after: Some(d),
            }) => {
                self.queue.forget(name);
                self.queue.add_after(name, d);
            }
        }
    }

    /// Stop accepting new work; workers drain the queue then exit.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
