//! Watch events and watcher handles for [`super::Store`].

use crate::meta::Resource;
use tokio::sync::mpsc;

/// A single watch notification.
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T: Resource> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

/// A live handle to a store subscription.
///
/// Delivery never blocks the writer: the channel is bounded, and a full
/// channel silently drops the event for this watcher only (the watcher
/// should reconcile via a fresh `List`/`Watch(send_initial_events=true)` on
/// reconnection, per spec §4.1).
pub struct Watcher<T> {
    pub(crate) id: u64,
    pub(crate) rx: mpsc::Receiver<WatchEvent<T>>,
    pub(crate) stopped: bool,
    pub(crate) stop_tx: Option<mpsc::UnboundedSender<u64>>,
}

impl<T> Watcher<T> {
    pub async fn next(&mut self) -> Option<WatchEvent<T>> {
        if self.stopped {
            return None;
        }
        self.rx.recv().await
    }

    /// Idempotent: calling `stop` more than once is a no-op.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.rx.close();
        if let Some(tx) = &self.stop_tx {
            let _ = tx.send(self.id);
        }
    }
}

impl<T> Drop for Watcher<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
