//! FIFO work queue with coalescing, delayed requeue, and rate-limited
//! retries — the at-least-once reconciliation primitive every
//! [`crate::controller::Controller`] is built on.
//!
//! Grounded on the teacher's `AgentSystem` task queue
//! (`agents::system::AgentSystem`, a `Mutex`-protected queue woken by a
//! channel) but FIFO rather than priority-ordered: spec §4.2 specifies a
//! plain coalescing queue, not a priority heap.

pub mod rate_limiter;

use rate_limiter::RateLimiter;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

struct State {
    queue: VecDeque<String>,
    queued: HashSet<String>,
    processing: HashSet<String>,
    dirty: HashSet<String>,
    /// Active scheduled deadline per item, used by `add_after` to implement
    /// "shorter deadline wins, never extend".
    scheduled: std::collections::HashMap<String, Instant>,
    shutting_down: bool,
}

/// A coalescing, rate-limited FIFO queue of item names.
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl WorkQueue {
    pub fn new(rate_limiter: Arc<dyn RateLimiter>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                processing: HashSet::new(),
                dirty: HashSet::new(),
                scheduled: std::collections::HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            rate_limiter,
        })
    }

    /// Enqueue `item` immediately. A no-op if already queued; marks the item
    /// dirty (for exactly-one requeue on `done`) if it is mid-processing.
    pub fn add(&self, item: &str) {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down {
            return;
        }
        if state.processing.contains(item) {
            state.dirty.insert(item.to_string());
            return;
        }
        if state.queued.insert(item.to_string()) {
            state.queue.push_back(item.to_string());
            self.notify.notify_one();
        }
    }

    /// Schedule `add(item)` after `delay`. A later deadline never overrides
    /// an earlier one already scheduled for the same item; a shorter one
    /// reschedules it.
    pub fn add_after(self: &Arc<Self>, item: &str, delay: Duration) {
        let deadline = Instant::now() + delay;
        {
            let mut state = self.state.lock().unwrap();
            if let Some(existing) = state.scheduled.get(item) {
                if *existing <= deadline {
                    return;
                }
            }
            state.scheduled.insert(item.to_string(), deadline);
        }

        let this = Arc::clone(self);
        let item = item.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = this.state.lock().unwrap();
            if state.shutting_down {
                // Timer found the queue closed: drop it, per spec §9.
                state.scheduled.remove(&item);
                return;
            }
            // Only the timer matching the currently-active deadline may add;
            // a superseded (earlier) timer already fired and cleared this.
            if state.scheduled.get(&item) == Some(&deadline) {
                state.scheduled.remove(&item);
                drop(state);
                this.add(&item);
            }
        });
    }

    /// Consult the rate limiter for `item`'s next delay (`base * 2^failures`,
    /// capped), increment its failure count, and schedule the add.
    pub fn add_rate_limited(self: &Arc<Self>, item: &str) {
        let delay = self.rate_limiter.when(item);
        self.add_after(item, delay);
    }

    /// Reset `item`'s failure count without affecting its queue membership.
    pub fn forget(&self, item: &str) {
        self.rate_limiter.forget(item);
    }

    /// Block until an item is available, or the queue is shut down and
    /// drained. Returns `None` only once every remaining item has been
    /// delivered after shutdown.
    pub async fn get(&self) -> Option<String> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(item) = state.queue.pop_front() {
                    state.queued.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mandatory after every successful `get`. Re-enqueues the item exactly
    /// once if it was marked dirty while processing.
    pub fn done(&self, item: &str) {
        let mut state = self.state.lock().unwrap();
        state.processing.remove(item);
        if state.dirty.remove(item) {
            drop(state);
            self.add(item);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unblocks every pending `get`; subsequent `get`s drain remaining items
    /// then return `None`.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutting_down = true;
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().unwrap().shutting_down
    }
}
