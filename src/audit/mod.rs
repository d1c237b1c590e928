//! Delta/audit log — spec §3.6 / §4.8.
//!
//! In-memory ordered log of [`Delta`] records kept under both key schemas
//! from spec §3.6 (`by-source` for per-source range scans, `by-time` for
//! cluster-wide time range scans), plus [`AsyncDeltaLog`], a bounded-channel
//! front end that batches writes on a background task rather than taking the
//! write lock on every caller's hot path.
//!
//! Grounded on the teacher's `session::persistence::FileSystemPersistence`
//! (index + backing store split) and the coalescing-channel idiom from
//! [`crate::queue`], generalized to append-only records instead of mutable
//! per-key state. Durable on-disk encoding is out of scope (SPEC_FULL.md
//! Non-goals): this is the in-memory log a persistence layer would sit
//! behind.

use crate::clock::{ClockOrdering, VectorClock};
use crate::error::{CoreError, CoreResult};
use crate::resources::delta::Delta;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct State {
    /// Ordered by `(source_id, timestamp, id)` for per-source range scans.
    by_source: BTreeMap<(String, DateTime<Utc>, String), Delta>,
    /// Ordered by `(timestamp, source_id, id)` for cluster-wide range scans.
    by_time: BTreeMap<(DateTime<Utc>, String, String), Delta>,
}

/// Append-only, time-ordered store of [`Delta`] records.
pub struct DeltaLog {
    state: RwLock<State>,
    /// Ambient safety valve bounding memory when nothing ever calls
    /// `compact`; distinct from the spec's time-threshold `Compact`
    /// operation below.
    max_entries: usize,
}

impl DeltaLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: RwLock::new(State {
                by_source: BTreeMap::new(),
                by_time: BTreeMap::new(),
            }),
            max_entries,
        }
    }

    /// Two-put transaction: inserts into both key schemas (spec §4.8).
    pub fn save(&self, delta: Delta) {
        let mut state = self.state.write().unwrap();
        Self::insert(&mut state, delta);
        Self::enforce_cap_locked(&mut state, self.max_entries);
    }

    pub fn save_batch(&self, deltas: Vec<Delta>) {
        let mut state = self.state.write().unwrap();
        for delta in deltas {
            Self::insert(&mut state, delta);
        }
        Self::enforce_cap_locked(&mut state, self.max_entries);
    }

    fn insert(state: &mut State, delta: Delta) {
        state.by_source.insert(delta.by_source_key(), delta.clone());
        state.by_time.insert(delta.by_time_key(), delta);
    }

    /// Scans the primary (`by-source`) key space, comparing each stored
    /// delta's vector clock against `clock` and including those that are
    /// `HappensAfter` or `Concurrent` with it (spec §4.8 `GetSince`).
    pub fn get_since(&self, clock: &VectorClock) -> Vec<Delta> {
        let state = self.state.read().unwrap();
        state
            .by_source
            .values()
            .filter(|d| matches!(d.vector_clock.compare(clock), ClockOrdering::After | ClockOrdering::Concurrent))
            .cloned()
            .collect()
    }

    /// Scans the `by-time` index for deltas (any source) with timestamp in
    /// `[start, end]`, oldest first (spec §4.8 `GetRange`).
    pub fn get_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Delta> {
        let state = self.state.read().unwrap();
        state
            .by_time
            .values()
            .filter(|d| d.timestamp >= start && d.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Deletes both primary and index keys strictly older than `before`,
    /// returning the count removed (spec §4.8 `Compact`).
    pub fn compact(&self, before: DateTime<Utc>) -> usize {
        let mut state = self.state.write().unwrap();
        let stale: Vec<Delta> = state
            .by_source
            .values()
            .filter(|d| d.timestamp < before)
            .cloned()
            .collect();
        for delta in &stale {
            state.by_source.remove(&delta.by_source_key());
            state.by_time.remove(&delta.by_time_key());
        }
        stale.len()
    }

    /// Drops the oldest entries past `max_entries`, an ambient bound
    /// independent of `compact`'s time-threshold semantics. Called
    /// automatically after every write.
    fn enforce_cap_locked(state: &mut State, max_entries: usize) {
        while state.by_source.len() > max_entries {
            let Some(oldest_key) = state.by_source.keys().next().cloned() else {
                break;
            };
            if let Some(delta) = state.by_source.remove(&oldest_key) {
                state.by_time.remove(&delta.by_time_key());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded-channel front end for [`DeltaLog`]: callers push without waiting
/// on the write lock, a single background task drains the channel in
/// batches. Mirrors the queue's "never block the producer" posture.
pub struct AsyncDeltaLog {
    tx: mpsc::Sender<Delta>,
}

impl AsyncDeltaLog {
    /// Spawns the background writer. `batch_size` caps how many deltas are
    /// flushed to `log` per drain iteration.
    pub fn spawn(log: std::sync::Arc<DeltaLog>, channel_capacity: usize, batch_size: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(channel_capacity);
        tokio::spawn(async move {
            let mut batch = Vec::with_capacity(batch_size);
            loop {
                let received = rx.recv().await;
                let Some(first) = received else { break };
                batch.push(first);
                while batch.len() < batch_size {
                    match rx.try_recv() {
                        Ok(d) => batch.push(d),
                        Err(_) => break,
                    }
                }
                debug!(count = batch.len(), "flushing delta batch");
                log.save_batch(std::mem::take(&mut batch));
            }
            warn!("delta log writer stopped: channel closed");
        });
        Self { tx }
    }

    pub async fn push(&self, delta: Delta) -> CoreResult<()> {
        self.tx
            .try_send(delta)
            .map_err(|_| CoreError::Internal("delta log writer channel is full or has shut down".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VectorClock;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    fn delta(source: &str) -> Delta {
        Delta::new(source, VectorClock::new(), json!({"op": "noop"}))
    }

    #[test]
    fn get_since_includes_after_and_concurrent_but_not_before_or_equal() {
        let log = DeltaLog::new(100);
        let mut baseline = VectorClock::new();
        baseline.increment("agent-a");

        let stale = delta("agent-a");
        log.save(stale);

        let mut equal = delta("agent-a");
        equal.vector_clock = baseline.clone();
        log.save(equal);

        let mut after = delta("agent-a");
        after.vector_clock = baseline.clone();
        after.vector_clock.increment("agent-a");
        log.save(after.clone());

        let mut concurrent = delta("agent-b");
        concurrent.vector_clock = VectorClock::new();
        concurrent.vector_clock.increment("agent-b");
        log.save(concurrent.clone());

        let results = log.get_since(&baseline);
        let ids: Vec<&str> = results.iter().map(|d| d.id.as_str()).collect();
        assert!(ids.contains(&after.id.as_str()));
        assert!(ids.contains(&concurrent.id.as_str()));
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn get_range_scans_by_time_index_oldest_first() {
        let log = DeltaLog::new(100);
        let start = Utc::now();
        log.save(delta("agent-a"));
        log.save(delta("agent-b"));
        log.save(delta("agent-a"));
        let end = Utc::now() + chrono::Duration::seconds(1);

        let results = log.get_range(start, end);
        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn compact_removes_entries_strictly_older_than_threshold_from_both_indexes() {
        let log = DeltaLog::new(100);
        for _ in 0..5 {
            log.save(delta("agent-a"));
        }
        let threshold = Utc::now() + chrono::Duration::seconds(1);
        for _ in 0..5 {
            log.save(delta("agent-b"));
        }

        let removed = log.compact(threshold);
        assert_eq!(removed, 5);
        assert_eq!(log.len(), 5);
        assert!(log.get_range(Utc::now() - chrono::Duration::minutes(1), Utc::now() + chrono::Duration::minutes(1))
            .iter()
            .all(|d| d.source_id == "agent-b"));
    }

    #[test]
    fn compaction_drops_oldest_past_cap() {
        let log = DeltaLog::new(3);
        for _ in 0..5 {
            log.save(delta("agent-a"));
        }
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn async_log_batches_writes_to_backing_log() {
        let log = Arc::new(DeltaLog::new(100));
        let async_log = AsyncDeltaLog::spawn(Arc::clone(&log), 16, 4);
        for _ in 0..6 {
            async_log.push(delta("agent-a")).await.unwrap();
        }
        sleep(Duration::from_millis(30)).await;
        assert_eq!(log.len(), 6);
    }
}
