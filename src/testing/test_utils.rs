//! Async test helpers: polling assertions and timed subscription reads.
//!
//! Grounded on the teacher's `testing::test_utils` (`TestContext`,
//! timeout-bounded waits around async state), trimmed to the two shapes this
//! crate's controller tests actually need: "wait until a predicate over
//! store state holds" and "collect up to N pub/sub messages within a
//! deadline".

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Poll `predicate` every `interval` until it returns `true` or `deadline`
/// elapses. Returns `false` on timeout rather than panicking, so callers can
/// attach their own assertion message.
pub async fn wait_until<F, Fut>(deadline: Duration, interval: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if predicate().await {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        sleep(interval).await;
    }
}

/// Read up to `count` messages off a [`crate::pubsub::Subscription`],
/// stopping early if the deadline elapses or the channel closes.
pub async fn collect_messages(sub: &mut crate::pubsub::Subscription, count: usize, deadline: Duration) -> Vec<serde_json::Value> {
    let mut out = Vec::with_capacity(count);
    let _ = timeout(deadline, async {
        while out.len() < count {
            match sub.next().await {
                Some(v) => out.push(v),
                None => break,
            }
        }
    })
    .await;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::{LocalPubSub, PubSub};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn wait_until_returns_true_once_predicate_flips() {
        let flag = Arc::new(AtomicUsize::new(0));
        let flag_writer = Arc::clone(&flag);
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            flag_writer.store(1, Ordering::SeqCst);
        });

        let ok = wait_until(Duration::from_millis(500), Duration::from_millis(5), || {
            let flag = Arc::clone(&flag);
            async move { flag.load(Ordering::SeqCst) == 1 }
        })
        .await;
        assert!(ok);
    }

    #[tokio::test]
    async fn wait_until_times_out_on_a_predicate_that_never_holds() {
        let ok = wait_until(Duration::from_millis(30), Duration::from_millis(5), || async { false }).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn collect_messages_stops_at_count() {
        let pubsub = LocalPubSub::new();
        let mut sub = pubsub.subscribe("topic").await.unwrap();
        for i in 0..3 {
            pubsub.publish("topic", serde_json::json!(i)).await.unwrap();
        }
        let messages = collect_messages(&mut sub, 2, Duration::from_millis(200)).await;
        assert_eq!(messages.len(), 2);
    }
}
