//! Rate limiters consulted by [`super::WorkQueue::add_rate_limited`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Computes how long to delay the next add for an item that just failed.
pub trait RateLimiter: Send + Sync {
    fn when(&self, item: &str) -> Duration;
    fn forget(&self, item: &str);
}

/// `base_delay * 2^failures`, capped at `max_delay`.
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }
}

impl RateLimiter for ExponentialBackoff {
    fn when(&self, item: &str) -> Duration {
        let mut failures = self.failures.lock().unwrap();
        let count = failures.entry(item.to_string()).or_insert(0);
        let exp = *count;
        *count += 1;

        let delay = self
            .base_delay
            .checked_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX))
            .unwrap_or(self.max_delay);
        std::cmp::min(delay, self.max_delay)
    }

    fn forget(&self, item: &str) {
        self.failures.lock().unwrap().remove(item);
    }
}

/// Takes the maximum delay across several limiters — the "max-of" compound
/// limiter from spec §4.2.
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self, item: &str) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(item))
            .max()
            .unwrap_or_default()
    }

    fn forget(&self, item: &str) {
        for l in &self.limiters {
            l.forget(item);
        }
    }
}
