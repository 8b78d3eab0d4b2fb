//! Retry delays of failing reconciles: capped exponential backoff with equal jitter, per object.
use common::passwordhandler::jitter;
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy)]
struct Failures {
    count: u32,
    last: Instant,
}

/// Entries are dropped on success, on cleanup, or once they stayed untouched for
/// twice the cap (the object is gone or stopped failing).
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    failures: Mutex<HashMap<String, Failures>>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Failures>> {
        match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Upper bound of the delay after `failures` consecutive failures
    pub fn ceiling(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Record one more failure of `key` and return the delay before its retry
    pub fn next_delay(&self, key: &str) -> Duration {
        let now = Instant::now();
        let stale = self.cap.saturating_mul(2);
        let failures = {
            let mut map = self.lock();
            map.retain(|k, f| k == key || now.duration_since(f.last) < stale);
            let entry = map.entry(key.to_string()).or_insert(Failures { count: 0, last: now });
            let current = entry.count;
            entry.count = entry.count.saturating_add(1);
            entry.last = now;
            current
        };
        let ceiling = self.ceiling(failures).as_millis() as u64;
        let half = ceiling / 2;
        Duration::from_millis(half + jitter(ceiling - half))
    }

    /// Forget the failures of `key` after a successful reconcile or a cleanup
    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.lock().get(key).map_or(0, |f| f.count)
    }

    pub fn tracked(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_and_stay_capped() {
        let b = Backoff::default();
        for n in 0..12u32 {
            let d = b.next_delay("ns/ws1");
            let ceiling = b.ceiling(n);
            assert!(d <= ceiling, "{d:?} > {ceiling:?}");
            assert!(d >= ceiling / 2, "{d:?} < half of {ceiling:?}");
        }
        assert_eq!(b.ceiling(0), Duration::from_secs(5));
        assert_eq!(b.ceiling(3), Duration::from_secs(40));
        assert_eq!(b.ceiling(40), Duration::from_secs(300));
    }

    #[test]
    fn test_keys_are_independent_and_reset() {
        let b = Backoff::default();
        b.next_delay("a");
        b.next_delay("a");
        b.next_delay("b");
        assert_eq!(b.failures("a"), 2);
        assert_eq!(b.failures("b"), 1);
        b.reset("a");
        assert_eq!(b.failures("a"), 0);
        assert!(b.next_delay("a") <= Duration::from_secs(5));
    }

    #[test]
    fn test_stale_keys_are_forgotten() {
        let b = Backoff::new(Duration::from_millis(1), Duration::from_millis(5));
        b.next_delay("ns/deleted");
        b.next_delay("ns/deleted");
        std::thread::sleep(Duration::from_millis(20));
        b.next_delay("ns/other");
        assert_eq!(b.failures("ns/deleted"), 0);
        assert_eq!(b.failures("ns/other"), 1);
        assert_eq!(b.tracked(), 1);
    }
}
