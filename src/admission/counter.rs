//! Fixed-window counter state.

use std::fmt;
use std::time::{Duration, Instant};

use super::rules::RuleId;

/// Key identifying a counter: one per (rule, caller key) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The rule this counter enforces.
    pub rule: RuleId,
    /// The caller key, typically a client IP.
    pub key: String,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(rule: RuleId, key: &str) -> Self {
        Self {
            rule,
            key: key.to_string(),
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.rule, self.key)
    }
}

/// Attempt count within the current fixed window.
///
/// The window resets lazily: expiry is observed on the next [`record`] call,
/// never by a background timer. `window_start` only ever moves forward.
///
/// [`record`]: WindowCounter::record
#[derive(Debug)]
pub struct WindowCounter {
    window_start: Instant,
    count: u64,
}

impl WindowCounter {
    /// Create a counter with a window starting at `now` and no attempts.
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
        }
    }

    /// Record one attempt against the window, returning the pre-increment
    /// count.
    ///
    /// Resets the window first if it has expired. The attempt is counted
    /// whether or not the caller ends up admitting it, so retry storms do
    /// not earn back quota early.
    pub fn record(&mut self, now: Instant, window: Duration) -> u64 {
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.count = 0;
        }
        let before = self.count;
        self.count += 1;
        before
    }

    /// Attempts recorded in the current window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Time remaining until the current window expires.
    pub fn duration_until_reset(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.duration_since(self.window_start))
    }

    /// Whether this counter has gone untouched long enough to evict.
    pub fn is_stale(&self, now: Instant, max_age: Duration) -> bool {
        now.duration_since(self.window_start) >= max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(60_000);

    #[test]
    fn test_record_returns_pre_increment_count() {
        let t0 = Instant::now();
        let mut counter = WindowCounter::new(t0);

        assert_eq!(counter.record(t0, WINDOW), 0);
        assert_eq!(counter.record(t0, WINDOW), 1);
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let t0 = Instant::now();
        let mut counter = WindowCounter::new(t0);

        counter.record(t0, WINDOW);
        counter.record(t0 + Duration::from_millis(100), WINDOW);
        assert_eq!(counter.count(), 2);

        // First observation past the boundary starts a fresh window.
        assert_eq!(counter.record(t0 + WINDOW, WINDOW), 0);
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_window_survives_until_boundary() {
        let t0 = Instant::now();
        let mut counter = WindowCounter::new(t0);

        counter.record(t0, WINDOW);
        let just_before = t0 + WINDOW - Duration::from_millis(1);
        assert_eq!(counter.record(just_before, WINDOW), 1);
    }

    #[test]
    fn test_duration_until_reset() {
        let t0 = Instant::now();
        let counter = WindowCounter::new(t0);

        let at = t0 + Duration::from_millis(10_000);
        assert_eq!(
            counter.duration_until_reset(at, WINDOW),
            Duration::from_millis(50_000)
        );
        assert_eq!(counter.duration_until_reset(t0 + WINDOW, WINDOW), Duration::ZERO);
    }

    #[test]
    fn test_is_stale() {
        let t0 = Instant::now();
        let counter = WindowCounter::new(t0);
        let max_age = WINDOW * 2;

        assert!(!counter.is_stale(t0 + WINDOW, max_age));
        assert!(counter.is_stale(t0 + max_age, max_age));
    }
}
