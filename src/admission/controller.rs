//! Core admission controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::counter::{CounterKey, WindowCounter};
use super::rules::RuleSet;

/// The outcome of an admission check.
///
/// Admission never fails: every call produces either an allowance or a
/// rejection with a retry hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allowed,
    /// The request exceeded its quota.
    Rejected {
        /// Whole seconds until the window resets, rounded up.
        retry_after_secs: u64,
        /// The matched rule's rejection message.
        message: String,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Seam between the admission core and the serving layer.
///
/// Synchronous on purpose: admission never suspends or performs I/O.
pub trait AdmissionPolicy: Send + Sync {
    /// Decide whether the request identified by `key` on `path` may proceed.
    ///
    /// Callers must supply a non-empty key, substituting a constant
    /// placeholder for unidentifiable callers.
    fn admit(&self, key: &str, path: &str, now: Instant) -> Decision;

    /// Feedback hook invoked after the request completes.
    ///
    /// Reserved for adaptive variants; the fixed-window controller ignores
    /// it.
    fn on_response(&self, _key: &str, _path: &str) {}
}

/// Tracks per-key attempt counts over fixed windows and enforces quotas.
///
/// The controller exclusively owns all counter state. It is thread-safe and
/// meant to be shared behind an `Arc`; concurrent admits for the same key are
/// serialized by that key's own lock, never by a global one.
pub struct AdmissionController {
    rules: RuleSet,
    /// Counter per (rule, key). The map shards its own locks and each entry
    /// carries a mutex, so unrelated keys never contend.
    counters: DashMap<CounterKey, Arc<Mutex<WindowCounter>>>,
}

impl AdmissionController {
    /// Create a controller enforcing the given rules.
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            counters: DashMap::new(),
        }
    }

    /// Decide whether the request identified by `key` on `path` may proceed.
    ///
    /// Selects the governing rule by longest-prefix match, then records the
    /// attempt against that (rule, key) counter as one atomic unit: expiry
    /// check, read, increment. Rejected attempts are counted too.
    pub fn admit(&self, key: &str, path: &str, now: Instant) -> Decision {
        let (rule_id, rule) = self.rules.match_path(path);
        let counter_key = CounterKey::new(rule_id, key);

        trace!(counter = %counter_key, path = %path, "checking admission");

        // Clone the slot out so the map shard is released before the
        // per-key critical section. A sweep may evict the slot in between;
        // a counter that stale would reset on record anyway, so the
        // decision is unaffected.
        let slot = {
            let entry = self
                .counters
                .entry(counter_key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(WindowCounter::new(now))));
            Arc::clone(entry.value())
        };

        let mut counter = slot.lock();
        let before = counter.record(now, rule.window);
        if before < rule.max_requests {
            return Decision::Allowed;
        }
        let remaining = counter.duration_until_reset(now, rule.window);
        drop(counter);

        // Rejection logging is the caller's concern; the controller only
        // answers with a structured decision.
        Decision::Rejected {
            retry_after_secs: remaining.as_millis().div_ceil(1000) as u64,
            message: rule.rejection_message.clone(),
        }
    }

    /// Evict counters older than twice their rule's window.
    ///
    /// Returns the number of counters removed. Safe to run while requests
    /// are in flight; the map shards its locks, so the sweep never stalls
    /// unrelated admits.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.counters.len();

        self.counters.retain(|key, slot| {
            let Some(rule) = self.rules.get(key.rule) else {
                return false;
            };
            !slot.lock().is_stale(now, rule.window * 2)
        });

        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            debug!(removed, remaining = self.counters.len(), "swept stale counters");
        }
        removed
    }

    /// Spawn the periodic eviction sweep on its own task.
    ///
    /// Bounds memory growth from one-off or rotating keys. Abort the handle
    /// at shutdown.
    pub fn run_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                controller.sweep(Instant::now());
            }
        })
    }

    /// The rules this controller enforces.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Number of live counters.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Drop all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

impl AdmissionPolicy for AdmissionController {
    fn admit(&self, key: &str, path: &str, now: Instant) -> Decision {
        AdmissionController::admit(self, key, path, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::rules::Rule;

    fn rule(pattern: &str, window_ms: u64, max_requests: u64) -> Rule {
        Rule::new(
            pattern,
            Duration::from_millis(window_ms),
            max_requests,
            "too many requests",
        )
        .unwrap()
    }

    fn controller(rules: Vec<Rule>) -> AdmissionController {
        AdmissionController::new(RuleSet::new(rules, rule("", 900_000, 100)))
    }

    #[test]
    fn test_admits_up_to_quota() {
        let ctl = controller(vec![rule("/api/", 60_000, 5)]);
        let t0 = Instant::now();

        for _ in 0..5 {
            assert!(ctl.admit("1.2.3.4", "/api/orders", t0).is_allowed());
        }
    }

    #[test]
    fn test_rejects_past_quota_with_retry_hint() {
        let ctl = controller(vec![rule("/api/", 60_000, 2)]);
        let t0 = Instant::now();

        ctl.admit("1.2.3.4", "/api/orders", t0);
        ctl.admit("1.2.3.4", "/api/orders", t0);

        let decision = ctl.admit("1.2.3.4", "/api/orders", t0 + Duration::from_millis(500));
        match decision {
            Decision::Rejected {
                retry_after_secs,
                message,
            } => {
                // 59500ms remain, rounded up to whole seconds.
                assert_eq!(retry_after_secs, 60);
                assert_eq!(message, "too many requests");
            }
            Decision::Allowed => panic!("third request should be rejected"),
        }
    }

    #[test]
    fn test_window_reset_restores_quota() {
        let ctl = controller(vec![rule("/api/", 60_000, 1)]);
        let t0 = Instant::now();

        assert!(ctl.admit("1.2.3.4", "/api/orders", t0).is_allowed());
        assert!(!ctl
            .admit("1.2.3.4", "/api/orders", t0 + Duration::from_millis(1))
            .is_allowed());

        // The window expired, so the exhausted key is admitted again.
        let later = t0 + Duration::from_millis(60_000);
        assert!(ctl.admit("1.2.3.4", "/api/orders", later).is_allowed());
    }

    #[test]
    fn test_payment_burst_scenario() {
        let ctl = controller(vec![rule("/api/v1/payment/", 60_000, 3)]);
        let t0 = Instant::now();
        let at = |ms: u64| t0 + Duration::from_millis(ms);
        let admit = |now| ctl.admit("1.2.3.4", "/api/v1/payment/charge", now);

        assert!(admit(at(0)).is_allowed());
        assert!(admit(at(10)).is_allowed());
        assert!(admit(at(20)).is_allowed());
        assert!(!admit(at(30)).is_allowed());
        // Still inside the same window: rejected attempts stay rejected and
        // keep counting against the quota.
        assert!(!admit(at(1_000)).is_allowed());
        assert!(admit(at(60_000)).is_allowed());
    }

    #[test]
    fn test_keys_do_not_interfere() {
        let ctl = controller(vec![rule("/api/", 60_000, 1)]);
        let t0 = Instant::now();

        assert!(ctl.admit("1.2.3.4", "/api/orders", t0).is_allowed());
        assert!(!ctl.admit("1.2.3.4", "/api/orders", t0).is_allowed());
        assert!(ctl.admit("5.6.7.8", "/api/orders", t0).is_allowed());
    }

    #[test]
    fn test_longest_prefix_selects_specific_rule() {
        let ctl = controller(vec![
            rule("/api/v1/auth/", 900_000, 5),
            rule("/api/v1/", 60_000, 60),
        ]);
        let t0 = Instant::now();

        for _ in 0..5 {
            assert!(ctl.admit("1.2.3.4", "/api/v1/auth/login", t0).is_allowed());
        }
        // The auth rule's quota of 5 applies, not the generic 60.
        assert!(!ctl.admit("1.2.3.4", "/api/v1/auth/login", t0).is_allowed());
        // The generic prefix keeps its own, separate counter.
        assert!(ctl.admit("1.2.3.4", "/api/v1/products", t0).is_allowed());
    }

    #[test]
    fn test_unmatched_path_uses_default_rule() {
        let ctl = controller(vec![rule("/api/", 60_000, 1)]);
        let t0 = Instant::now();

        for _ in 0..100 {
            assert!(ctl.admit("1.2.3.4", "/static/logo.png", t0).is_allowed());
        }
        assert!(!ctl.admit("1.2.3.4", "/static/logo.png", t0).is_allowed());
    }

    #[test]
    fn test_concurrent_admits_never_exceed_quota() {
        let ctl = Arc::new(controller(vec![rule("/api/", 60_000, 50)]));
        let t0 = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let ctl = Arc::clone(&ctl);
            handles.push(std::thread::spawn(move || {
                ctl.admit("1.2.3.4", "/api/orders", t0).is_allowed()
            }));
        }

        let allowed = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(allowed, 50);
    }

    #[test]
    fn test_sweep_evicts_only_stale_counters() {
        let ctl = controller(vec![rule("/api/", 60_000, 10)]);
        let t0 = Instant::now();

        ctl.admit("old", "/api/orders", t0);
        ctl.admit("fresh", "/api/orders", t0 + Duration::from_millis(100_000));
        assert_eq!(ctl.counter_count(), 2);

        // "old" is past 2x its window; "fresh" is not.
        let removed = ctl.sweep(t0 + Duration::from_millis(120_000));
        assert_eq!(removed, 1);
        assert_eq!(ctl.counter_count(), 1);
    }

    #[test]
    fn test_clear_drops_all_counters() {
        let ctl = controller(vec![rule("/api/", 60_000, 10)]);
        ctl.admit("1.2.3.4", "/api/orders", Instant::now());
        assert_eq!(ctl.counter_count(), 1);

        ctl.clear();
        assert_eq!(ctl.counter_count(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_task_runs_periodically() {
        let ctl = Arc::new(controller(vec![rule("/api/", 10, 10)]));
        ctl.admit("1.2.3.4", "/api/orders", Instant::now());

        let sweeper = ctl.run_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.abort();

        assert_eq!(ctl.counter_count(), 0);
    }
}
