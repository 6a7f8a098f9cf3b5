use super::clock::{Clock, SystemClock};
use super::store::{CounterStore, MemoryStore};
use super::sweeper::Sweeper;
use super::types::{counter_key, GuardResult, Policy};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default interval between counter sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Fixed-window rate limiter.
///
/// Counters reset to zero at window boundaries rather than decaying, so up to
/// roughly `2 * max_requests` requests can pass in quick succession across a
/// boundary.
#[derive(Debug)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    sweeper: Sweeper,
}

impl RateLimiter {
    /// Create a limiter backed by a fresh in-memory store and the wall clock
    pub fn in_memory() -> Self {
        info!("Initializing in-memory rate limiter");
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            DEFAULT_SWEEP_INTERVAL,
        )
    }

    /// Create a limiter over an explicit store, clock and sweep interval
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            sweeper: Sweeper::new(sweep_interval),
        }
    }

    /// Count one request for `identifier` in `bucket` and decide whether it may proceed
    pub fn check_and_consume(
        &self,
        identifier: &str,
        bucket: &str,
        policy: &Policy,
    ) -> Result<GuardResult> {
        policy.validate()?;
        self.sweeper.ensure_started(&self.store, &self.clock);

        let key = counter_key(bucket, identifier);
        let now = self.clock.now_ms();
        let hit = self.store.hit(&key, policy, now)?;

        if hit.counted {
            let remaining = policy.max_requests.saturating_sub(hit.entry.count);
            debug!(key = %key, remaining, "Rate limit check passed");
            return Ok(GuardResult::allowed(
                policy.max_requests,
                remaining,
                hit.entry.window_reset_at,
            ));
        }

        let wait_ms = hit.entry.window_reset_at.saturating_sub(now);
        // A full window that closes this very millisecond still asks for one second
        let retry_after_secs = wait_ms.div_ceil(1000).max(1);

        warn!(key = %key, retry_after_secs, "Rate limit exceeded");
        Ok(GuardResult::denied(
            policy.max_requests,
            hit.entry.window_reset_at,
            retry_after_secs,
        ))
    }

    /// Run one sweep immediately, returning the number of expired counters removed
    pub fn sweep_now(&self) -> usize {
        self.store.sweep(self.clock.now_ms())
    }

    /// Whether the background sweeper is running
    pub fn is_sweeper_running(&self) -> bool {
        self.sweeper.is_running()
    }

    /// Stop the background sweeper
    pub fn shutdown(&self) {
        self.sweeper.shutdown();
    }

    /// Number of live counters (for monitoring)
    pub fn active_counters(&self) -> usize {
        self.store.len()
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdmissionError;
    use crate::rate_limit::clock::ManualClock;
    use crate::rate_limit::types::CounterHit;

    fn limiter_with_clock() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let limiter = RateLimiter::new(
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
            DEFAULT_SWEEP_INTERVAL,
        );
        (limiter, clock)
    }

    #[test]
    fn test_remaining_counts_down_then_denies() {
        let (limiter, _) = limiter_with_clock();
        let policy = Policy::new(5, 60).unwrap();

        for expected in (0..5).rev() {
            let result = limiter
                .check_and_consume("192.168.1.1", "general", &policy)
                .unwrap();
            assert!(result.allowed);
            assert_eq!(result.remaining, expected);
            assert_eq!(result.limit, 5);
        }

        let result = limiter
            .check_and_consume("192.168.1.1", "general", &policy)
            .unwrap();
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert!(result.retry_after_secs > 0 && result.retry_after_secs <= 60);
    }

    #[test]
    fn test_retry_after_tracks_elapsed_time() {
        let (limiter, clock) = limiter_with_clock();
        let policy = Policy::new(1, 60).unwrap();

        limiter.check_and_consume("a", "auth", &policy).unwrap();
        clock.advance(Duration::from_millis(20_500));

        let result = limiter.check_and_consume("a", "auth", &policy).unwrap();
        assert!(!result.allowed);
        assert_eq!(result.retry_after_secs, 40);
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let (limiter, clock) = limiter_with_clock();
        let policy = Policy::new(1, 1).unwrap();

        limiter.check_and_consume("a", "auth", &policy).unwrap();
        // Exactly at the window boundary the entry is still live
        clock.advance(Duration::from_secs(1));

        let result = limiter.check_and_consume("a", "auth", &policy).unwrap();
        assert!(!result.allowed);
        assert_eq!(result.retry_after_secs, 1);
    }

    #[test]
    fn test_full_reset_after_window() {
        let (limiter, clock) = limiter_with_clock();
        let policy = Policy::new(3, 10).unwrap();

        for _ in 0..4 {
            limiter.check_and_consume("a", "general", &policy).unwrap();
        }

        clock.advance(Duration::from_millis(10_001));

        let result = limiter.check_and_consume("a", "general", &policy).unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 2);
    }

    #[test]
    fn test_keys_are_isolated() {
        let (limiter, _) = limiter_with_clock();
        let policy = Policy::new(2, 60).unwrap();

        for _ in 0..3 {
            limiter.check_and_consume("A", "auth", &policy).unwrap();
        }
        assert!(!limiter.check_and_consume("A", "auth", &policy).unwrap().allowed);

        assert!(limiter.check_and_consume("B", "auth", &policy).unwrap().allowed);
        assert!(limiter.check_and_consume("A", "general", &policy).unwrap().allowed);
        assert_eq!(limiter.active_counters(), 3);
    }

    #[test]
    fn test_fixed_window_boundary_burst() {
        let (limiter, clock) = limiter_with_clock();
        let policy = Policy::new(5, 60).unwrap();

        // Burst at the end of one window...
        clock.advance(Duration::from_secs(1));
        for _ in 0..5 {
            assert!(limiter.check_and_consume("a", "general", &policy).unwrap().allowed);
        }

        // ...and again right after it closes
        clock.advance(Duration::from_millis(60_001));
        for _ in 0..5 {
            assert!(limiter.check_and_consume("a", "general", &policy).unwrap().allowed);
        }
    }

    #[test]
    fn test_invalid_policy_is_refused() {
        let (limiter, _) = limiter_with_clock();
        let zero_quota = Policy {
            max_requests: 0,
            window_secs: 60,
        };

        assert!(matches!(
            limiter.check_and_consume("192.168.1.1", "general", &zero_quota),
            Err(AdmissionError::InvalidPolicy(_))
        ));
        assert_eq!(limiter.active_counters(), 0);
    }

    #[test]
    fn test_sweep_now() {
        let (limiter, clock) = limiter_with_clock();
        let policy = Policy::new(5, 1).unwrap();

        for i in 0..5 {
            limiter
                .check_and_consume(&format!("10.0.0.{}", i), "general", &policy)
                .unwrap();
        }
        clock.advance(Duration::from_secs(2));

        assert_eq!(limiter.sweep_now(), 5);
        assert_eq!(limiter.active_counters(), 0);
    }

    #[derive(Debug)]
    struct FailingStore;

    impl CounterStore for FailingStore {
        fn hit(&self, _key: &str, _policy: &Policy, _now_ms: u64) -> Result<CounterHit> {
            Err(AdmissionError::Store("unavailable".to_string()))
        }

        fn sweep(&self, _now_ms: u64) -> usize {
            0
        }

        fn len(&self) -> usize {
            0
        }

        fn clear(&self) {}
    }

    #[test]
    fn test_store_errors_propagate() {
        let limiter = RateLimiter::new(
            Arc::new(FailingStore),
            Arc::new(SystemClock),
            DEFAULT_SWEEP_INTERVAL,
        );
        let policy = Policy::new(1, 1).unwrap();

        assert!(matches!(
            limiter.check_and_consume("a", "general", &policy),
            Err(AdmissionError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_first_check_starts_sweeper() {
        let (limiter, _) = limiter_with_clock();
        let policy = Policy::new(1, 1).unwrap();
        assert!(!limiter.is_sweeper_running());

        limiter.check_and_consume("a", "general", &policy).unwrap();
        assert!(limiter.is_sweeper_running());

        limiter.shutdown();
        assert!(!limiter.is_sweeper_running());
    }
}
