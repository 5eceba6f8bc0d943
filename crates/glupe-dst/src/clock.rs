//! Deterministic simulated time.
//!
//! Backoff sleeps in tests advance this clock instead of waiting, and every
//! requested sleep is recorded so tests can assert on the backoff schedule.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use glupe_core::Sleeper;

/// Simulated clock with nanosecond precision.
///
/// Time only advances when explicitly requested or when a sleep is simulated.
pub struct SimClock {
    now_ns: AtomicU64,
    sleeps: Mutex<Vec<Duration>>,
}

const TIME_NS_MAX: u64 = u64::MAX - 1_000_000_000_000;

impl SimClock {
    /// Create a new clock starting at time 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now_ns: AtomicU64::new(0),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Current time in nanoseconds.
    #[must_use]
    pub fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }

    /// Current time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.now_ns() / 1_000_000
    }

    /// Advance time by the given number of nanoseconds.
    pub fn advance_ns(&self, delta_ns: u64) {
        let current = self.now_ns.load(Ordering::Acquire);
        debug_assert!(
            current <= TIME_NS_MAX - delta_ns,
            "Time advance would overflow"
        );
        self.now_ns.fetch_add(delta_ns, Ordering::Release);
    }

    /// Advance time by `duration`.
    pub fn advance(&self, duration: Duration) {
        let delta_ns = u64::try_from(duration.as_nanos()).unwrap_or(TIME_NS_MAX);
        self.advance_ns(delta_ns);
    }

    /// Every sleep requested so far, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn sleeps_count(&self) -> usize {
        self.sleeps.lock().map(|s| s.len()).unwrap_or_default()
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sleeper for SimClock {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_starts_at_zero() {
        let clock = SimClock::new();
        assert_eq!(clock.now_ns(), 0);
        assert_eq!(clock.sleeps_count(), 0);
    }

    #[test]
    fn test_advance_time() {
        let clock = SimClock::new();
        clock.advance_ns(1_000_000);
        assert_eq!(clock.now_ms(), 1);
        clock.advance(Duration::from_millis(100));
        assert_eq!(clock.now_ms(), 101);
    }

    #[tokio::test]
    async fn test_sleep_is_instant_and_recorded() {
        let clock = SimClock::new();
        clock.sleep(Duration::from_secs(5)).await;
        clock.sleep(Duration::from_secs(10)).await;
        assert_eq!(clock.now_ms(), 15_000);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }
}
