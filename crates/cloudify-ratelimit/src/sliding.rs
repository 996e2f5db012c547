//! Sliding-window rate limiting.
//!
//! Unlike the fixed window, this variant never admits a burst of
//! 2×limit across a window boundary: each check prunes timestamps
//! older than the window and counts what remains. State is purely
//! in-process; memory is bounded by [`SlidingWindowLimiter::cleanup`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use cloudify_core::epoch_millis;

use crate::limiter::RateLimitDecision;

/// In-memory sliding-window limiter.
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<String, Vec<u64>>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Check (and count) one request for `key`.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let now = epoch_millis();
        let window_ms = self.window.as_millis() as u64;
        let cutoff = now.saturating_sub(window_ms);

        let mut hits = self.hits.lock().expect("sliding window lock");
        let timestamps = hits.entry(key.to_string()).or_default();
        timestamps.retain(|&t| t > cutoff);

        if timestamps.len() >= self.limit {
            let oldest = timestamps.first().copied().unwrap_or(now);
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at_ms: oldest + window_ms,
            };
        }

        timestamps.push(now);
        RateLimitDecision {
            allowed: true,
            remaining: (self.limit - timestamps.len()) as i64,
            reset_at_ms: now + window_ms,
        }
    }

    /// Drop keys whose every timestamp has aged out. Returns the
    /// number of keys removed.
    pub fn cleanup(&self) -> usize {
        let cutoff = epoch_millis().saturating_sub(self.window.as_millis() as u64);
        let mut hits = self.hits.lock().expect("sliding window lock");
        let before = hits.len();
        hits.retain(|_, timestamps| timestamps.iter().any(|&t| t > cutoff));
        before - hits.len()
    }

    /// Number of tracked keys (including stale ones pending cleanup).
    pub fn tracked_keys(&self) -> usize {
        self.hits.lock().expect("sliding window lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_then_denies() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));

        for i in 0..3 {
            let decision = limiter.check("k");
            assert!(decision.allowed, "request {i}");
            assert_eq!(decision.remaining, 2 - i);
        }
        assert!(!limiter.check("k").allowed);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
    }

    #[test]
    fn slides_rather_than_resets() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_millis(50));

        assert!(limiter.check("k").allowed);
        assert!(limiter.check("k").allowed);
        assert!(!limiter.check("k").allowed);

        // After the window passes, capacity returns.
        std::thread::sleep(Duration::from_millis(70));
        assert!(limiter.check("k").allowed);
    }

    #[test]
    fn denial_reports_reset_from_oldest_hit() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        let first = limiter.check("k");
        let denied = limiter.check("k");
        assert!(!denied.allowed);
        // Reset is tied to when the oldest hit ages out, not "now".
        assert!(denied.reset_at_ms <= first.reset_at_ms);
    }

    #[test]
    fn cleanup_bounds_memory() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_millis(20));
        limiter.check("a");
        limiter.check("b");
        assert_eq!(limiter.tracked_keys(), 2);

        std::thread::sleep(Duration::from_millis(40));
        let removed = limiter.cleanup();
        assert_eq!(removed, 2);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn cleanup_keeps_live_keys() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(60));
        limiter.check("live");
        assert_eq!(limiter.cleanup(), 0);
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
