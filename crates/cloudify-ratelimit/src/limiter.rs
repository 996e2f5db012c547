//! Fixed-window rate limiting.

use std::time::Duration;

use cloudify_core::epoch_millis;
use tracing::warn;

use crate::store::CounterStore;

/// Limit and window for one traffic class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests admitted per window. Zero or negative denies everything.
    pub limit: i64,
    pub window: Duration,
}

impl RateLimitConfig {
    pub const fn new(limit: i64, window_secs: u64) -> Self {
        Self {
            limit,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: i64,
    /// Unix milliseconds when the current window resets.
    pub reset_at_ms: u64,
}

impl RateLimitDecision {
    /// Seconds until the window resets, rounded up; for `Retry-After`.
    pub fn retry_after_secs(&self) -> u64 {
        let now = epoch_millis();
        self.reset_at_ms.saturating_sub(now).div_ceil(1000)
    }
}

/// Check (and count) one request against a fixed window.
///
/// `limit <= 0` short-circuits to deny without touching the store. A
/// store failure fails OPEN: the request is allowed and `remaining`
/// reports the full limit.
pub async fn check_rate_limit<S: CounterStore>(
    store: &S,
    key: &str,
    config: &RateLimitConfig,
) -> RateLimitDecision {
    if config.limit <= 0 {
        return RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_at_ms: epoch_millis() + config.window.as_millis() as u64,
        };
    }

    match store.increment(key, config.window).await {
        Ok(value) => RateLimitDecision {
            allowed: value.count <= config.limit,
            remaining: (config.limit - value.count).max(0),
            reset_at_ms: value.reset_at_ms,
        },
        Err(e) => {
            warn!(%key, error = %e, "counter store failed; failing open");
            RateLimitDecision {
                allowed: true,
                remaining: config.limit,
                reset_at_ms: epoch_millis() + config.window.as_millis() as u64,
            }
        }
    }
}
