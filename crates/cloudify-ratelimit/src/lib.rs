//! cloudify-ratelimit — admission control for Cloudify's public surface.
//!
//! Fixed-window counters backed by an injectable [`CounterStore`]
//! (process-local memory or a shared Redis-protocol store, selected by
//! configuration), a sliding-window variant for precision-sensitive
//! paths, named presets per traffic class, and a TTL-based IP ban
//! list.
//!
//! # Fail-open policy
//!
//! When the counter store is unreachable, [`check_rate_limit`] allows
//! the request and reports the full limit as remaining. Availability
//! of the product is prioritized over strict enforcement during
//! infrastructure outages. This is a deliberate policy, not a
//! fallback — tests pin it.

pub mod ban;
pub mod error;
pub mod identity;
pub mod limiter;
pub mod presets;
pub mod sliding;
pub mod store;

pub use ban::{ban_ip, is_ip_banned, unban_ip};
pub use error::StoreError;
pub use identity::client_identity;
pub use limiter::{check_rate_limit, RateLimitConfig, RateLimitDecision};
pub use presets::{preset, TrafficClass};
pub use sliding::SlidingWindowLimiter;
pub use store::{CounterBackend, CounterStore, CounterValue, MemoryCounterStore, RedisCounterStore};
