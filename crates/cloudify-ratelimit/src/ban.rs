//! TTL-based IP ban list.
//!
//! Bans live in the same counter store as rate-limit windows and
//! expire through the store's TTL mechanism — there is no sweeper to
//! run. A store failure fails open (the caller is treated as not
//! banned), consistent with the limiter's policy.

use std::time::Duration;

use tracing::warn;

use crate::store::CounterStore;

fn ban_key(ip: &str) -> String {
    format!("ban:{ip}")
}

/// Ban an IP for `duration`. A zero or negative-length duration is a
/// no-op — it does NOT ban.
pub async fn ban_ip<S: CounterStore>(store: &S, ip: &str, duration: Duration) -> bool {
    if duration.is_zero() {
        return false;
    }
    match store.set_expiring(&ban_key(ip), duration).await {
        Ok(()) => {
            warn!(%ip, secs = duration.as_secs(), "ip banned");
            true
        }
        Err(e) => {
            warn!(%ip, error = %e, "failed to record ban");
            false
        }
    }
}

/// Lift a ban early. Lifting a nonexistent ban succeeds.
pub async fn unban_ip<S: CounterStore>(store: &S, ip: &str) -> bool {
    match store.delete(&ban_key(ip)).await {
        Ok(()) => true,
        Err(e) => {
            warn!(%ip, error = %e, "failed to lift ban");
            false
        }
    }
}

/// Whether an IP is currently banned. Fails open on store errors.
pub async fn is_ip_banned<S: CounterStore>(store: &S, ip: &str) -> bool {
    match store.exists(&ban_key(ip)).await {
        Ok(banned) => banned,
        Err(e) => {
            warn!(%ip, error = %e, "ban check failed; failing open");
            false
        }
    }
}
