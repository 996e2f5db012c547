//! Client identity extraction for rate-limit keys.

/// Sentinel identity when no address header is usable.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derive the caller identity from proxy headers.
///
/// Prefers the first comma-separated entry of `X-Forwarded-For`
/// (trimmed), then `X-Real-IP`, then the `"unknown"` sentinel. Never
/// fails on missing or malformed input.
pub fn client_identity(forwarded_for: Option<&str>, real_ip: Option<&str>) -> String {
    if let Some(forwarded) = forwarded_for {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(ip) = real_ip {
        let trimmed = ip.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    UNKNOWN_CLIENT.to_string()
}
