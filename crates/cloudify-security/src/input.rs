//! URL, path, and payload validators.

use serde_json::Value;

/// Hostname prefixes that must never be reachable from a webhook
/// (loopback, link-local, RFC 1918).
const BLOCKED_HOST_PREFIXES: &[&str] = &[
    "localhost",
    "127.",
    "0.0.0.0",
    "::1",
    "[::1]",
    "169.254.",
    "10.",
    "172.16.",
    "172.17.",
    "172.18.",
    "172.19.",
    "172.20.",
    "172.21.",
    "172.22.",
    "172.23.",
    "172.24.",
    "172.25.",
    "172.26.",
    "172.27.",
    "172.28.",
    "172.29.",
    "172.30.",
    "172.31.",
    "192.168.",
];

/// Object keys that enable prototype pollution when merged into
/// trusted state.
const POLLUTION_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Accept only `https://github.com/<owner>/<repo>...` with no embedded
/// credentials, traversal sequences, shell metacharacters, or
/// whitespace. The check runs on the raw string, before any
/// normalization.
pub fn is_valid_github_url(url: &str) -> bool {
    if url.contains("..") {
        return false;
    }
    if url.chars().any(|c| c.is_whitespace()) {
        return false;
    }
    if url
        .chars()
        .any(|c| matches!(c, ';' | '|' | '&' | '`' | '$' | '<' | '>' | '\'' | '"'))
    {
        return false;
    }
    let Some(rest) = url.strip_prefix("https://github.com/") else {
        return false;
    };
    // Credentials would appear before the host, which the prefix match
    // already excludes; an `@` anywhere else is not a valid repo path.
    if url.contains('@') {
        return false;
    }
    let mut segments = rest.split('/');
    let owner = segments.next().unwrap_or("");
    let repo = segments.next().unwrap_or("");
    !owner.is_empty() && !repo.is_empty()
}

/// Validate a repository-relative file path against traversal attacks.
///
/// Rejects null bytes, fullwidth-ASCII homoglyphs (U+FF00–FFEF),
/// iteratively percent-decodes until stable and then rejects `..`
/// segments and `~` prefixes, and rejects absolute paths unless
/// `allow_absolute` is set.
pub fn is_valid_path(path: &str, allow_absolute: bool) -> bool {
    if path.is_empty() || path.contains('\0') {
        return false;
    }
    // Fullwidth forms normalize to ASCII under compatibility mappings,
    // so `．．` would sail past a naive `..` check. Reject the block
    // outright.
    if path
        .chars()
        .any(|c| ('\u{FF00}'..='\u{FFEF}').contains(&c))
    {
        return false;
    }

    // Percent-decode until stable so `%252e%252e` (double-encoded `..`)
    // cannot hide behind a single decoding pass.
    let mut decoded = path.to_string();
    for _ in 0..8 {
        let next = percent_decode(&decoded);
        if next.contains('\0') {
            return false;
        }
        if next == decoded {
            break;
        }
        decoded = next;
    }

    if decoded.starts_with('~') {
        return false;
    }
    if !allow_absolute
        && (decoded.starts_with('/') || decoded.starts_with('\\') || has_drive_prefix(&decoded))
    {
        return false;
    }
    // Check segments across both separator conventions.
    decoded
        .split(['/', '\\'])
        .all(|segment| segment != "..")
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Decode `%XX` escapes once; invalid escapes pass through unchanged.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Validate an outbound webhook URL: HTTPS only, and the host must not
/// resolve into loopback/link-local/private space by prefix.
pub fn is_valid_webhook_url(url: &str) -> bool {
    let Some(rest) = url.strip_prefix("https://") else {
        return false;
    };
    let host_port = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host_port.is_empty() {
        return false;
    }
    // Strip credentials and port before the prefix check.
    let host = host_port.rsplit('@').next().unwrap_or(host_port);
    let host = if host.starts_with('[') {
        host.split(']').next().map(|h| &h[1..]).unwrap_or(host)
    } else {
        host.split(':').next().unwrap_or(host)
    };
    let host_lower = host.to_ascii_lowercase();
    if host_lower.is_empty() {
        return false;
    }
    !BLOCKED_HOST_PREFIXES
        .iter()
        .any(|prefix| host_lower.starts_with(prefix))
}

/// Recursively reject any JSON value carrying prototype-pollution keys
/// at any depth. Run this before merging a payload into trusted state.
pub fn is_clean_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().all(|(key, child)| {
            !POLLUTION_KEYS.contains(&key.as_str()) && is_clean_object(child)
        }),
        Value::Array(items) => items.iter().all(is_clean_object),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── GitHub URLs ────────────────────────────────────────────────

    #[test]
    fn github_url_accepts_plain_repo() {
        assert!(is_valid_github_url("https://github.com/rust-lang/rust"));
        assert!(is_valid_github_url(
            "https://github.com/owner/repo/tree/main/src"
        ));
    }

    #[test]
    fn github_url_rejects_other_hosts_and_schemes() {
        assert!(!is_valid_github_url("http://github.com/a/b"));
        assert!(!is_valid_github_url("https://gitlab.com/a/b"));
        assert!(!is_valid_github_url("https://github.com.evil.com/a/b"));
    }

    #[test]
    fn github_url_rejects_credentials() {
        assert!(!is_valid_github_url("https://user:pw@github.com/a/b"));
        assert!(!is_valid_github_url("https://github.com/a/b@tag"));
    }

    #[test]
    fn github_url_rejects_traversal_and_metacharacters() {
        assert!(!is_valid_github_url("https://github.com/a/../b"));
        assert!(!is_valid_github_url("https://github.com/a/b;rm -rf"));
        assert!(!is_valid_github_url("https://github.com/a/b\nX: y"));
        assert!(!is_valid_github_url("https://github.com/a/`id`"));
    }

    #[test]
    fn github_url_rejects_missing_repo() {
        assert!(!is_valid_github_url("https://github.com/onlyowner"));
        assert!(!is_valid_github_url("https://github.com/"));
    }

    // ── Paths ──────────────────────────────────────────────────────

    #[test]
    fn path_accepts_normal_relative_paths() {
        assert!(is_valid_path("src/index.js", false));
        assert!(is_valid_path("dist/bundle.js", false));
        assert!(is_valid_path("a/b/c.d.e.txt", false));
    }

    #[test]
    fn path_rejects_plain_traversal() {
        assert!(!is_valid_path("../etc/passwd", false));
        assert!(!is_valid_path("..\\..\\etc\\passwd", false));
        assert!(!is_valid_path("a/../../b", false));
    }

    #[test]
    fn path_rejects_percent_encoded_traversal() {
        assert!(!is_valid_path("%2e%2e/etc/passwd", false));
        assert!(!is_valid_path("%2e%2e%2fetc%2fpasswd", false));
        // Double-encoded: %25 → %, then %2e → .
        assert!(!is_valid_path("%252e%252e/etc/passwd", false));
    }

    #[test]
    fn path_rejects_null_bytes() {
        assert!(!is_valid_path("file\0.txt", false));
        assert!(!is_valid_path("file%00.txt", false));
    }

    #[test]
    fn path_rejects_fullwidth_homoglyphs() {
        assert!(!is_valid_path("\u{FF0E}\u{FF0E}/etc/passwd", false));
        assert!(!is_valid_path("src/\u{FF0F}etc", false));
    }

    #[test]
    fn path_rejects_home_prefix() {
        assert!(!is_valid_path("~/secrets", false));
        assert!(!is_valid_path("~root/.ssh", false));
    }

    #[test]
    fn path_absolute_gated_by_flag() {
        assert!(!is_valid_path("/etc/config", false));
        assert!(is_valid_path("/srv/app/index.js", true));
        assert!(!is_valid_path("/srv/../etc/passwd", true));
        assert!(!is_valid_path("C:\\Windows\\system32", false));
    }

    // ── Webhook URLs ───────────────────────────────────────────────

    #[test]
    fn webhook_accepts_public_https() {
        assert!(is_valid_webhook_url("https://hooks.slack.com/services/xxx"));
        assert!(is_valid_webhook_url("https://example.com:8443/hook"));
    }

    #[test]
    fn webhook_rejects_http() {
        assert!(!is_valid_webhook_url("http://hooks.slack.com/services/xxx"));
        assert!(!is_valid_webhook_url("ftp://example.com/hook"));
    }

    #[test]
    fn webhook_rejects_metadata_and_loopback() {
        assert!(!is_valid_webhook_url(
            "https://169.254.169.254/latest/meta-data/"
        ));
        assert!(!is_valid_webhook_url("https://localhost/hook"));
        assert!(!is_valid_webhook_url("https://127.0.0.1:9999/hook"));
        assert!(!is_valid_webhook_url("https://0.0.0.0/hook"));
        assert!(!is_valid_webhook_url("https://[::1]/hook"));
    }

    #[test]
    fn webhook_rejects_private_ranges() {
        assert!(!is_valid_webhook_url("https://10.0.0.5/hook"));
        assert!(!is_valid_webhook_url("https://172.16.3.4/hook"));
        assert!(!is_valid_webhook_url("https://172.31.255.1/hook"));
        assert!(!is_valid_webhook_url("https://192.168.1.1/hook"));
        // 172.32.x is public.
        assert!(is_valid_webhook_url("https://172.32.0.1/hook"));
    }

    // ── Prototype pollution ────────────────────────────────────────

    #[test]
    fn clean_object_accepts_ordinary_payloads() {
        assert!(is_clean_object(&json!({"name": "x", "nested": {"a": 1}})));
        assert!(is_clean_object(&json!([1, "two", {"three": 3}])));
        assert!(is_clean_object(&json!(null)));
    }

    #[test]
    fn clean_object_rejects_pollution_keys_at_any_depth() {
        assert!(!is_clean_object(&json!({"__proto__": {"admin": true}})));
        assert!(!is_clean_object(&json!({"a": {"constructor": {}}})));
        assert!(!is_clean_object(&json!({"a": [{"prototype": 1}]})));
        assert!(!is_clean_object(
            &json!({"deep": {"deeper": {"__proto__": {}}}})
        ));
    }
}
