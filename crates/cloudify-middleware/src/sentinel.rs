//! Sentinel headers and response helpers.
//!
//! An edge function signals control flow to the orchestrator through
//! response headers: `x-cloudify-next` means "pass the original
//! request through unmodified" and `x-cloudify-rewrite` carries a
//! target the orchestrator forwards to internally (no client-visible
//! redirect). A response carrying neither IS the final response.

use crate::http::{HeaderMap, Response};

/// Pass-through sentinel header.
pub const NEXT_HEADER: &str = "x-cloudify-next";

/// Internal-rewrite sentinel header; the value is the target URL.
pub const REWRITE_HEADER: &str = "x-cloudify-rewrite";

/// Response header carrying the JSON A/B assignment list.
pub const AB_ASSIGNMENTS_HEADER: &str = "x-cloudify-ab-assignments";

/// Long-lived first-party visitor identity cookie.
pub const VISITOR_COOKIE: &str = "cloudify_visitor_id";

/// Per-test variant cookie prefix; the test slug is appended.
pub const AB_COOKIE_PREFIX: &str = "cloudify_ab_";

/// "Continue with the original request unmodified."
pub fn next_response() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(NEXT_HEADER, "1");
    Response::empty(200, headers)
}

/// "Serve this other URL instead, invisibly to the client."
pub fn rewrite_response(target: &str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(REWRITE_HEADER, target);
    Response::empty(200, headers)
}

/// A JSON body response.
pub fn json_response(status: u16, value: &serde_json::Value) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", "application/json");
    Response::new(status, headers, value.to_string())
}

/// A client-visible redirect.
pub fn redirect_response(location: &str, status: u16) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("location", location);
    Response::empty(status, headers)
}
