//! Rate-limit layer in front of the API handlers.
//!
//! Per request: ban check (403), then a fixed-window check against the
//! traffic class's preset (GET → read, everything else → write).
//! Authenticated callers (identity supplied by the auth collaborator
//! through `x-authenticated-user`) get the preset's higher limit.
//! Denials answer 429 with `Retry-After` and `X-RateLimit-*` headers;
//! admitted responses carry the remaining-budget headers too.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use cloudify_ratelimit::{
    check_rate_limit, client_identity, is_ip_banned, preset, RateLimitDecision, TrafficClass,
};

use crate::handlers::error_response;
use crate::ApiState;

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Classify a request into a preset traffic class by method.
fn classify(method: &axum::http::Method) -> TrafficClass {
    if *method == axum::http::Method::GET || *method == axum::http::Method::HEAD {
        TrafficClass::Read
    } else {
        TrafficClass::Write
    }
}

/// The axum middleware function.
pub async fn rate_limit_layer(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let identity = client_identity(
        header(request.headers(), "x-forwarded-for"),
        header(request.headers(), "x-real-ip"),
    );

    if is_ip_banned(&*state.counters, &identity).await {
        return error_response("temporarily banned", StatusCode::FORBIDDEN);
    }

    let authenticated = header(request.headers(), "x-authenticated-user").is_some();
    let class = classify(request.method());
    let limits = preset(class);
    let config = limits.config_for(authenticated);
    let key = format!("rl:{}:{identity}", limits.name);

    let decision = check_rate_limit(&*state.counters, &key, &config).await;
    if !decision.allowed {
        return rate_limited_response(&decision, config.limit);
    }

    let mut response = next.run(request).await;
    apply_limit_headers(&mut response, &decision, config.limit);
    response
}

/// 429 with the standard envelope and retry headers.
fn rate_limited_response(decision: &RateLimitDecision, limit: i64) -> Response {
    let mut response = error_response("rate limit exceeded", StatusCode::TOO_MANY_REQUESTS);
    let headers = response.headers_mut();
    if let Ok(value) = decision.retry_after_secs().to_string().parse() {
        headers.insert("retry-after", value);
    }
    apply_limit_header_values(headers, decision, limit);
    response
}

fn apply_limit_headers(response: &mut Response, decision: &RateLimitDecision, limit: i64) {
    apply_limit_header_values(response.headers_mut(), decision, limit);
}

fn apply_limit_header_values(
    headers: &mut axum::http::HeaderMap,
    decision: &RateLimitDecision,
    limit: i64,
) {
    let entries = [
        ("x-ratelimit-limit", limit.to_string()),
        ("x-ratelimit-remaining", decision.remaining.to_string()),
        ("x-ratelimit-reset", (decision.reset_at_ms / 1000).to_string()),
    ];
    for (name, value) in entries {
        if let Ok(value) = value.parse() {
            headers.insert(name, value);
        }
    }
}
