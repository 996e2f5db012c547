//! Catch-all edge entry for standalone mode.
//!
//! Any request that is not an API call lands here. The project is
//! resolved from the Host header's subdomain (the serving URL is
//! `https://{slug}.{base_domain}`), the orchestrator runs edge
//! functions and A/B assignment, and pass-throughs fall to a stub
//! origin — standalone mode has no site-serving backend of its own.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use tracing::debug;

use cloudify_middleware::{
    BoxResponseFuture, EdgeOrchestrator, HeaderMap, OriginHandler, Request, Response,
};

/// Shared state for the edge entry route.
#[derive(Clone)]
pub struct EdgeEntryState {
    pub orchestrator: Arc<EdgeOrchestrator>,
    pub base_domain: String,
}

/// Origin used when no site backend is wired in: pass-throughs answer
/// 404 while edge responses (and A/B cookies) still work.
struct StubOrigin;

impl OriginHandler for StubOrigin {
    fn forward(&self, _request: &Request, rewrite_to: Option<&str>) -> BoxResponseFuture {
        let rewritten = rewrite_to.is_some();
        Box::pin(async move {
            let mut headers = HeaderMap::new();
            headers.insert("content-type", "text/plain");
            if rewritten {
                headers.insert("x-cloudify-rewritten", "1");
            }
            Response::new(404, headers, "no origin configured")
        })
    }
}

/// Resolve `{slug}.{base_domain}` to the project slug.
fn project_from_host(host: &str, base_domain: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host);
    let suffix = format!(".{base_domain}");
    host.strip_suffix(&suffix).map(str::to_string)
}

/// The axum fallback handler.
pub async fn handle(
    State(state): State<EdgeEntryState>,
    request: axum::extract::Request,
) -> axum::response::Response {
    let (parts, body) = request.into_parts();

    let host = parts
        .headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let Some(project_id) = project_from_host(host, &state.base_domain) else {
        debug!(%host, "request host does not map to a project");
        return (axum::http::StatusCode::NOT_FOUND, "unknown host").into_response();
    };

    let mut headers = HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str(), value);
        }
    }

    let body = axum::body::to_bytes(body, 4 * 1024 * 1024)
        .await
        .unwrap_or_default();
    let request = Request::new(
        parts.method.as_str(),
        parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/"),
        headers,
        body,
    );

    let response = state
        .orchestrator
        .handle(&project_id, &request, &StubOrigin)
        .await;
    into_axum(response)
}

fn into_axum(response: Response) -> axum::response::Response {
    let mut builder = axum::http::Response::builder().status(response.status());
    for header in response.headers().iter() {
        builder = builder.header(header.name.as_str(), header.value.as_str());
    }
    builder
        .body(axum::body::Body::from(response.body_bytes().clone()))
        .unwrap_or_else(|_| {
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "bad edge response").into_response()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_resolution() {
        assert_eq!(
            project_from_host("my-site.cloudify.app", "cloudify.app").as_deref(),
            Some("my-site")
        );
        assert_eq!(
            project_from_host("my-site.cloudify.app:8080", "cloudify.app").as_deref(),
            Some("my-site")
        );
        assert!(project_from_host("cloudify.app", "cloudify.app").is_none());
        assert!(project_from_host("other.example.com", "cloudify.app").is_none());
        assert!(project_from_host("", "cloudify.app").is_none());
    }
}
