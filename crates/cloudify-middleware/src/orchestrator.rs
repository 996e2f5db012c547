//! EdgeOrchestrator — per-request control flow.

use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;

use cloudify_abtest::{AbTestEngine, RequestContext};
use cloudify_core::glob_match;
use cloudify_geo::{detect_browser, detect_device, resolve_geo};
use cloudify_sandbox::{EdgeExecutor, ExecStatus, RequestSnapshot, SandboxResponse};
use cloudify_state::{EdgeFunction, StateStore};

use crate::http::{HeaderMap, Request, Response, SameSite, SetCookie};
use crate::sentinel::{
    AB_ASSIGNMENTS_HEADER, AB_COOKIE_PREFIX, NEXT_HEADER, REWRITE_HEADER, VISITOR_COOKIE,
};

/// ~1 year, for the visitor identity cookie.
const VISITOR_COOKIE_MAX_AGE: u64 = 365 * 24 * 60 * 60;

/// ~30 days, for the JS-readable per-test variant cookies.
const AB_COOKIE_MAX_AGE: u64 = 30 * 24 * 60 * 60;

/// Future type returned by [`OriginHandler::forward`].
pub type BoxResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// The underlying site — the collaborator that serves a request when
/// no edge function claims it (or when one fails, or asks to pass
/// through or rewrite).
pub trait OriginHandler: Send + Sync {
    /// Serve the request. `rewrite_to` carries the internal rewrite
    /// target when an edge function requested one.
    fn forward(&self, request: &Request, rewrite_to: Option<&str>) -> BoxResponseFuture;
}

/// Per-request orchestrator in front of the origin.
pub struct EdgeOrchestrator {
    store: StateStore,
    executor: Arc<EdgeExecutor>,
    ab: AbTestEngine,
    secure_cookies: bool,
}

impl EdgeOrchestrator {
    pub fn new(
        store: StateStore,
        executor: Arc<EdgeExecutor>,
        ab: AbTestEngine,
        secure_cookies: bool,
    ) -> Self {
        Self {
            store,
            executor,
            ab,
            secure_cookies,
        }
    }

    /// Handle one request: edge dispatch, then A/B cookie merging.
    ///
    /// Never fails — every edge failure mode degrades to the origin
    /// response.
    pub async fn handle(
        &self,
        project_id: &str,
        request: &Request,
        origin: &dyn OriginHandler,
    ) -> Response {
        let geo = resolve_geo(request.headers());

        let mut response = match self.matching_function(project_id, request.path()) {
            None => origin.forward(request, None).await,
            Some(function) => {
                self.dispatch(&function, request, geo.country.as_deref(), origin)
                    .await
            }
        };

        // A/B assignment runs on every request, independent of whether
        // an edge function matched or what it returned.
        self.apply_ab(project_id, request, &geo, &mut response);
        response
    }

    /// First enabled function whose any route pattern matches the
    /// path. The store returns functions in `(created_at, id)` order,
    /// which is the documented tie-break.
    fn matching_function(&self, project_id: &str, path: &str) -> Option<EdgeFunction> {
        let functions = match self.store.list_edge_functions_for_project(project_id) {
            Ok(functions) => functions,
            Err(e) => {
                warn!(project = %project_id, error = %e, "edge function lookup failed");
                return None;
            }
        };
        functions.into_iter().find(|function| {
            function.enabled
                && function
                    .routes
                    .iter()
                    .any(|pattern| glob_match(pattern, path))
        })
    }

    /// Invoke the sandbox and interpret the result.
    async fn dispatch(
        &self,
        function: &EdgeFunction,
        request: &Request,
        country: Option<&str>,
        origin: &dyn OriginHandler,
    ) -> Response {
        let snapshot = snapshot_of(request);
        let outcome = self
            .executor
            .execute(&function.id, &snapshot, country)
            .await;

        match outcome.status {
            // Fail open: the site must keep serving. The invocation
            // audit record was already written by the executor.
            ExecStatus::Error | ExecStatus::Timeout => {
                warn!(
                    function = %function.id,
                    status = ?outcome.status,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "edge function failed; serving origin"
                );
                origin.forward(request, None).await
            }
            ExecStatus::Success => match outcome.response {
                None => origin.forward(request, None).await,
                Some(sandbox_response) => {
                    if sandbox_response.header(NEXT_HEADER).is_some() {
                        origin.forward(request, None).await
                    } else if let Some(target) = sandbox_response.header(REWRITE_HEADER) {
                        let target = target.to_string();
                        origin.forward(request, Some(&target)).await
                    } else {
                        into_response(sandbox_response)
                    }
                }
            },
        }
    }

    /// Assign A/B variants and merge cookies/headers onto the response.
    fn apply_ab(
        &self,
        project_id: &str,
        request: &Request,
        geo: &cloudify_geo::GeoInfo,
        response: &mut Response,
    ) {
        let (visitor_id, is_new_visitor) = match request.cookie(VISITOR_COOKIE) {
            Some(existing) => (existing, false),
            None => (uuid::Uuid::new_v4().to_string(), true),
        };

        let user_agent = request.headers().get("user-agent").unwrap_or("");
        let ctx = RequestContext {
            country: geo.country.clone(),
            device: Some(detect_device(user_agent).as_str().to_string()),
            browser: Some(detect_browser(user_agent).to_string()),
            path: request.path().to_string(),
        };

        let assignments = match self.ab.assign_variants(project_id, &visitor_id, &ctx) {
            Ok(assignments) => assignments,
            Err(e) => {
                warn!(project = %project_id, error = %e, "ab assignment failed");
                Vec::new()
            }
        };

        if is_new_visitor {
            response.add_cookie(
                &SetCookie::new(VISITOR_COOKIE, &visitor_id)
                    .max_age(VISITOR_COOKIE_MAX_AGE)
                    .http_only(true)
                    .secure(self.secure_cookies)
                    .same_site(SameSite::Lax),
            );
        }

        for assignment in &assignments {
            // JS-readable on purpose: client code branches on these.
            response.add_cookie(
                &SetCookie::new(
                    format!("{AB_COOKIE_PREFIX}{}", assignment.test_slug),
                    &assignment.variant,
                )
                .max_age(AB_COOKIE_MAX_AGE)
                .http_only(false)
                .secure(self.secure_cookies)
                .same_site(SameSite::Lax),
            );
        }

        if !assignments.is_empty() {
            if let Ok(json) = serde_json::to_string(&assignments) {
                response.headers_mut().insert(AB_ASSIGNMENTS_HEADER, json);
            }
        }
    }
}

/// Build the serializable snapshot the sandbox receives. Body reading
/// is skipped for GET/HEAD.
fn snapshot_of(request: &Request) -> RequestSnapshot {
    let method = request.method().to_string();
    let body = if method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD") {
        None
    } else if request.body_bytes().is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(request.body_bytes()).into_owned())
    };
    RequestSnapshot {
        method,
        url: request.uri().to_string(),
        headers: request
            .headers()
            .iter()
            .map(|h| (h.name.clone(), h.value.clone()))
            .collect(),
        body,
    }
}

/// A sandbox response without sentinels IS the final response.
fn into_response(sandbox_response: SandboxResponse) -> Response {
    let headers: HeaderMap = sandbox_response
        .headers
        .into_iter()
        .collect();
    Response::new(sandbox_response.status, headers, sandbox_response.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudify_sandbox::{EdgeEngine, ExecutorConfig};
    use cloudify_state::InvocationStatus;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Origin that returns a canned body and records rewrite targets.
    struct StaticOrigin {
        rewrites: Mutex<Vec<Option<String>>>,
    }

    impl StaticOrigin {
        fn new() -> Self {
            Self {
                rewrites: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Option<String>> {
            self.rewrites.lock().unwrap().clone()
        }
    }

    impl OriginHandler for StaticOrigin {
        fn forward(&self, _request: &Request, rewrite_to: Option<&str>) -> BoxResponseFuture {
            self.rewrites
                .lock()
                .unwrap()
                .push(rewrite_to.map(str::to_string));
            Box::pin(async {
                Response::new(200, HeaderMap::new(), "origin page")
            })
        }
    }

    fn static_component(entry: &str, json: &str) -> String {
        let escaped = json.replace('\\', "\\\\").replace('"', "\\\"");
        format!(
            r#"(component
  (core module $m
    (memory (export "memory") 1)
    (func (export "realloc") (param i32 i32 i32 i32) (result i32) (i32.const 0))
    (func (export "run") (param i32 i32) (result i32)
      (i32.store (i32.const 8) (i32.const 1024))
      (i32.store (i32.const 12) (i32.const {len}))
      (i32.const 8))
    (data (i32.const 1024) "{escaped}")
  )
  (core instance $i (instantiate $m))
  (func (export "{entry}") (param "request" string) (result string)
    (canon lift (core func $i "run") (memory $i "memory") (realloc (func $i "realloc"))))
)"#,
            len = json.len(),
        )
    }

    fn trapping_component() -> String {
        r#"(component
  (core module $m
    (memory (export "memory") 1)
    (func (export "realloc") (param i32 i32 i32 i32) (result i32) (i32.const 0))
    (func (export "run") (param i32 i32) (result i32) unreachable)
  )
  (core instance $i (instantiate $m))
  (func (export "handler") (param "request" string) (result string)
    (canon lift (core func $i "run") (memory $i "memory") (realloc (func $i "realloc"))))
)"#
        .to_string()
    }

    fn save_function(store: &StateStore, id: &str, routes: &[&str], source: String) {
        store
            .put_edge_function(&EdgeFunction {
                id: id.to_string(),
                project_id: "p1".to_string(),
                name: format!("fn-{id}"),
                source,
                routes: routes.iter().map(|r| r.to_string()).collect(),
                enabled: true,
                timeout_secs: 5,
                env: HashMap::new(),
                created_at: 1000,
                updated_at: 1000,
            })
            .unwrap();
    }

    struct Setup {
        orchestrator: EdgeOrchestrator,
        store: StateStore,
        _ticker: cloudify_sandbox::EpochTicker,
    }

    fn setup() -> Setup {
        let store = StateStore::open_in_memory().unwrap();
        let engine = EdgeEngine::new().unwrap();
        let ticker = engine.spawn_epoch_ticker();
        let executor = Arc::new(EdgeExecutor::new(
            engine,
            store.clone(),
            ExecutorConfig::default(),
        ));
        let ab = AbTestEngine::new(store.clone());
        Setup {
            orchestrator: EdgeOrchestrator::new(store.clone(), executor, ab, false),
            store,
            _ticker: ticker,
        }
    }

    fn get(path: &str) -> Request {
        Request::empty("GET", path, HeaderMap::new())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_matching_function_passes_through() {
        let s = setup();
        let origin = StaticOrigin::new();

        let response = s.orchestrator.handle("p1", &get("/about"), &origin).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.body_bytes().as_ref(), b"origin page");
        assert_eq!(origin.calls(), vec![None]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn matching_function_response_is_final() {
        let s = setup();
        let json = r#"{"status":418,"headers":[["x-edge","yes"]],"body":"teapot"}"#;
        save_function(&s.store, "f1", &["/api/*"], static_component("handler", json));
        let origin = StaticOrigin::new();

        let response = s.orchestrator.handle("p1", &get("/api/brew"), &origin).await;
        assert_eq!(response.status(), 418);
        assert_eq!(response.headers().get("x-edge"), Some("yes"));
        assert_eq!(response.body_bytes().as_ref(), b"teapot");
        // Origin never consulted.
        assert!(origin.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn next_sentinel_passes_through() {
        let s = setup();
        let json = r#"{"status":200,"headers":[["x-cloudify-next","1"]],"body":""}"#;
        save_function(&s.store, "f1", &["/api/*"], static_component("middleware", json));
        let origin = StaticOrigin::new();

        let response = s.orchestrator.handle("p1", &get("/api/x"), &origin).await;
        assert_eq!(response.body_bytes().as_ref(), b"origin page");
        assert_eq!(origin.calls(), vec![None]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rewrite_sentinel_forwards_internally() {
        let s = setup();
        let json =
            r#"{"status":200,"headers":[["x-cloudify-rewrite","/variant-b"]],"body":""}"#;
        save_function(&s.store, "f1", &["/landing"], static_component("middleware", json));
        let origin = StaticOrigin::new();

        let response = s.orchestrator.handle("p1", &get("/landing"), &origin).await;
        assert_eq!(response.body_bytes().as_ref(), b"origin page");
        assert_eq!(origin.calls(), vec![Some("/variant-b".to_string())]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn throwing_function_fails_open_and_records() {
        let s = setup();
        save_function(&s.store, "f1", &["/api/*"], trapping_component());
        let origin = StaticOrigin::new();

        let response = s.orchestrator.handle("p1", &get("/api/test"), &origin).await;
        // The site still serves.
        assert_eq!(response.status(), 200);
        assert_eq!(response.body_bytes().as_ref(), b"origin page");

        // But the failure is on the audit trail.
        let invocations = s.store.list_invocations_for_function("f1", 10).unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].status, InvocationStatus::Error);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_match_wins_in_creation_order() {
        let s = setup();
        let first = r#"{"status":201,"headers":[],"body":"first"}"#;
        let second = r#"{"status":202,"headers":[],"body":"second"}"#;
        // Same route; "a" is older than "b".
        save_function(&s.store, "b", &["/api/*"], static_component("handler", second));
        let mut older = EdgeFunction {
            id: "a".to_string(),
            project_id: "p1".to_string(),
            name: "fn-a".to_string(),
            source: static_component("handler", first),
            routes: vec!["/api/*".to_string()],
            enabled: true,
            timeout_secs: 5,
            env: HashMap::new(),
            created_at: 500,
            updated_at: 500,
        };
        s.store.put_edge_function(&older).unwrap();
        let origin = StaticOrigin::new();

        let response = s.orchestrator.handle("p1", &get("/api/x"), &origin).await;
        assert_eq!(response.body_bytes().as_ref(), b"first");

        // Disabling the older one moves matching to the next.
        older.enabled = false;
        s.store.put_edge_function(&older).unwrap();
        let response = s.orchestrator.handle("p1", &get("/api/x"), &origin).await;
        assert_eq!(response.body_bytes().as_ref(), b"second");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn visitor_cookie_issued_once() {
        let s = setup();
        let origin = StaticOrigin::new();

        let response = s.orchestrator.handle("p1", &get("/"), &origin).await;
        let cookies = response.headers().get_all("set-cookie");
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with("cloudify_visitor_id="));
        assert!(cookies[0].contains("HttpOnly"));
        assert!(cookies[0].contains("SameSite=Lax"));

        // A returning visitor gets no new identity cookie.
        let mut headers = HeaderMap::new();
        headers.insert("cookie", "cloudify_visitor_id=vis-1");
        let request = Request::empty("GET", "/", headers);
        let response = s.orchestrator.handle("p1", &request, &origin).await;
        assert!(response.headers().get_all("set-cookie").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ab_assignment_merges_onto_edge_response() {
        let s = setup();
        let json = r#"{"status":200,"headers":[],"body":"edge"}"#;
        save_function(&s.store, "f1", &["/*"], static_component("handler", json));

        // One enabled 100% test.
        let ab = AbTestEngine::new(s.store.clone());
        let mut test = ab
            .create_test(
                "p1",
                "Banner Test",
                vec![cloudify_state::Variant {
                    name: "on".to_string(),
                    weight: 100,
                    url: None,
                    config: None,
                }],
                None,
                None,
                None,
                None,
                None,
            )
            .unwrap();
        test.enabled = true;
        ab.update_test(test).unwrap();

        let origin = StaticOrigin::new();
        let mut headers = HeaderMap::new();
        headers.insert("cookie", "cloudify_visitor_id=vis-1");
        let request = Request::empty("GET", "/page", headers);

        let response = s.orchestrator.handle("p1", &request, &origin).await;
        // The edge response body survives, with A/B merged on top.
        assert_eq!(response.body_bytes().as_ref(), b"edge");
        let cookies = response.headers().get_all("set-cookie");
        assert!(cookies.iter().any(|c| c.starts_with("cloudify_ab_banner-test=on")));
        let assignments_json = response.headers().get(AB_ASSIGNMENTS_HEADER).unwrap();
        assert!(assignments_json.contains("banner-test"));
        assert!(assignments_json.contains("\"on\""));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn post_body_reaches_snapshot_but_get_does_not() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/plain");
        let post = Request::new("POST", "/submit", headers.clone(), "payload");
        let snapshot = snapshot_of(&post);
        assert_eq!(snapshot.body.as_deref(), Some("payload"));

        let get = Request::new("GET", "/submit", headers, "ignored");
        let snapshot = snapshot_of(&get);
        assert!(snapshot.body.is_none());
    }
}
