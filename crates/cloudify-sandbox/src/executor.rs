//! EdgeExecutor — drives one sandboxed invocation end to end.
//!
//! Lookup → compile (cached) → instantiate → call entry point under a
//! wall-clock deadline → classify the outcome → record the audit
//! trail. The guest boundary is JSON text: the request snapshot goes
//! in as a JSON string and the response comes back as one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use wasmtime::component::Component;
use wasmtime::{Store, Trap};

use cloudify_core::{epoch_secs, new_id};
use cloudify_state::{EdgeInvocation, InvocationStatus, StateStore};

use crate::engine::EdgeEngine;
use crate::host::{DenyAllFetcher, EdgeFetcher, EdgeHostState, LogLine};
use crate::validate::EntryPoint;

/// Extra wall-clock slack on the outer timeout, covering host-call
/// time that the epoch deadline cannot observe.
const OUTER_TIMEOUT_GRACE: Duration = Duration::from_millis(250);

/// Serializable request snapshot handed to the guest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Absent for GET/HEAD; the orchestrator skips body reading there.
    #[serde(default)]
    pub body: Option<String>,
}

/// Response produced by a guest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

impl SandboxResponse {
    /// First header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome classification. `Timeout` is distinct from `Error` so
/// callers can alert and back off differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Success,
    Error,
    Timeout,
}

impl ExecStatus {
    fn invocation_status(self) -> InvocationStatus {
        match self {
            Self::Success => InvocationStatus::Success,
            Self::Error => InvocationStatus::Error,
            Self::Timeout => InvocationStatus::Timeout,
        }
    }
}

/// Result of one invocation.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub status: ExecStatus,
    pub response: Option<SandboxResponse>,
    pub logs: Vec<LogLine>,
    pub duration_ms: u64,
    pub memory_bytes: u64,
    pub error: Option<String>,
}

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Memory limit per invocation, bytes.
    pub memory_limit_bytes: usize,
    /// Serving region tag recorded on invocations.
    pub region: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 64 * 1024 * 1024,
            region: None,
        }
    }
}

/// The edge function executor.
///
/// Holds the shared engine, a per-function component cache (keyed by
/// `updated_at` so edits invalidate), and the injected fetcher seam.
pub struct EdgeExecutor {
    engine: EdgeEngine,
    store: StateStore,
    fetcher: Arc<dyn EdgeFetcher>,
    config: ExecutorConfig,
    /// function id → (updated_at, compiled component).
    components: Mutex<HashMap<String, (u64, Component)>>,
}

impl EdgeExecutor {
    pub fn new(engine: EdgeEngine, store: StateStore, config: ExecutorConfig) -> Self {
        Self {
            engine,
            store,
            fetcher: Arc::new(DenyAllFetcher),
            config,
            components: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the outbound-fetch seam.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn EdgeFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Execute a function against a request snapshot.
    ///
    /// Never returns an `Err`: every failure mode is folded into the
    /// outcome, and every invocation — success, error, or timeout — is
    /// recorded in the audit trail before this returns.
    pub async fn execute(
        &self,
        function_id: &str,
        snapshot: &RequestSnapshot,
        country: Option<&str>,
    ) -> ExecutionOutcome {
        let started = Instant::now();

        let function = match self.store.get_edge_function(function_id) {
            Ok(Some(function)) if function.enabled => function,
            Ok(Some(function)) => {
                return self
                    .finish(
                        function_id,
                        &function.project_id,
                        snapshot,
                        country,
                        failed(started, "edge function is disabled"),
                    )
                    .await;
            }
            Ok(None) => {
                return self
                    .finish(
                        function_id,
                        "unknown",
                        snapshot,
                        country,
                        failed(started, "edge function not found"),
                    )
                    .await;
            }
            Err(e) => {
                return self
                    .finish(
                        function_id,
                        "unknown",
                        snapshot,
                        country,
                        failed(started, &format!("state store error: {e}")),
                    )
                    .await;
            }
        };
        let project_id = function.project_id.clone();

        let outcome = self.run(&function, snapshot, started).await;
        self.finish(function_id, &project_id, snapshot, country, outcome)
            .await
    }

    /// Compile (or fetch from cache), instantiate, and call the guest.
    async fn run(
        &self,
        function: &cloudify_state::EdgeFunction,
        snapshot: &RequestSnapshot,
        started: Instant,
    ) -> ExecutionOutcome {
        let component = match self.compiled(function).await {
            Ok(component) => component,
            Err(e) => return failed(started, &format!("compile failed: {e}")),
        };

        let request_json = match serde_json::to_string(snapshot) {
            Ok(json) => json,
            Err(e) => return failed(started, &format!("snapshot encoding failed: {e}")),
        };

        let timeout = Duration::from_secs(function.timeout_secs.max(1));
        let host_state = EdgeHostState::new(
            function.env.clone(),
            self.fetcher.clone(),
            self.config.memory_limit_bytes,
        );

        let mut store = Store::new(self.engine.engine(), host_state);
        store.limiter(|state| &mut state.limiter);
        store.set_epoch_deadline(EdgeEngine::deadline_ticks(timeout));

        let instance = match self
            .engine
            .linker()
            .instantiate_async(&mut store, &component)
            .await
        {
            Ok(instance) => instance,
            Err(e) => {
                return finish_with_store(store, started, ExecStatus::Error, None, Some(format!(
                    "instantiation failed: {e}"
                )));
            }
        };

        // Entry points in priority order; validation guarantees one
        // exists for saved functions, but the lookup stays defensive
        // for records written before validation tightened.
        let mut entry = None;
        for candidate in EntryPoint::PRIORITY {
            if let Ok(func) =
                instance.get_typed_func::<(String,), (String,)>(&mut store, candidate.symbol())
            {
                entry = Some(func);
                break;
            }
        }
        let Some(func) = entry else {
            return finish_with_store(
                store,
                started,
                ExecStatus::Error,
                None,
                Some("no recognized entry point export".to_string()),
            );
        };

        let call = func.call_async(&mut store, (request_json,));
        // Bind before matching so the call future (and its borrow of
        // the store) is dropped before the arms consume the store.
        let result = tokio::time::timeout(timeout + OUTER_TIMEOUT_GRACE, call).await;
        match result {
            Err(_) => finish_with_store(
                store,
                started,
                ExecStatus::Timeout,
                None,
                Some(format!("execution exceeded {}s", timeout.as_secs())),
            ),
            Ok(Err(e)) => {
                // An epoch-deadline trap is the guest blowing its
                // wall-clock budget, not a code failure.
                if matches!(e.downcast_ref::<Trap>(), Some(Trap::Interrupt)) {
                    finish_with_store(
                        store,
                        started,
                        ExecStatus::Timeout,
                        None,
                        Some(format!("execution exceeded {}s", timeout.as_secs())),
                    )
                } else {
                    finish_with_store(
                        store,
                        started,
                        ExecStatus::Error,
                        None,
                        Some(format!("guest trapped: {e}")),
                    )
                }
            }
            Ok(Ok((response_json,))) => {
                let _ = func.post_return_async(&mut store).await;
                match serde_json::from_str::<SandboxResponse>(&response_json) {
                    Ok(response) => {
                        finish_with_store(store, started, ExecStatus::Success, Some(response), None)
                    }
                    Err(e) => finish_with_store(
                        store,
                        started,
                        ExecStatus::Error,
                        None,
                        Some(format!("guest returned malformed response: {e}")),
                    ),
                }
            }
        }
    }

    /// Fetch the compiled component, recompiling when the function has
    /// been edited since it was cached.
    async fn compiled(
        &self,
        function: &cloudify_state::EdgeFunction,
    ) -> anyhow::Result<Component> {
        let mut cache = self.components.lock().await;
        if let Some((cached_at, component)) = cache.get(&function.id) {
            if *cached_at == function.updated_at {
                return Ok(component.clone());
            }
        }
        let component = Component::new(self.engine.engine(), function.source.as_bytes())?;
        debug!(id = %function.id, "edge component compiled");
        cache.insert(function.id.clone(), (function.updated_at, component.clone()));
        Ok(component)
    }

    /// Record the invocation audit trail and hand the outcome back.
    /// Recording happens on every path — the audit trail is not
    /// skippable.
    async fn finish(
        &self,
        function_id: &str,
        project_id: &str,
        snapshot: &RequestSnapshot,
        country: Option<&str>,
        outcome: ExecutionOutcome,
    ) -> ExecutionOutcome {
        let invocation = EdgeInvocation {
            id: new_id(),
            function_id: function_id.to_string(),
            project_id: project_id.to_string(),
            status: outcome.status.invocation_status(),
            duration_ms: outcome.duration_ms,
            memory_bytes: outcome.memory_bytes,
            region: self.config.region.clone(),
            country: country.map(str::to_string),
            path: snapshot.url.clone(),
            method: snapshot.method.clone(),
            response_status: outcome.response.as_ref().map(|r| r.status),
            error: outcome.error.clone(),
            created_at: epoch_secs(),
        };
        if let Err(e) = self.store.append_invocation(&invocation) {
            error!(function = %function_id, error = %e, "failed to record invocation");
        }
        if outcome.status != ExecStatus::Success {
            warn!(
                function = %function_id,
                status = ?outcome.status,
                error = outcome.error.as_deref().unwrap_or(""),
                "edge invocation did not succeed"
            );
        }
        outcome
    }
}

/// Build a failure outcome with no store to harvest.
fn failed(started: Instant, message: &str) -> ExecutionOutcome {
    ExecutionOutcome {
        status: ExecStatus::Error,
        response: None,
        logs: Vec::new(),
        duration_ms: started.elapsed().as_millis() as u64,
        memory_bytes: 0,
        error: Some(message.to_string()),
    }
}

/// Harvest logs and peak memory out of the store and close the outcome.
fn finish_with_store(
    store: Store<EdgeHostState>,
    started: Instant,
    status: ExecStatus,
    response: Option<SandboxResponse>,
    error: Option<String>,
) -> ExecutionOutcome {
    let state = store.into_data();
    ExecutionOutcome {
        status,
        response,
        logs: state.logs,
        duration_ms: started.elapsed().as_millis() as u64,
        memory_bytes: state.limiter.peak_memory() as u64,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudify_state::InvocationStatus;
    use std::collections::HashMap as StdHashMap;

    /// Component whose entry point ignores the request and returns the
    /// given JSON document.
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

    /// Component that spins forever.
    fn spinning_component() -> String {
        r#"(component
  (core module $m
    (memory (export "memory") 1)
    (func (export "realloc") (param i32 i32 i32 i32) (result i32) (i32.const 0))
    (func (export "run") (param i32 i32) (result i32)
      (loop $spin (br $spin))
      (i32.const 8))
  )
  (core instance $i (instantiate $m))
  (func (export "handler") (param "request" string) (result string)
    (canon lift (core func $i "run") (memory $i "memory") (realloc (func $i "realloc"))))
)"#
        .to_string()
    }

    /// Component that traps immediately.
    fn trapping_component() -> String {
        r#"(component
  (core module $m
    (memory (export "memory") 1)
    (func (export "realloc") (param i32 i32 i32 i32) (result i32) (i32.const 0))
    (func (export "run") (param i32 i32) (result i32)
      unreachable)
  )
  (core instance $i (instantiate $m))
  (func (export "handler") (param "request" string) (result string)
    (canon lift (core func $i "run") (memory $i "memory") (realloc (func $i "realloc"))))
)"#
        .to_string()
    }

    fn save_function(
        store: &StateStore,
        id: &str,
        source: String,
        enabled: bool,
        timeout_secs: u64,
    ) {
        store
            .put_edge_function(&cloudify_state::EdgeFunction {
                id: id.to_string(),
                project_id: "p1".to_string(),
                name: format!("fn-{id}"),
                source,
                routes: vec!["/api/*".to_string()],
                enabled,
                timeout_secs,
                env: StdHashMap::new(),
                created_at: 1000,
                updated_at: 1000,
            })
            .unwrap();
    }

    fn snapshot(path: &str) -> RequestSnapshot {
        RequestSnapshot {
            method: "GET".to_string(),
            url: path.to_string(),
            headers: vec![("host".to_string(), "example.test".to_string())],
            body: None,
        }
    }

    fn executor(store: &StateStore) -> (EdgeExecutor, crate::engine::EpochTicker) {
        let engine = EdgeEngine::new().unwrap();
        let ticker = engine.spawn_epoch_ticker();
        (
            EdgeExecutor::new(engine, store.clone(), ExecutorConfig::default()),
            ticker,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_returns_parsed_response_and_records() {
        let store = StateStore::open_in_memory().unwrap();
        let json = r#"{"status":200,"headers":[["x-edge","1"]],"body":"hello"}"#;
        save_function(&store, "f1", static_component("handler", json), true, 5);
        let (executor, _ticker) = executor(&store);

        let outcome = executor.execute("f1", &snapshot("/api/test"), Some("US")).await;
        assert_eq!(outcome.status, ExecStatus::Success);
        let response = outcome.response.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.header("X-Edge"), Some("1"));
        assert_eq!(response.body, "hello");
        assert!(outcome.error.is_none());

        let invocations = store.list_invocations_for_function("f1", 10).unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].status, InvocationStatus::Success);
        assert_eq!(invocations[0].response_status, Some(200));
        assert_eq!(invocations[0].country.as_deref(), Some("US"));
        assert_eq!(invocations[0].path, "/api/test");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn middleware_export_takes_priority() {
        let store = StateStore::open_in_memory().unwrap();
        let json = r#"{"status":204,"headers":[],"body":""}"#;
        save_function(&store, "f1", static_component("middleware", json), true, 5);
        let (executor, _ticker) = executor(&store);

        let outcome = executor.execute("f1", &snapshot("/x"), None).await;
        assert_eq!(outcome.status, ExecStatus::Success);
        assert_eq!(outcome.response.unwrap().status, 204);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn spinning_guest_times_out_not_errors() {
        let store = StateStore::open_in_memory().unwrap();
        save_function(&store, "f1", spinning_component(), true, 1);
        let (executor, _ticker) = executor(&store);

        let outcome = executor.execute("f1", &snapshot("/spin"), None).await;
        assert_eq!(outcome.status, ExecStatus::Timeout);
        assert!(outcome.response.is_none());
        assert!(outcome.error.unwrap().contains("exceeded"));
        // The deadline fired near the configured second, not instantly.
        assert!(outcome.duration_ms >= 900, "duration {}", outcome.duration_ms);

        let invocations = store.list_invocations_for_function("f1", 10).unwrap();
        assert_eq!(invocations[0].status, InvocationStatus::Timeout);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn trapping_guest_is_an_error() {
        let store = StateStore::open_in_memory().unwrap();
        save_function(&store, "f1", trapping_component(), true, 5);
        let (executor, _ticker) = executor(&store);

        let outcome = executor.execute("f1", &snapshot("/boom"), None).await;
        assert_eq!(outcome.status, ExecStatus::Error);
        assert!(outcome.error.unwrap().contains("trapped"));

        let invocations = store.list_invocations_for_function("f1", 10).unwrap();
        assert_eq!(invocations[0].status, InvocationStatus::Error);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_guest_response_is_an_error() {
        let store = StateStore::open_in_memory().unwrap();
        save_function(
            &store,
            "f1",
            static_component("handler", "this is not json"),
            true,
            5,
        );
        let (executor, _ticker) = executor(&store);

        let outcome = executor.execute("f1", &snapshot("/x"), None).await;
        assert_eq!(outcome.status, ExecStatus::Error);
        assert!(outcome.error.unwrap().contains("malformed"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_function_fails_fast_but_records() {
        let store = StateStore::open_in_memory().unwrap();
        let (executor, _ticker) = executor(&store);

        let outcome = executor.execute("ghost", &snapshot("/x"), None).await;
        assert_eq!(outcome.status, ExecStatus::Error);
        assert!(outcome.error.unwrap().contains("not found"));

        let invocations = store.list_invocations_for_function("ghost", 10).unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].status, InvocationStatus::Error);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disabled_function_fails_fast() {
        let store = StateStore::open_in_memory().unwrap();
        let json = r#"{"status":200,"headers":[],"body":""}"#;
        save_function(&store, "f1", static_component("handler", json), false, 5);
        let (executor, _ticker) = executor(&store);

        let outcome = executor.execute("f1", &snapshot("/x"), None).await;
        assert_eq!(outcome.status, ExecStatus::Error);
        assert!(outcome.error.unwrap().contains("disabled"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn component_cache_invalidates_on_update() {
        let store = StateStore::open_in_memory().unwrap();
        let first = r#"{"status":200,"headers":[],"body":"v1"}"#;
        save_function(&store, "f1", static_component("handler", first), true, 5);
        let (executor, _ticker) = executor(&store);

        let outcome = executor.execute("f1", &snapshot("/x"), None).await;
        assert_eq!(outcome.response.unwrap().body, "v1");

        // Edit the function; updated_at moves, the cache must recompile.
        let mut function = store.get_edge_function("f1").unwrap().unwrap();
        function.source =
            static_component("handler", r#"{"status":200,"headers":[],"body":"v2"}"#);
        function.updated_at = 2000;
        store.put_edge_function(&function).unwrap();

        let outcome = executor.execute("f1", &snapshot("/x"), None).await;
        assert_eq!(outcome.response.unwrap().body, "v2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_invocations_are_independent() {
        let store = StateStore::open_in_memory().unwrap();
        let json = r#"{"status":200,"headers":[],"body":"ok"}"#;
        save_function(&store, "f1", static_component("handler", json), true, 5);
        let engine = EdgeEngine::new().unwrap();
        let _ticker = engine.spawn_epoch_ticker();
        let executor = Arc::new(EdgeExecutor::new(
            engine,
            store.clone(),
            ExecutorConfig::default(),
        ));

        let mut handles = Vec::new();
        for i in 0..8 {
            let executor = Arc::clone(&executor);
            handles.push(tokio::spawn(async move {
                executor
                    .execute("f1", &snapshot(&format!("/req/{i}")), None)
                    .await
            }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome.status, ExecStatus::Success);
        }
        let invocations = store.list_invocations_for_function("f1", 20).unwrap();
        assert_eq!(invocations.len(), 8);
    }
}
