//! cloudify-sandbox — request-scoped execution of untrusted edge
//! functions.
//!
//! Edge functions are WebAssembly components (stored as WAT text) run
//! under Wasmtime. The capability boundary is the embedding: the
//! linker exposes exactly the `cloudify:edge/host` interface (log,
//! host-mediated fetch, env, randomness, clock) and nothing else — no
//! WASI, no filesystem, no sockets. Static source validation
//! ([`validate::validate_edge_function_code`]) is a pre-flight filter
//! run at save time, not the isolation mechanism.
//!
//! Each invocation gets a fresh `Store` with its own memory limiter
//! and an epoch deadline derived from the function's configured
//! timeout; a background ticker advances the engine epoch so runaway
//! guests trap. A timed-out invocation yields a `Timeout` outcome,
//! distinct from `Error`, and every invocation — success, error, or
//! timeout — lands in the append-only audit trail.

pub mod bindings;
pub mod engine;
pub mod executor;
pub mod host;
pub mod validate;

pub use engine::{EdgeEngine, EpochTicker, EPOCH_TICK};
pub use executor::{
    EdgeExecutor, ExecStatus, ExecutionOutcome, ExecutorConfig, RequestSnapshot, SandboxResponse,
};
pub use host::{DenyAllFetcher, EdgeFetcher, EdgeHostState, FetchRequest, FetchResponse, LogLine};
pub use validate::{validate_edge_function_code, EntryPoint, ValidationError};
