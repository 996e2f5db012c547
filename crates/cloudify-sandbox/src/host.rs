//! Per-invocation host state and the capability seam.
//!
//! Each invocation gets a fresh [`EdgeHostState`]: a log buffer, the
//! function's environment map, an injected [`EdgeFetcher`], and a
//! memory limiter. The state implements the generated
//! `cloudify:edge/host` trait, which is the guest's entire view of
//! the world.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use wasmtime::ResourceLimiter;

use crate::bindings::cloudify::edge::host as wit_host;

/// One log line captured from a guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub level: String,
    pub message: String,
}

/// Outbound request a guest hands to the host for mediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Response the host returns for a mediated fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

/// The isolation seam for outbound traffic.
///
/// The sandbox never opens sockets on a guest's behalf; it hands the
/// parsed request to this trait. Hosts inject an implementation that
/// routes internally, proxies with policy, or denies.
pub trait EdgeFetcher: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, String>;
}

/// Default fetcher: denies everything.
pub struct DenyAllFetcher;

impl EdgeFetcher for DenyAllFetcher {
    fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, String> {
        Err(format!("outbound fetch denied: {} {}", request.method, request.url))
    }
}

/// Memory/table limiter tracking peak guest usage.
///
/// Denying growth (rather than trapping eagerly) lets the guest
/// observe the failed allocation; the peak is reported in the
/// invocation audit record.
pub struct EdgeLimiter {
    memory_limit: usize,
    table_limit: usize,
    peak_memory: usize,
}

impl EdgeLimiter {
    pub fn new(memory_limit: usize) -> Self {
        Self {
            memory_limit,
            table_limit: 10_000,
            peak_memory: 0,
        }
    }

    /// Peak memory observed across the invocation, in bytes.
    pub fn peak_memory(&self) -> usize {
        self.peak_memory
    }
}

impl ResourceLimiter for EdgeLimiter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired > self.memory_limit {
            tracing::warn!(
                current,
                desired,
                limit = self.memory_limit,
                "guest memory growth denied"
            );
            return Ok(false);
        }
        self.peak_memory = self.peak_memory.max(desired);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired > self.table_limit {
            tracing::warn!(
                current,
                desired,
                limit = self.table_limit,
                "guest table growth denied"
            );
            return Ok(false);
        }
        Ok(true)
    }
}

/// Per-invocation host state.
pub struct EdgeHostState {
    pub logs: Vec<LogLine>,
    pub env: HashMap<String, String>,
    pub fetcher: Arc<dyn EdgeFetcher>,
    pub limiter: EdgeLimiter,
}

impl EdgeHostState {
    pub fn new(
        env: HashMap<String, String>,
        fetcher: Arc<dyn EdgeFetcher>,
        memory_limit: usize,
    ) -> Self {
        Self {
            logs: Vec::new(),
            env,
            fetcher,
            limiter: EdgeLimiter::new(memory_limit),
        }
    }
}

fn level_str(level: wit_host::LogLevel) -> &'static str {
    match level {
        wit_host::LogLevel::Debug => "debug",
        wit_host::LogLevel::Info => "info",
        wit_host::LogLevel::Warn => "warn",
        wit_host::LogLevel::Error => "error",
    }
}

impl wit_host::Host for EdgeHostState {
    fn log(&mut self, level: wit_host::LogLevel, message: String) {
        self.logs.push(LogLine {
            level: level_str(level).to_string(),
            message,
        });
    }

    fn fetch(&mut self, request_json: String) -> Result<String, String> {
        let request: FetchRequest = serde_json::from_str(&request_json)
            .map_err(|e| format!("malformed fetch request: {e}"))?;
        let response = self.fetcher.fetch(request)?;
        serde_json::to_string(&response).map_err(|e| format!("response encoding failed: {e}"))
    }

    fn env_get(&mut self, name: String) -> Option<String> {
        self.env.get(&name).cloned()
    }

    fn random_uuid(&mut self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn random_bytes(&mut self, len: u32) -> Vec<u8> {
        // Cap to keep a hostile guest from asking for gigabytes.
        let len = len.min(64 * 1024) as usize;
        let mut bytes = vec![0u8; len];
        if getrandom::getrandom(&mut bytes).is_err() {
            tracing::error!("host entropy source failed");
        }
        bytes
    }

    fn now_ms(&mut self) -> u64 {
        cloudify_core::epoch_millis()
    }
}
