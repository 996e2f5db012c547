//! Counter-store abstraction and its two implementations.
//!
//! The rate limiter and ban list never touch a concrete store
//! directly; they go through [`CounterStore`], whose operations are
//! store-native atomics (increment-with-expiry, set-with-expiry). No
//! client-side read-modify-write is permitted anywhere in this crate.
//!
//! [`MemoryCounterStore`] is the process-local backend;
//! [`RedisCounterStore`] speaks RESP over TCP to a shared store.
//! [`CounterBackend`] selects between them from configuration.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use cloudify_core::epoch_millis;

use crate::error::StoreError;

/// Result of an atomic increment: the post-increment count and when
/// the window resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterValue {
    pub count: i64,
    pub reset_at_ms: u64,
}

/// Atomic counter operations with TTL semantics.
///
/// Implementations must make `increment` atomic: two concurrent calls
/// for the same key observe distinct counts.
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, starting a window of `ttl` on the
    /// first increment. Returns the new count and the window reset time.
    fn increment(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<CounterValue, StoreError>> + Send;

    /// Set `key` (to an opaque marker) with an expiry of `ttl`.
    fn set_expiring(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Whether `key` currently exists (i.e. has not expired).
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ── MemoryCounterStore ─────────────────────────────────────────────

#[derive(Debug, Clone)]
struct MemoryEntry {
    count: i64,
    expires_at_ms: u64,
}

/// Process-local counter store.
///
/// Suitable for single-node deployments and tests. Expired entries
/// are treated as absent on access and reaped by
/// [`MemoryCounterStore::purge_expired`].
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all expired entries. Call periodically to bound memory.
    pub async fn purge_expired(&self) -> usize {
        let now = epoch_millis();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at_ms > now);
        before - entries.len()
    }

    /// Number of live (non-expired) keys. Test/diagnostic helper.
    pub async fn len(&self) -> usize {
        let now = epoch_millis();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.expires_at_ms > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterValue, StoreError> {
        let now = epoch_millis();
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.expires_at_ms <= now {
                    // Window elapsed — start a fresh one.
                    entry.count = 0;
                    entry.expires_at_ms = now + ttl.as_millis() as u64;
                }
            })
            .or_insert_with(|| MemoryEntry {
                count: 0,
                expires_at_ms: now + ttl.as_millis() as u64,
            });
        entry.count += 1;
        Ok(CounterValue {
            count: entry.count,
            reset_at_ms: entry.expires_at_ms,
        })
    }

    async fn set_expiring(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = epoch_millis();
        self.entries.lock().await.insert(
            key.to_string(),
            MemoryEntry {
                count: 1,
                expires_at_ms: now + ttl.as_millis() as u64,
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = epoch_millis();
        Ok(self
            .entries
            .lock()
            .await
            .get(key)
            .is_some_and(|entry| entry.expires_at_ms > now))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

// ── RedisCounterStore ──────────────────────────────────────────────

/// Shared counter store speaking RESP over TCP.
///
/// Uses `INCR` + `EXPIRE` for windows and `SET PX` for TTL markers —
/// all atomic on the server side. Connection failures surface as
/// [`StoreError::Unavailable`] so callers can fail open.
pub struct RedisCounterStore {
    addr: String,
    connect_timeout: Duration,
    conn: Mutex<Option<TcpStream>>,
}

impl RedisCounterStore {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(2),
            conn: Mutex::new(None),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Run `commands` on the pooled connection, reconnecting once if
    /// needed, and return one reply per command.
    async fn run(&self, commands: &[Vec<&str>]) -> Result<Vec<Reply>, StoreError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
                .await
                .map_err(|_| StoreError::Unavailable(format!("connect timeout to {}", self.addr)))?
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            *guard = Some(stream);
        }
        let stream = guard.as_mut().expect("connection just established");

        let mut payload = Vec::new();
        for command in commands {
            encode_command(&mut payload, command);
        }
        if let Err(e) = stream.write_all(&payload).await {
            *guard = None;
            return Err(StoreError::Unavailable(e.to_string()));
        }

        let mut replies = Vec::with_capacity(commands.len());
        let mut buf = Vec::new();
        for _ in commands {
            match read_reply(stream, &mut buf).await {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    *guard = None;
                    return Err(e);
                }
            }
        }
        Ok(replies)
    }
}

impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterValue, StoreError> {
        let ttl_secs = ttl.as_secs().max(1).to_string();
        // EXPIRE ... NX only sets the TTL when none exists, i.e. on the
        // first increment of a window.
        let replies = self
            .run(&[
                vec!["INCR", key],
                vec!["EXPIRE", key, &ttl_secs, "NX"],
            ])
            .await?;
        let count = match replies.first() {
            Some(Reply::Integer(n)) => *n,
            other => {
                return Err(StoreError::Protocol(format!(
                    "INCR returned {other:?}"
                )))
            }
        };
        Ok(CounterValue {
            count,
            reset_at_ms: epoch_millis() + ttl.as_millis() as u64,
        })
    }

    async fn set_expiring(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let px = ttl.as_millis().max(1).to_string();
        let replies = self
            .run(&[vec!["SET", key, "1", "PX", &px]])
            .await?;
        match replies.first() {
            Some(Reply::Simple(s)) if s == "OK" => Ok(()),
            other => Err(StoreError::Protocol(format!("SET returned {other:?}"))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let replies = self.run(&[vec!["EXISTS", key]]).await?;
        match replies.first() {
            Some(Reply::Integer(n)) => Ok(*n > 0),
            other => Err(StoreError::Protocol(format!("EXISTS returned {other:?}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let replies = self.run(&[vec!["DEL", key]]).await?;
        match replies.first() {
            Some(Reply::Integer(_)) => Ok(()),
            other => Err(StoreError::Protocol(format!("DEL returned {other:?}"))),
        }
    }
}

/// RESP reply subset the counter store cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
}

/// Encode one command in RESP array-of-bulk-strings form.
fn encode_command(out: &mut Vec<u8>, parts: &[&str]) {
    out.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// Read one RESP reply from the stream, buffering as needed.
async fn read_reply(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<Reply, StoreError> {
    loop {
        if let Some((reply, consumed)) = parse_reply(buf)? {
            buf.drain(..consumed);
            if let Reply::Error(message) = &reply {
                return Err(StoreError::Protocol(message.clone()));
            }
            return Ok(reply);
        }
        let mut chunk = [0u8; 4096];
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if n == 0 {
            return Err(StoreError::Unavailable("connection closed".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Parse one reply from the front of `buf`. Returns `None` when more
/// bytes are needed.
fn parse_reply(buf: &[u8]) -> Result<Option<(Reply, usize)>, StoreError> {
    let Some(line_end) = find_crlf(buf) else {
        return Ok(None);
    };
    if line_end == 0 {
        return Err(StoreError::Protocol("reply missing type byte".to_string()));
    }
    let line = std::str::from_utf8(&buf[1..line_end])
        .map_err(|e| StoreError::Protocol(e.to_string()))?;
    let after_line = line_end + 2;
    match buf.first() {
        Some(b'+') => Ok(Some((Reply::Simple(line.to_string()), after_line))),
        Some(b'-') => Ok(Some((Reply::Error(line.to_string()), after_line))),
        Some(b':') => {
            let n = line
                .parse::<i64>()
                .map_err(|e| StoreError::Protocol(e.to_string()))?;
            Ok(Some((Reply::Integer(n), after_line)))
        }
        Some(b'$') => {
            let len = line
                .parse::<i64>()
                .map_err(|e| StoreError::Protocol(e.to_string()))?;
            if len < 0 {
                return Ok(Some((Reply::Bulk(None), after_line)));
            }
            let len = len as usize;
            if buf.len() < after_line + len + 2 {
                return Ok(None);
            }
            let data = buf[after_line..after_line + len].to_vec();
            Ok(Some((Reply::Bulk(Some(data)), after_line + len + 2)))
        }
        Some(other) => Err(StoreError::Protocol(format!(
            "unexpected reply type byte {other:#x}"
        ))),
        None => Ok(None),
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

// ── CounterBackend ─────────────────────────────────────────────────

/// Configuration-selected counter backend.
///
/// The memory backend is the default; the Redis backend is chosen
/// when `store.counter_backend = "redis"` and an address is supplied.
pub enum CounterBackend {
    Memory(MemoryCounterStore),
    Redis(RedisCounterStore),
}

impl CounterBackend {
    /// Build a backend from configuration values. Unknown backend
    /// names and a missing Redis address fall back to memory.
    pub fn from_config(backend: &str, redis_addr: Option<&str>) -> Self {
        match (backend, redis_addr) {
            ("redis", Some(addr)) => Self::Redis(RedisCounterStore::new(addr)),
            ("redis", None) => {
                tracing::warn!("redis backend selected but no address configured; using memory");
                Self::Memory(MemoryCounterStore::new())
            }
            _ => Self::Memory(MemoryCounterStore::new()),
        }
    }
}

impl CounterStore for CounterBackend {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterValue, StoreError> {
        match self {
            Self::Memory(store) => store.increment(key, ttl).await,
            Self::Redis(store) => store.increment(key, ttl).await,
        }
    }

    async fn set_expiring(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.set_expiring(key, ttl).await,
            Self::Redis(store) => store.set_expiring(key, ttl).await,
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self {
            Self::Memory(store) => store.exists(key).await,
            Self::Redis(store) => store.exists(key).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.delete(key).await,
            Self::Redis(store) => store.delete(key).await,
        }
    }
}
