//! cloudify-state — embedded state store for Cloudify.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and
//! in-memory state management for deployments, deployment logs,
//! activity records, edge functions, edge invocations, A/B tests,
//! participants, and conversions.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value
//! columns. Composite keys (`{parent_id}:{child}`) enable efficient
//! prefix scans for related records, and zero-padded sequence numbers
//! keep appended records ordered.
//!
//! redb serializes write transactions, which gives the deployment
//! status transition its compare-and-swap semantics: a stale
//! transition attempt observes the committed status of the previous
//! writer and is rejected inside the same transaction.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
