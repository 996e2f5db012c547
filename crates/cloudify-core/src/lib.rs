//! cloudify-core — shared foundation for the Cloudify workspace.
//!
//! Holds the pieces every other crate needs: the `cloudify.toml`
//! configuration model, entity identifier helpers, slug derivation,
//! epoch timestamps, and glob-pattern matching for edge-function
//! routes and A/B URL targeting.

pub mod config;
pub mod pattern;
pub mod types;

pub use config::CloudifyConfig;
pub use pattern::{glob_match, glob_to_regex};
pub use types::{epoch_millis, epoch_secs, new_id, slugify};
