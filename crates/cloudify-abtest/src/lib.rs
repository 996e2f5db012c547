//! cloudify-abtest — the A/B assignment engine.
//!
//! Variant assignment is deterministic: a SHA-256 hash of
//! `testId:visitorId` drives the draw, so the same visitor lands on
//! the same variant for a given test even when two requests race to
//! create the participant record. Stickiness is then reinforced by
//! storage — once a participant record exists it is always reused.
//!
//! Targeting rules (country, device, browser, percentage gate, URL
//! patterns) filter requests before a participant record exists. The
//! percentage gate is a fresh probabilistic roll per request until the
//! visitor sticks; this mirrors the production behavior and is
//! recorded as a known quirk rather than silently changed.

pub mod assign;
pub mod engine;
pub mod error;
pub mod results;

pub use assign::{deterministic_draw, pick_variant, validate_variants, RequestContext};
pub use engine::{AbTestEngine, Assignment};
pub use error::{AbTestError, AbTestResult};
pub use results::{compute_results, TestResults, VariantResult};
