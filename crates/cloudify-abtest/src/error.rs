//! Error types for the A/B engine.

use thiserror::Error;

pub type AbTestResult<T> = Result<T, AbTestError>;

#[derive(Debug, Error)]
pub enum AbTestError {
    /// Variant weights must sum to exactly 100; they are never
    /// normalized on the caller's behalf.
    #[error("variant weights sum to {0}, expected exactly 100")]
    InvalidWeights(u32),

    #[error("a test needs at least one variant")]
    NoVariants,

    #[error(transparent)]
    State(#[from] cloudify_state::StateError),
}
