//! Counter-store error types.

use thiserror::Error;

/// Errors reported by a [`crate::CounterStore`].
///
/// `Unavailable` is the variant the fail-open policy keys on; it must
/// never be conflated with a missing key (missing keys are not errors
/// at all — they read as zero).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the connection failed mid-operation.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The store answered, but with something unintelligible.
    #[error("counter store protocol error: {0}")]
    Protocol(String),
}
