//! Pipeline error types.

use thiserror::Error;

use cloudify_state::DeploymentStatus;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The build command failed validation; nothing was created.
    #[error("invalid build command: {reason}")]
    InvalidBuildCommand { reason: String },

    /// Cancellation was requested from a state that doesn't admit it.
    /// Callers get a definite rejection, never a silent no-op.
    #[error("deployment {id} cannot be cancelled from {status:?}")]
    CancelDenied {
        id: String,
        status: DeploymentStatus,
    },

    #[error(transparent)]
    State(#[from] cloudify_state::StateError),
}
