//! cloudify-pipeline — drives deployments through their lifecycle.
//!
//! A deployment is created QUEUED by [`BuildPipeline::trigger_deploy`]
//! (after synchronous build-command validation) and advanced
//! BUILDING → DEPLOYING → READY by [`BuildPipeline::run`]. Failures at
//! any stage land in ERROR with an error-level log line; there is no
//! automatic retry — a retry is a new deployment.
//!
//! Transitions go through the state store's compare-and-swap, so a
//! concurrent cancellation and a pipeline advance cannot corrupt the
//! terminal-state invariant: whichever commits first wins and the
//! loser observes it. Cancellation is rejected outright once
//! DEPLOYING has begun.
//!
//! The actual build/publish work lives behind [`BuildDriver`] — the
//! seam to the external build system.

pub mod error;
pub mod machine;
pub mod runner;

pub use error::{PipelineError, PipelineResult};
pub use machine::serving_url;
pub use runner::{BoxDriverFuture, BuildDriver, BuildPipeline, DeployRequest, InstantDriver};
