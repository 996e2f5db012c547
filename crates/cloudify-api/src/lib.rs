//! cloudify-api — REST API for Cloudify.
//!
//! Provides axum route handlers for triggering, inspecting, and
//! cancelling deployments, behind a rate-limiting layer.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/deploy` | Create a deployment (QUEUED) and start the pipeline |
//! | GET | `/deploy?id=` | Deployment detail including ordered logs |
//! | GET | `/deploy?projectId=` | Paginated deployment list for a project |
//! | DELETE | `/deploy?id=` | Cancel; fails once DEPLOYING or terminal |
//!
//! Rate-limit violations answer 429 with `Retry-After` and
//! `X-RateLimit-*` headers; banned callers answer 403.

pub mod handlers;
pub mod ratelimit;

use std::sync::Arc;

use axum::routing::post;
use axum::Router;

use cloudify_pipeline::BuildPipeline;
use cloudify_ratelimit::CounterBackend;
use cloudify_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub pipeline: Arc<BuildPipeline>,
    pub counters: Arc<CounterBackend>,
}

/// Build the API router with the rate-limit layer applied.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/deploy",
            post(handlers::trigger_deploy)
                .get(handlers::get_deployments)
                .delete(handlers::cancel_deployment),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            ratelimit::rate_limit_layer,
        ))
        .with_state(state)
}
