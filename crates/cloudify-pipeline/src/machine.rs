//! State-machine side effects.
//!
//! The legality graph itself lives on
//! [`cloudify_state::DeploymentStatus`]; this module wraps the store's
//! atomic transition with the audit trail every transition carries: an
//! activity record and a structured log line.

use tracing::info;

use cloudify_core::epoch_secs;
use cloudify_state::{Deployment, DeploymentStatus, LogLevel, StateResult, StateStore};

/// The externally reachable URL for a project, a pure function of its
/// slug and the base domain.
pub fn serving_url(slug: &str, base_domain: &str) -> String {
    format!("https://{slug}.{base_domain}")
}

/// Apply one transition with its side effects.
///
/// The status change is atomic in the store; the activity record and
/// log line follow it. Log level tracks the destination: ERROR gets an
/// error-level line, everything else info.
pub fn advance(
    store: &StateStore,
    id: &str,
    to: DeploymentStatus,
    url: Option<&str>,
    detail: &str,
) -> StateResult<Deployment> {
    let now = epoch_secs();
    let deployment = store.transition_deployment(id, to, url, now)?;

    let action = format!("deployment.{}", to.as_str());
    store.append_activity(&deployment.project_id, Some(id), &action, detail, now)?;

    let level = if to == DeploymentStatus::Error {
        LogLevel::Error
    } else {
        LogLevel::Info
    };
    store.append_deployment_log(id, level, detail, now)?;

    info!(deployment = %id, status = to.as_str(), "deployment advanced");
    Ok(deployment)
}
