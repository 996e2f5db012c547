//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore`/`BuildPipeline` and
//! returns JSON responses in a `{success, data?, error?}` envelope.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use cloudify_pipeline::{DeployRequest, PipelineError};
use cloudify_state::{Deployment, DeploymentLog, StateError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

// ── POST /deploy ───────────────────────────────────────────────

/// Deploy trigger body. Accepts both snake_case and the camelCase the
/// dashboard sends.
#[derive(Deserialize)]
pub struct DeployBody {
    #[serde(alias = "projectId")]
    pub project_id: String,
    #[serde(default, alias = "projectSlug")]
    pub project_slug: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default, alias = "commitSha")]
    pub commit_sha: Option<String>,
    #[serde(default, alias = "commitMsg")]
    pub commit_message: Option<String>,
    #[serde(default, alias = "buildCommand")]
    pub build_command: Option<String>,
}

/// POST /deploy — create a QUEUED deployment and start the pipeline.
pub async fn trigger_deploy(
    State(state): State<ApiState>,
    Json(body): Json<DeployBody>,
) -> impl IntoResponse {
    let request = DeployRequest {
        project_slug: body
            .project_slug
            .unwrap_or_else(|| body.project_id.clone()),
        project_id: body.project_id,
        branch: body.branch.unwrap_or_else(|| "main".to_string()),
        commit_sha: body.commit_sha,
        commit_message: body.commit_message,
        build_command: body.build_command,
    };

    match state.pipeline.trigger_deploy(&request) {
        Ok(deployment) => {
            // Drive the pipeline in the background; the trigger
            // request only waits for the QUEUED record.
            let pipeline = state.pipeline.clone();
            let id = deployment.id.clone();
            tokio::spawn(async move {
                if let Err(e) = pipeline.run(&id).await {
                    error!(deployment = %id, error = %e, "pipeline run failed");
                }
            });
            (StatusCode::CREATED, ApiResponse::ok(deployment)).into_response()
        }
        Err(PipelineError::InvalidBuildCommand { reason }) => {
            error_response(&format!("invalid build command: {reason}"), StatusCode::BAD_REQUEST)
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── GET /deploy ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DeployQuery {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "projectId")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Deployment detail with its ordered logs.
#[derive(Serialize)]
pub struct DeploymentDetail {
    #[serde(flatten)]
    pub deployment: Deployment,
    pub logs: Vec<DeploymentLog>,
}

/// GET /deploy — detail by `id`, or a paginated list by `projectId`.
pub async fn get_deployments(
    State(state): State<ApiState>,
    Query(query): Query<DeployQuery>,
) -> impl IntoResponse {
    if let Some(id) = query.id {
        return match state.store.get_deployment(&id) {
            Ok(Some(deployment)) => match state.store.list_deployment_logs(&id) {
                Ok(logs) => ApiResponse::ok(DeploymentDetail { deployment, logs }).into_response(),
                Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
            },
            Ok(None) => error_response("deployment not found", StatusCode::NOT_FOUND),
            Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
        };
    }

    if let Some(project_id) = query.project_id {
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(20).min(100);
        return match state
            .store
            .list_deployments_for_project(&project_id, offset, limit)
        {
            Ok(deployments) => ApiResponse::ok(deployments).into_response(),
            Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
        };
    }

    error_response("either id or projectId is required", StatusCode::BAD_REQUEST)
}

// ── DELETE /deploy ─────────────────────────────────────────────

/// DELETE /deploy?id= — cancellation attempt. Succeeds only while the
/// deployment is QUEUED or BUILDING; anything later is a definite 409.
pub async fn cancel_deployment(
    State(state): State<ApiState>,
    Query(query): Query<DeployQuery>,
) -> impl IntoResponse {
    let Some(id) = query.id else {
        return error_response("id is required", StatusCode::BAD_REQUEST);
    };

    match state.pipeline.cancel(&id) {
        Ok(deployment) => ApiResponse::ok(deployment).into_response(),
        Err(PipelineError::CancelDenied { status, .. }) => error_response(
            &format!("cannot cancel a {} deployment", status.as_str()),
            StatusCode::CONFLICT,
        ),
        Err(PipelineError::State(StateError::NotFound(_))) => {
            error_response("deployment not found", StatusCode::NOT_FOUND)
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}
