//! BuildPipeline — triggers, drives, and cancels deployments.

use std::pin::Pin;
use std::sync::Arc;

use tracing::{info, warn};

use cloudify_core::{epoch_secs, new_id};
use cloudify_security::is_valid_build_command;
use cloudify_state::{Deployment, DeploymentStatus, StateError, StateStore};

use crate::error::{PipelineError, PipelineResult};
use crate::machine::{advance, serving_url};

/// Future type returned by [`BuildDriver`] methods.
pub type BoxDriverFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Seam to the external build system.
///
/// `build` produces the artifact; `publish` makes it servable. Errors
/// are plain strings — they become the deployment's error log line.
pub trait BuildDriver: Send + Sync {
    fn build(&self, deployment: &Deployment) -> BoxDriverFuture;
    fn publish(&self, deployment: &Deployment) -> BoxDriverFuture;
}

/// Driver that completes both stages immediately. Used in standalone
/// mode and as the default test collaborator.
pub struct InstantDriver;

impl BuildDriver for InstantDriver {
    fn build(&self, _deployment: &Deployment) -> BoxDriverFuture {
        Box::pin(async { Ok(()) })
    }

    fn publish(&self, _deployment: &Deployment) -> BoxDriverFuture {
        Box::pin(async { Ok(()) })
    }
}

/// What a deploy trigger carries.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub project_id: String,
    pub project_slug: String,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    /// Validated synchronously; an empty command is a no-op build.
    pub build_command: Option<String>,
}

/// The deployment pipeline.
pub struct BuildPipeline {
    store: StateStore,
    driver: Arc<dyn BuildDriver>,
    base_domain: String,
}

impl BuildPipeline {
    pub fn new(store: StateStore, driver: Arc<dyn BuildDriver>, base_domain: &str) -> Self {
        Self {
            store,
            driver,
            base_domain: base_domain.to_string(),
        }
    }

    /// Validate the request and create a QUEUED deployment.
    ///
    /// Validation failures propagate synchronously; nothing is
    /// persisted for a rejected request.
    pub fn trigger_deploy(&self, request: &DeployRequest) -> PipelineResult<Deployment> {
        if let Some(command) = &request.build_command {
            let verdict = is_valid_build_command(command);
            if !verdict.valid {
                return Err(PipelineError::InvalidBuildCommand {
                    reason: verdict.reason.unwrap_or_else(|| "rejected".to_string()),
                });
            }
        }

        let now = epoch_secs();
        let deployment = Deployment {
            id: new_id(),
            project_id: request.project_id.clone(),
            project_slug: request.project_slug.clone(),
            status: DeploymentStatus::Queued,
            branch: request.branch.clone(),
            commit_sha: request.commit_sha.clone(),
            commit_message: request.commit_message.clone(),
            created_at: now,
            finished_at: None,
            url: None,
        };
        self.store.put_deployment(&deployment)?;
        self.store.append_activity(
            &deployment.project_id,
            Some(&deployment.id),
            "deployment.queued",
            &format!("deploy queued for branch {}", deployment.branch),
            now,
        )?;
        self.store.append_deployment_log(
            &deployment.id,
            cloudify_state::LogLevel::Info,
            &format!("deployment queued (branch {})", deployment.branch),
            now,
        )?;
        info!(deployment = %deployment.id, branch = %deployment.branch, "deploy triggered");
        Ok(deployment)
    }

    /// Drive a queued deployment to a terminal state.
    ///
    /// Build/publish failures are captured as ERROR in the record —
    /// they are not returned as `Err`. A concurrent cancellation that
    /// wins a transition race simply ends the run with the cancelled
    /// record.
    pub async fn run(&self, deployment_id: &str) -> PipelineResult<Deployment> {
        let deployment = match advance(
            &self.store,
            deployment_id,
            DeploymentStatus::Building,
            None,
            "build started",
        ) {
            Ok(deployment) => deployment,
            Err(e) => return self.lost_race(deployment_id, e),
        };

        if let Err(message) = self.driver.build(&deployment).await {
            return self.fail(deployment_id, &format!("build failed: {message}"));
        }

        let deployment = match advance(
            &self.store,
            deployment_id,
            DeploymentStatus::Deploying,
            None,
            "build succeeded, publishing artifact",
        ) {
            Ok(deployment) => deployment,
            Err(e) => return self.lost_race(deployment_id, e),
        };

        if let Err(message) = self.driver.publish(&deployment).await {
            return self.fail(deployment_id, &format!("publish failed: {message}"));
        }

        let url = serving_url(&deployment.project_slug, &self.base_domain);
        match advance(
            &self.store,
            deployment_id,
            DeploymentStatus::Ready,
            Some(&url),
            &format!("deployment live at {url}"),
        ) {
            Ok(deployment) => Ok(deployment),
            Err(e) => self.lost_race(deployment_id, e),
        }
    }

    /// Attempt to cancel a deployment.
    ///
    /// Legal only from QUEUED and BUILDING. DEPLOYING and terminal
    /// states yield a definite [`PipelineError::CancelDenied`] — never
    /// a silent no-op.
    pub fn cancel(&self, deployment_id: &str) -> PipelineResult<Deployment> {
        let deployment = self
            .store
            .get_deployment(deployment_id)?
            .ok_or_else(|| StateError::NotFound(format!("deployment {deployment_id}")))?;

        if !deployment.status.can_transition_to(DeploymentStatus::Cancelled) {
            return Err(PipelineError::CancelDenied {
                id: deployment_id.to_string(),
                status: deployment.status,
            });
        }

        match advance(
            &self.store,
            deployment_id,
            DeploymentStatus::Cancelled,
            None,
            "deployment cancelled by user",
        ) {
            Ok(deployment) => Ok(deployment),
            // Lost the race against a pipeline advance: re-read and
            // report the truthful rejection.
            Err(StateError::IllegalTransition { from, .. })
            | Err(StateError::TerminalState { status: from, .. }) => {
                Err(PipelineError::CancelDenied {
                    id: deployment_id.to_string(),
                    status: from,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Transition to ERROR with an error log; the outcome is the
    /// errored record, not an `Err`.
    fn fail(&self, deployment_id: &str, message: &str) -> PipelineResult<Deployment> {
        warn!(deployment = %deployment_id, %message, "pipeline stage failed");
        match advance(
            &self.store,
            deployment_id,
            DeploymentStatus::Error,
            None,
            message,
        ) {
            Ok(deployment) => Ok(deployment),
            Err(e) => self.lost_race(deployment_id, e),
        }
    }

    /// A transition lost a race (typically to cancellation). Return
    /// the committed record when one exists.
    fn lost_race(&self, deployment_id: &str, error: StateError) -> PipelineResult<Deployment> {
        match error {
            StateError::TerminalState { .. } | StateError::IllegalTransition { .. } => {
                info!(deployment = %deployment_id, "pipeline stopped; a concurrent transition won");
                self.store
                    .get_deployment(deployment_id)?
                    .ok_or_else(|| {
                        StateError::NotFound(format!("deployment {deployment_id}")).into()
                    })
            }
            other => Err(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Driver with configurable failures and stage delays.
    struct ScriptedDriver {
        build_result: Result<(), String>,
        publish_result: Result<(), String>,
        build_delay: Duration,
    }

    impl ScriptedDriver {
        fn ok() -> Self {
            Self {
                build_result: Ok(()),
                publish_result: Ok(()),
                build_delay: Duration::ZERO,
            }
        }
    }

    impl BuildDriver for ScriptedDriver {
        fn build(&self, _deployment: &Deployment) -> BoxDriverFuture {
            let result = self.build_result.clone();
            let delay = self.build_delay;
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                result
            })
        }

        fn publish(&self, _deployment: &Deployment) -> BoxDriverFuture {
            let result = self.publish_result.clone();
            Box::pin(async move { result })
        }
    }

    fn pipeline_with(driver: ScriptedDriver) -> (BuildPipeline, StateStore) {
        let store = StateStore::open_in_memory().unwrap();
        let pipeline = BuildPipeline::new(store.clone(), Arc::new(driver), "cloudify.app");
        (pipeline, store)
    }

    fn request(project: &str, branch: &str) -> DeployRequest {
        DeployRequest {
            project_id: project.to_string(),
            project_slug: project.to_string(),
            branch: branch.to_string(),
            commit_sha: Some("abc123".to_string()),
            commit_message: Some("ship it".to_string()),
            build_command: Some("npm run build".to_string()),
        }
    }

    #[tokio::test]
    async fn full_pipeline_reaches_ready() {
        let (pipeline, store) = pipeline_with(ScriptedDriver::ok());
        let deployment = pipeline.trigger_deploy(&request("my-site", "main")).unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Queued);
        assert!(deployment.finished_at.is_none());

        let finished = pipeline.run(&deployment.id).await.unwrap();
        assert_eq!(finished.status, DeploymentStatus::Ready);
        assert_eq!(finished.url.as_deref(), Some("https://my-site.cloudify.app"));
        assert!(finished.finished_at.is_some());

        // Logs cover every stage in order.
        let logs = store.list_deployment_logs(&deployment.id).unwrap();
        let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
        assert!(messages[0].contains("queued"));
        assert!(messages[1].contains("build started"));
        assert!(messages[2].contains("publishing"));
        assert!(messages[3].contains("live at"));
    }

    #[tokio::test]
    async fn invalid_build_command_rejects_synchronously() {
        let (pipeline, store) = pipeline_with(ScriptedDriver::ok());
        let mut bad = request("p", "main");
        bad.build_command = Some("npm run build; rm -rf /".to_string());

        let err = pipeline.trigger_deploy(&bad).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidBuildCommand { .. }));
        // Nothing persisted.
        assert!(store.list_deployments_for_project("p", 0, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_build_command_is_fine() {
        let (pipeline, _) = pipeline_with(ScriptedDriver::ok());
        let mut noop = request("p", "main");
        noop.build_command = Some(String::new());
        assert!(pipeline.trigger_deploy(&noop).is_ok());

        let mut absent = request("p", "main");
        absent.build_command = None;
        assert!(pipeline.trigger_deploy(&absent).is_ok());
    }

    #[tokio::test]
    async fn build_failure_lands_in_error_with_log() {
        let (pipeline, store) = pipeline_with(ScriptedDriver {
            build_result: Err("tsc exited 2".to_string()),
            publish_result: Ok(()),
            build_delay: Duration::ZERO,
        });
        let deployment = pipeline.trigger_deploy(&request("p", "main")).unwrap();

        let finished = pipeline.run(&deployment.id).await.unwrap();
        assert_eq!(finished.status, DeploymentStatus::Error);
        assert!(finished.finished_at.is_some());
        assert!(finished.url.is_none(), "failed deployments get no url");

        let logs = store.list_deployment_logs(&deployment.id).unwrap();
        let last = logs.last().unwrap();
        assert_eq!(last.level, cloudify_state::LogLevel::Error);
        assert!(last.message.contains("tsc exited 2"));
    }

    #[tokio::test]
    async fn publish_failure_lands_in_error() {
        let (pipeline, _) = pipeline_with(ScriptedDriver {
            build_result: Ok(()),
            publish_result: Err("upload refused".to_string()),
            build_delay: Duration::ZERO,
        });
        let deployment = pipeline.trigger_deploy(&request("p", "main")).unwrap();

        let finished = pipeline.run(&deployment.id).await.unwrap();
        assert_eq!(finished.status, DeploymentStatus::Error);
    }

    #[tokio::test]
    async fn cancel_from_queued_succeeds() {
        let (pipeline, _) = pipeline_with(ScriptedDriver::ok());
        let deployment = pipeline.trigger_deploy(&request("p", "main")).unwrap();

        let cancelled = pipeline.cancel(&deployment.id).unwrap();
        assert_eq!(cancelled.status, DeploymentStatus::Cancelled);
        assert!(cancelled.finished_at.is_some());

        // The pipeline run that follows observes the cancellation.
        let after = pipeline.run(&deployment.id).await.unwrap();
        assert_eq!(after.status, DeploymentStatus::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_during_building_wins_the_race() {
        let (pipeline, store) = pipeline_with(ScriptedDriver {
            build_result: Ok(()),
            publish_result: Ok(()),
            build_delay: Duration::from_millis(200),
        });
        let pipeline = Arc::new(pipeline);
        let deployment = pipeline.trigger_deploy(&request("p", "main")).unwrap();

        let runner = {
            let pipeline = Arc::clone(&pipeline);
            let id = deployment.id.clone();
            tokio::spawn(async move { pipeline.run(&id).await })
        };

        // Let the run enter BUILDING, then cancel mid-build.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let cancelled = pipeline.cancel(&deployment.id).unwrap();
        assert_eq!(cancelled.status, DeploymentStatus::Cancelled);

        let finished = runner.await.unwrap().unwrap();
        assert_eq!(finished.status, DeploymentStatus::Cancelled);
        // The record never resurrected past the cancellation.
        let record = store.get_deployment(&deployment.id).unwrap().unwrap();
        assert_eq!(record.status, DeploymentStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_from_deploying_is_denied() {
        let (pipeline, store) = pipeline_with(ScriptedDriver::ok());
        let deployment = pipeline.trigger_deploy(&request("p", "main")).unwrap();
        advance(&store, &deployment.id, DeploymentStatus::Building, None, "x").unwrap();
        advance(&store, &deployment.id, DeploymentStatus::Deploying, None, "x").unwrap();

        let err = pipeline.cancel(&deployment.id).unwrap_err();
        match err {
            PipelineError::CancelDenied { status, .. } => {
                assert_eq!(status, DeploymentStatus::Deploying);
            }
            other => panic!("expected CancelDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_of_terminal_deployment_is_denied() {
        let (pipeline, _) = pipeline_with(ScriptedDriver::ok());
        let deployment = pipeline.trigger_deploy(&request("p", "main")).unwrap();
        pipeline.run(&deployment.id).await.unwrap();

        let err = pipeline.cancel(&deployment.id).unwrap_err();
        assert!(matches!(err, PipelineError::CancelDenied { .. }));
    }

    #[tokio::test]
    async fn cancel_of_unknown_deployment_is_not_found() {
        let (pipeline, _) = pipeline_with(ScriptedDriver::ok());
        let err = pipeline.cancel("ghost").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::State(StateError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_deployments_progress_independently() {
        let (pipeline, _) = pipeline_with(ScriptedDriver::ok());
        let pipeline = Arc::new(pipeline);

        let a = pipeline.trigger_deploy(&request("p", "main")).unwrap();
        let b = pipeline.trigger_deploy(&request("p", "feature/x")).unwrap();
        assert_ne!(a.id, b.id);

        let (ra, rb) = tokio::join!(pipeline.run(&a.id), pipeline.run(&b.id));
        let ra = ra.unwrap();
        let rb = rb.unwrap();
        assert_eq!(ra.status, DeploymentStatus::Ready);
        assert_eq!(rb.status, DeploymentStatus::Ready);
        assert_eq!(ra.branch, "main");
        assert_eq!(rb.branch, "feature/x");
    }
}
