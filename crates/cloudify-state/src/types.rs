//! Domain types for the Cloudify state store.
//!
//! These types represent the persisted state of deployments, edge
//! functions, invocations, and A/B tests. All types are serializable
//! to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a project (owned by the excluded CRUD layer;
/// the core only references it).
pub type ProjectId = String;

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Unique identifier for an edge function.
pub type FunctionId = String;

/// Unique identifier for an A/B test.
pub type TestId = String;

// ── Deployment ─────────────────────────────────────────────────────

/// One build+deploy attempt for a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub project_id: ProjectId,
    /// URL-safe project slug, used to derive the serving URL.
    pub project_slug: String,
    pub status: DeploymentStatus,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    /// Unix timestamp (seconds) when the deployment was created.
    pub created_at: u64,
    /// Set exactly when the status is terminal.
    pub finished_at: Option<u64>,
    /// Externally reachable URL, set on entering READY.
    pub url: Option<String>,
}

/// Lifecycle status of a deployment.
///
/// `Ready`, `Error`, and `Cancelled` are terminal — no transition may
/// leave them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Queued,
    Building,
    Deploying,
    Ready,
    Error,
    Cancelled,
}

impl DeploymentStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Cancelled)
    }

    /// The legal transition graph.
    ///
    /// Cancellation is legal only from `Queued` and `Building`; once
    /// artifact publication has started the deployment must run to
    /// completion or error.
    pub fn can_transition_to(self, next: Self) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Queued, Building)
                | (Building, Deploying)
                | (Deploying, Ready)
                | (Queued, Error)
                | (Building, Error)
                | (Deploying, Error)
                | (Queued, Cancelled)
                | (Building, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Building => "building",
            Self::Deploying => "deploying",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Severity of a deployment log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One ordered log line attached to a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentLog {
    pub seq: u64,
    pub level: LogLevel,
    pub message: String,
    pub created_at: u64,
}

/// Append-only audit record of state-machine side effects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityRecord {
    pub id: String,
    pub project_id: ProjectId,
    pub deployment_id: Option<DeploymentId>,
    /// Short machine-readable action, e.g. "deployment.ready".
    pub action: String,
    pub detail: String,
    pub created_at: u64,
}

// ── Edge functions ─────────────────────────────────────────────────

/// A named, routable piece of user-submitted code bound to a project.
///
/// The source is WebAssembly text (WAT); it is compiled into a
/// component by the sandbox at invocation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeFunction {
    pub id: FunctionId,
    pub project_id: ProjectId,
    pub name: String,
    /// WAT source of the component.
    pub source: String,
    /// Ordered glob route patterns (`*` wildcard).
    pub routes: Vec<String>,
    pub enabled: bool,
    /// Hard wall-clock timeout per invocation, in seconds.
    pub timeout_secs: u64,
    /// Environment exposed to the guest through the host interface.
    pub env: HashMap<String, String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Outcome classification of one edge invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Success,
    Error,
    Timeout,
}

/// Append-only audit record of one edge-function invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeInvocation {
    pub id: String,
    pub function_id: FunctionId,
    pub project_id: ProjectId,
    pub status: InvocationStatus,
    pub duration_ms: u64,
    /// Peak guest memory in bytes; zero when unmeasured.
    pub memory_bytes: u64,
    pub region: Option<String>,
    pub country: Option<String>,
    pub path: String,
    pub method: String,
    pub response_status: Option<u16>,
    pub error: Option<String>,
    pub created_at: u64,
}

// ── A/B tests ──────────────────────────────────────────────────────

/// A project-scoped experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbTest {
    pub id: TestId,
    pub project_id: ProjectId,
    pub name: String,
    /// URL-safe slug derived from the name; used in cookie names.
    pub slug: String,
    pub enabled: bool,
    /// Ordered variants; weights must sum to exactly 100.
    pub variants: Vec<Variant>,
    pub targeting: Option<Targeting>,
    /// Unix seconds; the test is inactive before this time.
    pub starts_at: Option<u64>,
    /// Unix seconds; the test is inactive after this time.
    pub ends_at: Option<u64>,
    pub primary_metric: Option<String>,
    pub goal_url: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl AbTest {
    /// Whether the test is enabled and inside its active window.
    pub fn is_active(&self, now: u64) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(start) = self.starts_at {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.ends_at {
            if now > end {
                return false;
            }
        }
        true
    }
}

/// One arm of an A/B test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    pub name: String,
    /// Traffic share in percent; all variants of a test sum to 100.
    pub weight: u32,
    pub url: Option<String>,
    pub config: Option<serde_json::Value>,
}

/// Optional targeting rule narrowing who enters a test.
///
/// Empty lists mean "no restriction" for that dimension.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Targeting {
    pub countries: Vec<String>,
    pub devices: Vec<String>,
    pub browsers: Vec<String>,
    /// Probabilistic gate in percent (0–100); `None` admits everyone.
    pub percentage: Option<f64>,
    /// Glob patterns the request path must match (any-of).
    pub url_patterns: Vec<String>,
}

/// Sticky assignment of a visitor to a variant. One per
/// (test, visitor) pair — uniqueness is enforced by the table key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbParticipant {
    pub test_id: TestId,
    pub visitor_id: String,
    pub variant: String,
    pub assigned_at: u64,
}

/// Append-only conversion event attributed to a participant's variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbConversion {
    pub id: String,
    pub test_id: TestId,
    pub visitor_id: String,
    pub variant: String,
    /// Conversion type, e.g. "click", "purchase".
    pub kind: String,
    pub value: Option<f64>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: u64,
}

// ── Table keys ─────────────────────────────────────────────────────

impl Deployment {
    pub fn table_key(&self) -> String {
        self.id.clone()
    }
}

impl EdgeFunction {
    pub fn table_key(&self) -> String {
        self.id.clone()
    }
}

impl AbTest {
    pub fn table_key(&self) -> String {
        self.id.clone()
    }
}

impl AbParticipant {
    /// Composite key enforcing one participant per (test, visitor).
    pub fn table_key(&self) -> String {
        participant_key(&self.test_id, &self.visitor_id)
    }
}

/// Build the participants table key for a (test, visitor) pair.
pub fn participant_key(test_id: &str, visitor_id: &str) -> String {
    format!("{test_id}:{visitor_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(DeploymentStatus::Ready.is_terminal());
        assert!(DeploymentStatus::Error.is_terminal());
        assert!(DeploymentStatus::Cancelled.is_terminal());
        assert!(!DeploymentStatus::Queued.is_terminal());
        assert!(!DeploymentStatus::Building.is_terminal());
        assert!(!DeploymentStatus::Deploying.is_terminal());
    }

    #[test]
    fn happy_path_transitions_are_legal() {
        use DeploymentStatus::*;
        assert!(Queued.can_transition_to(Building));
        assert!(Building.can_transition_to(Deploying));
        assert!(Deploying.can_transition_to(Ready));
    }

    #[test]
    fn error_is_reachable_from_every_live_state() {
        use DeploymentStatus::*;
        assert!(Queued.can_transition_to(Error));
        assert!(Building.can_transition_to(Error));
        assert!(Deploying.can_transition_to(Error));
    }

    #[test]
    fn cancel_is_illegal_once_deploying() {
        use DeploymentStatus::*;
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Building.can_transition_to(Cancelled));
        assert!(!Deploying.can_transition_to(Cancelled));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        use DeploymentStatus::*;
        for terminal in [Ready, Error, Cancelled] {
            for next in [Queued, Building, Deploying, Ready, Error, Cancelled] {
                assert!(!terminal.can_transition_to(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn skipping_stages_is_illegal() {
        use DeploymentStatus::*;
        assert!(!Queued.can_transition_to(Deploying));
        assert!(!Queued.can_transition_to(Ready));
        assert!(!Building.can_transition_to(Ready));
        assert!(!Deploying.can_transition_to(Building));
    }

    #[test]
    fn ab_test_active_window() {
        let mut test = AbTest {
            id: "t1".into(),
            project_id: "p1".into(),
            name: "Test".into(),
            slug: "test".into(),
            enabled: true,
            variants: vec![],
            targeting: None,
            starts_at: Some(100),
            ends_at: Some(200),
            primary_metric: None,
            goal_url: None,
            created_at: 0,
            updated_at: 0,
        };
        assert!(!test.is_active(99));
        assert!(test.is_active(100));
        assert!(test.is_active(150));
        assert!(test.is_active(200));
        assert!(!test.is_active(201));

        test.enabled = false;
        assert!(!test.is_active(150));

        test.enabled = true;
        test.starts_at = None;
        test.ends_at = None;
        assert!(test.is_active(0));
        assert!(test.is_active(u64::MAX));
    }

    #[test]
    fn participant_key_is_composite() {
        assert_eq!(participant_key("t1", "v1"), "t1:v1");
    }
}
