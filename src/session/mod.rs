//! Runtime session lifecycle: orchestration, idle sweeping, templates.

pub mod orchestrator;
pub mod sweeper;
pub mod templates;

pub use orchestrator::{CreateOutcome, HeartbeatOutcome, OrchestratorSettings, SessionOrchestrator};
pub use sweeper::IdleSweeper;

use serde::{Deserialize, Serialize};

use crate::platform::Deployment;
use crate::rollout::Cohort;

/// Lifecycle status of a session as shown to the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Creating,
    Deploying,
    Ready,
    Error,
    Deleted,
}

/// Collapsed view over the platform's deployment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    Queued,
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "environmentId")]
    pub environment_id: String,
    #[serde(rename = "composeId")]
    pub compose_id: String,
    pub domain: String,
    #[serde(rename = "previewUrl")]
    pub preview_url: String,
    pub status: SessionStatus,
    /// Milliseconds since epoch.
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
    #[serde(rename = "serverId", default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(rename = "rolloutCohort")]
    pub rollout_cohort: Cohort,
}

pub fn preview_url(domain: &str) -> String {
    format!("https://{domain}")
}

/// No deployments means the platform has not picked the job up yet. With
/// history, only the newest record counts.
pub fn derive_deployment_state(deployments: &[Deployment]) -> DeploymentState {
    let Some(latest) = deployments.iter().max_by_key(|d| d.created_at) else {
        return DeploymentState::Queued;
    };
    match latest.status.as_str() {
        "done" => DeploymentState::Done,
        "error" | "cancelled" => DeploymentState::Error,
        _ => DeploymentState::Running,
    }
}

pub fn derive_session_status(
    deployment: DeploymentState,
    compose_status: Option<&str>,
) -> SessionStatus {
    if deployment == DeploymentState::Error || compose_status == Some("error") {
        return SessionStatus::Error;
    }
    if deployment == DeploymentState::Done || compose_status == Some("done") {
        return SessionStatus::Ready;
    }
    if deployment == DeploymentState::Running {
        return SessionStatus::Deploying;
    }
    SessionStatus::Creating
}
