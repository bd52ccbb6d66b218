//! Preview operational-state projection.
//!
//! A pure function from (session client state, prior memory, now) to the
//! state the preview pane shows. Owns two timing rules: a deployment stuck
//! in `queued` for three minutes gets exactly one automatic redeploy before
//! surfacing an error, and a transient connection error within thirty
//! seconds of the last healthy poll shows as reconnecting rather than
//! failed.

use serde::Serialize;

use crate::session::{DeploymentState, SessionStatus};

pub const QUEUED_TIMEOUT_MS: i64 = 180_000;
pub const RECONNECT_GRACE_MS: i64 = 30_000;
pub const MAX_AUTO_RETRIES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewState {
    Provisioning,
    Deploying,
    Ready,
    Error,
    Reconnecting,
}

/// What the projector reads from the session client each tick.
#[derive(Debug, Clone, Default)]
pub struct PreviewInputs {
    pub chat_id: Option<String>,
    pub compose_id: Option<String>,
    pub runtime_token: Option<String>,
    pub preview_url: Option<String>,
    pub session_status: Option<SessionStatus>,
    pub deployment_status: Option<DeploymentState>,
    /// A poll or connection failed this tick.
    pub transient_error: bool,
}

/// Carried between ticks. Reset whenever the (chat, compose) pair changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewMemory {
    pub session_key: String,
    pub retry_count: u32,
    pub queued_since: Option<i64>,
    pub reconnect_since: Option<i64>,
    pub last_healthy_at: Option<i64>,
    pub last_transition_at: i64,
    pub last_state: Option<PreviewState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewSnapshot {
    pub state: PreviewState,
    pub message: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub queued_since: Option<i64>,
    pub last_transition_at: i64,
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub snapshot: PreviewSnapshot,
    pub memory: PreviewMemory,
    pub should_auto_redeploy: bool,
}

pub fn project(inputs: &PreviewInputs, memory: PreviewMemory, now_ms: i64) -> Projection {
    let session_key = format!(
        "{}::{}",
        inputs.chat_id.as_deref().unwrap_or(""),
        inputs.compose_id.as_deref().unwrap_or("")
    );
    let mut memory = if memory.session_key == session_key {
        memory
    } else {
        PreviewMemory {
            session_key,
            last_transition_at: now_ms,
            ..Default::default()
        }
    };

    let mut should_auto_redeploy = false;
    let mut queued_timed_out = false;
    if inputs.deployment_status == Some(DeploymentState::Queued) {
        let since = memory.queued_since.unwrap_or(now_ms);
        memory.queued_since = Some(since);
        if now_ms - since >= QUEUED_TIMEOUT_MS {
            if memory.retry_count < MAX_AUTO_RETRIES {
                should_auto_redeploy = true;
                memory.retry_count += 1;
                memory.queued_since = Some(now_ms);
            } else {
                queued_timed_out = true;
            }
        }
    } else {
        memory.queued_since = None;
    }

    let state = if queued_timed_out {
        PreviewState::Error
    } else if inputs.transient_error {
        let within_grace = inputs.runtime_token.is_some()
            && memory
                .last_healthy_at
                .is_some_and(|t| now_ms - t <= RECONNECT_GRACE_MS);
        if within_grace {
            PreviewState::Reconnecting
        } else {
            PreviewState::Error
        }
    } else if inputs.session_status == Some(SessionStatus::Creating) {
        PreviewState::Provisioning
    } else if matches!(
        inputs.deployment_status,
        Some(DeploymentState::Queued | DeploymentState::Running)
    ) || inputs.session_status == Some(SessionStatus::Deploying)
    {
        PreviewState::Deploying
    } else if inputs.session_status == Some(SessionStatus::Ready)
        && inputs.deployment_status == Some(DeploymentState::Done)
    {
        memory.last_healthy_at = Some(now_ms);
        PreviewState::Ready
    } else if inputs.preview_url.is_some() {
        PreviewState::Deploying
    } else {
        PreviewState::Provisioning
    };

    memory.reconnect_since = if state == PreviewState::Reconnecting {
        Some(memory.reconnect_since.unwrap_or(now_ms))
    } else {
        None
    };

    if memory.last_state != Some(state) {
        memory.last_transition_at = now_ms;
        memory.last_state = Some(state);
    }

    let message = message_for(state, queued_timed_out, memory.retry_count);
    let snapshot = PreviewSnapshot {
        state,
        message,
        retry_count: memory.retry_count,
        max_retries: MAX_AUTO_RETRIES,
        queued_since: memory.queued_since,
        last_transition_at: memory.last_transition_at,
    };
    Projection {
        snapshot,
        memory,
        should_auto_redeploy,
    }
}

fn message_for(state: PreviewState, queued_timed_out: bool, retry_count: u32) -> String {
    match state {
        PreviewState::Provisioning => "Provisioning your workspace…".to_string(),
        PreviewState::Deploying => {
            if retry_count > 0 {
                "Deploy re-queued, waiting for the platform…".to_string()
            } else {
                "Deploying preview…".to_string()
            }
        }
        PreviewState::Ready => "Preview ready".to_string(),
        PreviewState::Reconnecting => "Connection hiccup, reconnecting…".to_string(),
        PreviewState::Error => {
            if queued_timed_out {
                "Preview deploy stayed queued for more than 3 minutes. Try redeploying."
                    .to_string()
            } else {
                "Preview connection lost".to_string()
            }
        }
    }
}
