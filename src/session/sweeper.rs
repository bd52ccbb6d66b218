//! Garbage collection of idle sessions.
//!
//! A session whose `lastSeenAt + idleTtlSec` horizon has passed is deleted
//! together with its volumes. Sweeps are scoped per actor and guarded by a
//! try-and-skip flag, not a queueing mutex: a sweep already running for an
//! actor makes concurrent requests return immediately. That keeps heartbeat
//! fan-out from turning into sweep storms.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::RuntimeError;
use crate::metadata;
use crate::platform::PlatformApi;

#[derive(Default)]
pub struct IdleSweeper {
    active: Arc<Mutex<HashSet<String>>>,
}

impl IdleSweeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep expired sessions for one actor. Returns the number of composes
    /// deleted, or 0 immediately when a sweep for this actor is running.
    pub async fn run(
        &self,
        platform: &dyn PlatformApi,
        actor_id: &str,
        request_id: &str,
    ) -> Result<u32, RuntimeError> {
        {
            let mut active = self.active.lock().await;
            if !active.insert(actor_id.to_string()) {
                tracing::debug!(actor_id, "sweep already in progress, skipping");
                return Ok(0);
            }
        }

        let result = self.sweep_actor(platform, actor_id, request_id).await;
        self.active.lock().await.remove(actor_id);
        result
    }

    async fn sweep_actor(
        &self,
        platform: &dyn PlatformApi,
        actor_id: &str,
        request_id: &str,
    ) -> Result<u32, RuntimeError> {
        let now_ms = Utc::now().timestamp_millis();
        let projects = platform.project_all(request_id).await?;

        let mut deleted: u32 = 0;
        for project in &projects {
            for environment in &project.environments {
                for compose in &environment.composes {
                    let Some(description) = compose.description.as_deref() else {
                        continue;
                    };
                    let Some(meta) = metadata::parse(description) else {
                        continue;
                    };
                    if meta.actor_id != actor_id || !meta.is_expired(now_ms) {
                        continue;
                    }
                    match platform
                        .compose_delete(&compose.compose_id, true, request_id)
                        .await
                    {
                        Ok(()) => {
                            deleted += 1;
                            tracing::info!(
                                actor_id,
                                compose_id = %compose.compose_id,
                                chat_id = %meta.chat_id,
                                idle_ttl_sec = meta.idle_ttl_sec,
                                "deleted expired session"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(
                                actor_id,
                                compose_id = %compose.compose_id,
                                error = %e,
                                "failed to delete expired session (may already be gone)"
                            );
                        }
                    }
                }
            }
        }
        Ok(deleted)
    }

    /// Sweep every actor that owns at least one session. Returns the number
    /// of distinct actors visited.
    pub async fn run_all(
        &self,
        platform: &dyn PlatformApi,
        request_id: &str,
    ) -> Result<u32, RuntimeError> {
        let projects = platform.project_all(request_id).await?;

        let actors: BTreeSet<String> = projects
            .iter()
            .flat_map(|p| &p.environments)
            .flat_map(|e| &e.composes)
            .filter_map(|c| c.description.as_deref())
            .filter_map(metadata::parse)
            .map(|m| m.actor_id)
            .collect();

        for actor_id in &actors {
            if let Err(e) = self.run(platform, actor_id, request_id).await {
                tracing::warn!(actor_id, error = %e, "actor sweep failed");
            }
        }
        Ok(actors.len() as u32)
    }
}
