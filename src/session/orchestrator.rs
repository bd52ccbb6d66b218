//! Session orchestration: create, reuse, recover, heartbeat, delete.
//!
//! One reusable compose per (actor, chat). Creation is single-flighted so
//! concurrent requests for the same chat observe one platform-side effect
//! and share one token. Reuse prefers the candidate with the freshest
//! `lastSeenAt` and prunes the rest best-effort. A CONFLICT from
//! `compose.create` is recovered exactly once by re-scanning the project
//! for the compose the concurrent winner made.

use std::sync::Arc;

use chrono::Utc;
use hyper::StatusCode;
use serde::Serialize;
use serde_json::json;

use crate::error::{RuntimeError, codes};
use crate::metadata::{self, SessionMetadata};
use crate::platform::{
    Compose, ComposeCreateInput, ComposeUpdateInput, Deployment, DomainCreateInput, Environment,
    FileWriteInput, PlatformApi, Project, types::FileEncoding,
};
use crate::rollout::{self, Cohort};
use crate::single_flight::SingleFlight;
use crate::token::{self, SessionBinding, TokenClaims};

use super::templates;
use super::{
    DeploymentState, IdleSweeper, Session, SessionStatus, derive_deployment_state,
    derive_session_status, preview_url,
};

const PREVIEW_PORT: u16 = 4173;
const PREVIEW_SERVICE: &str = "app";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub session_idle_min: i64,
    pub canary_percent: f64,
    pub server_id: Option<String>,
    pub canary_server_id: Option<String>,
    pub token_secret: String,
}

impl OrchestratorSettings {
    fn idle_ttl_sec(&self) -> i64 {
        self.session_idle_min * 60
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    #[serde(rename = "runtimeToken")]
    pub token: String,
    pub session: Session,
    #[serde(rename = "deploymentStatus")]
    pub deployment_status: DeploymentState,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatOutcome {
    pub status: SessionStatus,
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
    #[serde(rename = "runtimeToken")]
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct GetOutcome {
    pub claims: TokenClaims,
    pub session: Session,
    pub deployment_status: DeploymentState,
}

/// A (actor, chat)-owned compose considered during reuse evaluation.
struct Candidate {
    compose: Compose,
    meta: SessionMetadata,
    environment_id: String,
    deploy_state: DeploymentState,
    status: SessionStatus,
}

struct LoadedSession {
    compose: Compose,
    meta: SessionMetadata,
    session: Session,
    deploy_state: DeploymentState,
}

pub struct SessionOrchestrator {
    core: Arc<OrchestratorCore>,
    create_flights: SingleFlight<CreateOutcome>,
}

/// The Arc'd half shared with in-flight create tasks.
struct OrchestratorCore {
    platform: Arc<dyn PlatformApi>,
    settings: OrchestratorSettings,
    sweeper: Arc<IdleSweeper>,
}

impl SessionOrchestrator {
    pub fn new(
        platform: Arc<dyn PlatformApi>,
        settings: OrchestratorSettings,
        sweeper: Arc<IdleSweeper>,
    ) -> Self {
        Self {
            core: Arc::new(OrchestratorCore {
                platform,
                settings,
                sweeper,
            }),
            create_flights: SingleFlight::new(),
        }
    }

    /// Create or reuse the session for (actor, chat). Concurrent calls
    /// with the same key share one task and one token.
    pub async fn create(
        &self,
        actor_id: &str,
        chat_id: &str,
        template_id: Option<&str>,
        request_id: &str,
    ) -> Result<CreateOutcome, RuntimeError> {
        if actor_id.is_empty() || chat_id.is_empty() {
            return Err(RuntimeError::bad_request("actorId and chatId are required"));
        }
        let key = format!("{actor_id}::{chat_id}");
        let core = Arc::clone(&self.core);
        let actor = actor_id.to_string();
        let chat = chat_id.to_string();
        let template = template_id.map(String::from);
        let request = request_id.to_string();
        self.create_flights
            .run(&key, move || async move {
                core.create_inner(&actor, &chat, template.as_deref(), &request)
                    .await
            })
            .await
    }

    pub async fn get(&self, token: &str, request_id: &str) -> Result<GetOutcome, RuntimeError> {
        self.core.get(token, request_id).await
    }

    pub async fn heartbeat(
        &self,
        token: &str,
        request_id: &str,
    ) -> Result<HeartbeatOutcome, RuntimeError> {
        self.core.heartbeat(token, request_id).await
    }

    pub async fn delete(&self, token: &str, request_id: &str) -> Result<(), RuntimeError> {
        self.core.delete(token, request_id).await
    }

    /// Verify only. File operations use this to read the authoritative
    /// compose id out of the token.
    pub fn with_claims(&self, token: &str) -> Result<TokenClaims, RuntimeError> {
        self.core.with_claims(token)
    }
}

impl OrchestratorCore {
    async fn create_inner(
        &self,
        actor_id: &str,
        chat_id: &str,
        template_id: Option<&str>,
        request_id: &str,
    ) -> Result<CreateOutcome, RuntimeError> {
        if let Err(e) = self
            .sweeper
            .run(self.platform.as_ref(), actor_id, request_id)
            .await
        {
            tracing::warn!(actor_id, error = %e, "pre-create sweep failed");
        }

        let project = self.ensure_actor_project(actor_id, request_id).await?;
        let environment = resolve_environment(&project)?.clone();
        let rollout = rollout::select(actor_id, chat_id, self.settings.canary_percent);

        let (winner, stale) = self
            .find_reusable(&project, actor_id, chat_id, request_id)
            .await;

        let outcome = if let Some(candidate) = winner {
            tracing::info!(
                actor_id,
                chat_id,
                compose_id = %candidate.compose.compose_id,
                status = ?candidate.status,
                "reusing existing session"
            );
            self.reuse_session(candidate, &project, rollout.cohort, request_id)
                .await?
        } else {
            self.create_fresh(
                actor_id,
                chat_id,
                template_id,
                &project,
                &environment,
                rollout.cohort,
                request_id,
            )
            .await?
        };

        self.delete_stale(stale, request_id).await;
        Ok(outcome)
    }

    async fn ensure_actor_project(
        &self,
        actor_id: &str,
        request_id: &str,
    ) -> Result<Project, RuntimeError> {
        let name = format!("bolt-actor-{}", &rollout::name_hash(actor_id)[..10]);
        let projects = self.platform.project_all(request_id).await?;
        let project_id = match projects.iter().find(|p| p.name == name) {
            Some(project) => project.project_id.clone(),
            None => {
                tracing::info!(actor_id, project_name = %name, "creating actor project");
                self.platform
                    .project_create(&name, request_id)
                    .await?
                    .project_id
            }
        };
        self.platform.project_one(&project_id, request_id).await
    }

    /// Evaluate every compose owned by (actor, chat). Returns the winning
    /// reusable candidate (freshest `lastSeenAt`) and the compose ids to
    /// prune.
    async fn find_reusable(
        &self,
        project: &Project,
        actor_id: &str,
        chat_id: &str,
        request_id: &str,
    ) -> (Option<Candidate>, Vec<String>) {
        let mut reusable: Vec<Candidate> = Vec::new();
        let mut stale: Vec<String> = Vec::new();

        for environment in &project.environments {
            for summary in &environment.composes {
                let Some(meta) = summary.description.as_deref().and_then(metadata::parse) else {
                    continue;
                };
                if meta.actor_id != actor_id || meta.chat_id != chat_id {
                    continue;
                }

                let fetched = self
                    .fetch_candidate(&summary.compose_id, request_id)
                    .await;
                match fetched {
                    Ok((compose, deployments)) => {
                        let deploy_state = derive_deployment_state(&deployments);
                        let status =
                            derive_session_status(deploy_state, compose.compose_status.as_deref());
                        if matches!(
                            status,
                            SessionStatus::Creating | SessionStatus::Deploying | SessionStatus::Ready
                        ) {
                            reusable.push(Candidate {
                                compose,
                                meta,
                                environment_id: environment.environment_id.clone(),
                                deploy_state,
                                status,
                            });
                        } else {
                            stale.push(summary.compose_id.clone());
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            compose_id = %summary.compose_id,
                            error = %e,
                            "failed to evaluate reuse candidate"
                        );
                        stale.push(summary.compose_id.clone());
                    }
                }
            }
        }

        reusable.sort_by_key(|c| c.meta.last_seen_at);
        let winner = reusable.pop();
        stale.extend(reusable.into_iter().map(|c| c.compose.compose_id));
        (winner, stale)
    }

    async fn fetch_candidate(
        &self,
        compose_id: &str,
        request_id: &str,
    ) -> Result<(Compose, Vec<Deployment>), RuntimeError> {
        let compose = self.platform.compose_one(compose_id, request_id).await?;
        let deployments = self
            .platform
            .deployments_by_compose(compose_id, request_id)
            .await?;
        Ok((compose, deployments))
    }

    async fn reuse_session(
        &self,
        candidate: Candidate,
        project: &Project,
        rollout_cohort: Cohort,
        request_id: &str,
    ) -> Result<CreateOutcome, RuntimeError> {
        let now_ms = Utc::now().timestamp_millis();
        let cohort = self.resolve_cohort(&candidate.meta, &candidate.compose, rollout_cohort);

        let next_meta = SessionMetadata {
            v: metadata::METADATA_SCHEMA_VERSION,
            actor_id: candidate.meta.actor_id.clone(),
            chat_id: candidate.meta.chat_id.clone(),
            created_at: candidate.meta.created_at,
            last_seen_at: now_ms,
            idle_ttl_sec: self.settings.idle_ttl_sec(),
            rollout_cohort: Some(cohort),
        };
        self.platform
            .compose_update(
                &ComposeUpdateInput {
                    compose_id: candidate.compose.compose_id.clone(),
                    description: metadata::format(&next_meta),
                    source_type: None,
                    compose_path: None,
                },
                request_id,
            )
            .await?;

        let app_name = candidate
            .compose
            .app_name
            .clone()
            .unwrap_or_else(|| candidate.compose.name.clone());
        let domain = self
            .ensure_domain(
                &candidate.compose.compose_id,
                &app_name,
                candidate.compose.server_id.as_deref(),
                request_id,
            )
            .await?;

        let (deploy_state, status) = if matches!(
            candidate.deploy_state,
            DeploymentState::Queued | DeploymentState::Error
        ) {
            self.platform
                .compose_deploy(&candidate.compose.compose_id, request_id)
                .await?;
            (DeploymentState::Queued, SessionStatus::Deploying)
        } else {
            (candidate.deploy_state, candidate.status)
        };

        self.issue(
            project,
            &candidate.environment_id,
            &candidate.compose,
            &next_meta,
            domain,
            status,
            deploy_state,
            cohort,
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_fresh(
        &self,
        actor_id: &str,
        chat_id: &str,
        template_id: Option<&str>,
        project: &Project,
        environment: &Environment,
        cohort: Cohort,
        request_id: &str,
    ) -> Result<CreateOutcome, RuntimeError> {
        let now_ms = Utc::now().timestamp_millis();
        let server_id = self.resolve_server(cohort, request_id).await?;

        let template = templates::resolve(template_id);
        let name = format!(
            "bolt-chat-{}",
            &rollout::name_hash(&format!("{actor_id}:{chat_id}"))[..12]
        );

        let mut meta = SessionMetadata::new(actor_id, chat_id, now_ms, self.settings.idle_ttl_sec());
        meta.rollout_cohort = Some(cohort);
        let description = metadata::format(&meta);

        let create_input = ComposeCreateInput {
            name: name.clone(),
            app_name: name.clone(),
            environment_id: environment.environment_id.clone(),
            compose_type: "docker-compose".to_string(),
            compose_file: template.compose_file.to_string(),
            description: description.clone(),
            server_id: server_id.clone(),
        };

        tracing::info!(
            actor_id,
            chat_id,
            compose_name = %name,
            cohort = ?cohort,
            server_id = server_id.as_deref().unwrap_or("<default>"),
            template = template.id,
            "creating session compose"
        );

        let compose = match self.platform.compose_create(&create_input, request_id).await {
            Ok(compose) => compose,
            Err(e) if e.is_code(codes::CONFLICT) => {
                return self
                    .recover_from_conflict(actor_id, chat_id, project, cohort, request_id, e)
                    .await;
            }
            Err(e) => return Err(e),
        };

        self.platform
            .compose_update(
                &ComposeUpdateInput {
                    compose_id: compose.compose_id.clone(),
                    description,
                    source_type: Some("raw".to_string()),
                    compose_path: Some("docker-compose.yml".to_string()),
                },
                request_id,
            )
            .await?;

        for (path, content) in template.files {
            self.platform
                .files_write(
                    &FileWriteInput {
                        compose_id: compose.compose_id.clone(),
                        path: (*path).to_string(),
                        content: (*content).to_string(),
                        encoding: FileEncoding::Utf8,
                        overwrite: true,
                    },
                    request_id,
                )
                .await?;
        }

        let domain = self
            .ensure_domain(&compose.compose_id, &name, server_id.as_deref(), request_id)
            .await?;

        let deployments = self
            .platform
            .deployments_by_compose(&compose.compose_id, request_id)
            .await?;
        let mut deploy_state = derive_deployment_state(&deployments);
        if matches!(
            deploy_state,
            DeploymentState::Queued | DeploymentState::Error
        ) {
            self.platform
                .compose_deploy(&compose.compose_id, request_id)
                .await?;
            deploy_state = DeploymentState::Queued;
        }

        let status = derive_session_status(deploy_state, compose.compose_status.as_deref());
        let compose = Compose {
            server_id: server_id.clone(),
            ..compose
        };
        self.issue(
            project,
            &environment.environment_id,
            &compose,
            &meta,
            domain,
            status,
            deploy_state,
            cohort,
        )
    }

    /// A concurrent creator won the compose.create race. Re-scan once and
    /// adopt their compose; if nothing reusable shows up, surface the
    /// original conflict.
    async fn recover_from_conflict(
        &self,
        actor_id: &str,
        chat_id: &str,
        project: &Project,
        rollout_cohort: Cohort,
        request_id: &str,
        original: RuntimeError,
    ) -> Result<CreateOutcome, RuntimeError> {
        tracing::warn!(
            actor_id,
            chat_id,
            "compose create conflicted, re-scanning project for the winner"
        );
        let project = self
            .platform
            .project_one(&project.project_id, request_id)
            .await?;
        let (winner, stale) = self
            .find_reusable(&project, actor_id, chat_id, request_id)
            .await;
        let Some(candidate) = winner else {
            return Err(original);
        };
        let outcome = self
            .reuse_session(candidate, &project, rollout_cohort, request_id)
            .await?;
        self.delete_stale(stale, request_id).await;
        Ok(outcome)
    }

    // ── Token-scoped operations ─────────────────────────────────

    async fn get(&self, token: &str, request_id: &str) -> Result<GetOutcome, RuntimeError> {
        let claims = self.with_claims(token)?;
        let loaded = self.load(&claims, request_id).await?;
        Ok(GetOutcome {
            claims,
            session: loaded.session,
            deployment_status: loaded.deploy_state,
        })
    }

    async fn heartbeat(
        &self,
        token: &str,
        request_id: &str,
    ) -> Result<HeartbeatOutcome, RuntimeError> {
        let claims = self.with_claims(token)?;
        let loaded = self.load(&claims, request_id).await?;

        let now_ms = Utc::now().timestamp_millis();
        let cohort = self.resolve_cohort(&loaded.meta, &loaded.compose, Cohort::Stable);
        let next_meta = SessionMetadata {
            v: metadata::METADATA_SCHEMA_VERSION,
            actor_id: claims.actor_id.clone(),
            chat_id: claims.chat_id.clone(),
            created_at: loaded.meta.created_at,
            last_seen_at: now_ms,
            idle_ttl_sec: self.settings.idle_ttl_sec(),
            rollout_cohort: Some(cohort),
        };
        self.platform
            .compose_update(
                &ComposeUpdateInput {
                    compose_id: claims.compose_id.clone(),
                    description: metadata::format(&next_meta),
                    source_type: None,
                    compose_path: None,
                },
                request_id,
            )
            .await?;

        if let Err(e) = self
            .sweeper
            .run(self.platform.as_ref(), &claims.actor_id, request_id)
            .await
        {
            tracing::warn!(actor_id = %claims.actor_id, error = %e, "heartbeat sweep failed");
        }

        let (token, _) = token::sign(
            &claims.binding(),
            &self.settings.token_secret,
            self.settings.idle_ttl_sec(),
        )?;
        Ok(HeartbeatOutcome {
            status: loaded.session.status,
            expires_at: now_ms + self.settings.idle_ttl_sec() * 1000,
            token,
        })
    }

    async fn delete(&self, token: &str, request_id: &str) -> Result<(), RuntimeError> {
        let claims = self.with_claims(token)?;
        tracing::info!(
            actor_id = %claims.actor_id,
            chat_id = %claims.chat_id,
            compose_id = %claims.compose_id,
            "deleting session"
        );
        self.platform
            .compose_delete(&claims.compose_id, true, request_id)
            .await
    }

    fn with_claims(&self, token: &str) -> Result<TokenClaims, RuntimeError> {
        token::verify(token, &self.settings.token_secret)
    }

    // ── Shared plumbing ─────────────────────────────────────────

    async fn load(
        &self,
        claims: &TokenClaims,
        request_id: &str,
    ) -> Result<LoadedSession, RuntimeError> {
        let compose = self
            .platform
            .compose_one(&claims.compose_id, request_id)
            .await?;
        let deployments = self
            .platform
            .deployments_by_compose(&claims.compose_id, request_id)
            .await?;
        let domains = match self
            .platform
            .domains_by_compose(&claims.compose_id, request_id)
            .await
        {
            Ok(domains) => domains,
            Err(e) => {
                tracing::warn!(compose_id = %claims.compose_id, error = %e, "domain lookup failed");
                Vec::new()
            }
        };

        let meta = compose
            .description
            .as_deref()
            .and_then(metadata::parse)
            .unwrap_or_else(|| {
                // The description slot was lost; rebuild a plausible lease
                // from the token's own issue time.
                let mut synthesized = SessionMetadata::new(
                    &claims.actor_id,
                    &claims.chat_id,
                    claims.iat * 1000,
                    self.settings.idle_ttl_sec(),
                );
                synthesized.rollout_cohort = None;
                synthesized
            });

        let deploy_state = derive_deployment_state(&deployments);
        let status = derive_session_status(deploy_state, compose.compose_status.as_deref());
        let domain = domains
            .first()
            .map(|d| d.host.clone())
            .unwrap_or_else(|| claims.domain.clone());
        let cohort = self.resolve_cohort(&meta, &compose, Cohort::Stable);

        let session = Session {
            project_id: claims.project_id.clone(),
            environment_id: claims.environment_id.clone(),
            compose_id: claims.compose_id.clone(),
            preview_url: preview_url(&domain),
            domain,
            status,
            expires_at: meta.expires_at_ms(),
            server_id: compose.server_id.clone(),
            rollout_cohort: cohort,
        };
        Ok(LoadedSession {
            compose,
            meta,
            session,
            deploy_state,
        })
    }

    /// Metadata cohort wins; otherwise infer from the compose's pinned
    /// server; otherwise fall back to the caller's rollout decision.
    fn resolve_cohort(&self, meta: &SessionMetadata, compose: &Compose, fallback: Cohort) -> Cohort {
        if let Some(cohort) = meta.rollout_cohort {
            return cohort;
        }
        match (
            compose.server_id.as_deref(),
            self.settings.canary_server_id.as_deref(),
        ) {
            (Some(server), Some(canary)) => {
                if server == canary {
                    Cohort::Canary
                } else {
                    Cohort::Stable
                }
            }
            _ => fallback,
        }
    }

    async fn resolve_server(
        &self,
        cohort: Cohort,
        request_id: &str,
    ) -> Result<Option<String>, RuntimeError> {
        match cohort {
            Cohort::Canary => match &self.settings.canary_server_id {
                Some(id) => Ok(Some(id.clone())),
                None => Err(RuntimeError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    codes::NO_CANARY_DEPLOY_SERVER,
                    "canary rollout selected but no canary deploy server is configured",
                )),
            },
            Cohort::Stable => {
                if let Some(id) = &self.settings.server_id {
                    return Ok(Some(id.clone()));
                }
                match self.platform.server_all(request_id).await {
                    Ok(servers) => Ok(servers
                        .into_iter()
                        .find(|s| s.is_ssh_enabled())
                        .map(|s| s.server_id)),
                    Err(e) => {
                        tracing::warn!(error = %e, "server enumeration failed, using platform default");
                        Ok(None)
                    }
                }
            }
        }
    }

    /// First existing domain wins; otherwise generate one and attach it to
    /// the preview service. Any failure here means the session has no
    /// reachable preview, which callers surface as 503.
    async fn ensure_domain(
        &self,
        compose_id: &str,
        app_name: &str,
        server_id: Option<&str>,
        request_id: &str,
    ) -> Result<String, RuntimeError> {
        let domains = self
            .platform
            .domains_by_compose(compose_id, request_id)
            .await
            .map_err(domain_unavailable)?;
        if let Some(domain) = domains.first() {
            return Ok(domain.host.clone());
        }

        let host = self
            .platform
            .domain_generate(app_name, server_id, request_id)
            .await
            .map_err(domain_unavailable)?;
        if host.is_empty() {
            return Err(RuntimeError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::RUNTIME_DOMAIN_UNAVAILABLE,
                "platform generated an empty preview domain",
            ));
        }
        self.platform
            .domain_create(
                &DomainCreateInput {
                    compose_id: compose_id.to_string(),
                    host: host.clone(),
                    path: "/".to_string(),
                    port: PREVIEW_PORT,
                    https: false,
                    service_name: PREVIEW_SERVICE.to_string(),
                    certificate_type: "none".to_string(),
                },
                request_id,
            )
            .await
            .map_err(domain_unavailable)?;
        Ok(host)
    }

    async fn delete_stale(&self, stale: Vec<String>, request_id: &str) {
        for compose_id in stale {
            match self
                .platform
                .compose_delete(&compose_id, true, request_id)
                .await
            {
                Ok(()) => tracing::info!(compose_id = %compose_id, "pruned stale session compose"),
                Err(e) => tracing::warn!(
                    compose_id = %compose_id,
                    error = %e,
                    "failed to prune stale compose"
                ),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn issue(
        &self,
        project: &Project,
        environment_id: &str,
        compose: &Compose,
        meta: &SessionMetadata,
        domain: String,
        status: SessionStatus,
        deploy_state: DeploymentState,
        cohort: Cohort,
    ) -> Result<CreateOutcome, RuntimeError> {
        let binding = SessionBinding {
            actor_id: meta.actor_id.clone(),
            chat_id: meta.chat_id.clone(),
            project_id: project.project_id.clone(),
            environment_id: environment_id.to_string(),
            compose_id: compose.compose_id.clone(),
            domain: domain.clone(),
        };
        let (token, claims) = token::sign(
            &binding,
            &self.settings.token_secret,
            self.settings.idle_ttl_sec(),
        )?;

        let session = Session {
            project_id: binding.project_id,
            environment_id: binding.environment_id,
            compose_id: binding.compose_id,
            preview_url: preview_url(&domain),
            domain,
            status,
            expires_at: claims.exp * 1000,
            server_id: compose.server_id.clone(),
            rollout_cohort: cohort,
        };
        Ok(CreateOutcome {
            token,
            session,
            deployment_status: deploy_state,
        })
    }
}

/// Preview-domain failures are a service-availability problem, not a
/// client mistake.
fn domain_unavailable(cause: RuntimeError) -> RuntimeError {
    RuntimeError::new(
        StatusCode::SERVICE_UNAVAILABLE,
        codes::RUNTIME_DOMAIN_UNAVAILABLE,
        format!("preview domain unavailable: {}", cause.message),
    )
    .with_details(json!({ "upstreamCode": cause.code }))
}

fn resolve_environment(project: &Project) -> Result<&Environment, RuntimeError> {
    project
        .environments
        .iter()
        .find(|e| e.is_default || e.name == "production")
        .or_else(|| project.environments.first())
        .ok_or_else(|| {
            RuntimeError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::NO_ENVIRONMENT,
                "project has no environment to deploy into",
            )
            .with_details(json!({ "projectId": project.project_id }))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test_support::MockPlatform;
    use std::time::Duration;

    fn settings(secret: &str) -> OrchestratorSettings {
        OrchestratorSettings {
            session_idle_min: 15,
            canary_percent: 0.0,
            server_id: None,
            canary_server_id: None,
            token_secret: secret.to_string(),
        }
    }

    fn orchestrator(
        platform: Arc<MockPlatform>,
        settings: OrchestratorSettings,
    ) -> Arc<SessionOrchestrator> {
        Arc::new(SessionOrchestrator::new(
            platform,
            settings,
            Arc::new(IdleSweeper::new()),
        ))
    }

    fn actor_project_name(actor_id: &str) -> String {
        format!("bolt-actor-{}", &rollout::name_hash(actor_id)[..10])
    }

    async fn seed_actor_project(platform: &MockPlatform, actor_id: &str) {
        platform.add_project("p1", "e1").await;
        platform
            .set_project_name("p1", &actor_project_name(actor_id))
            .await;
    }

    #[tokio::test]
    async fn create_provisions_compose_template_domain_and_deploy() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let outcome = orch.create("actor-1", "chat-1", None, "req-1").await.unwrap();

        assert_eq!(platform.create_calls().await, 1);
        assert_eq!(outcome.deployment_status, DeploymentState::Queued);
        assert_eq!(outcome.session.status, SessionStatus::Creating);
        assert_eq!(outcome.session.rollout_cohort, Cohort::Stable);
        assert!(outcome.session.domain.ends_with(".preview.mock.dev"));
        assert_eq!(
            outcome.session.preview_url,
            format!("https://{}", outcome.session.domain)
        );

        // Template files seeded through the file manager.
        let written = platform.written_files(&outcome.session.compose_id).await;
        let paths: Vec<&str> = written.iter().map(|w| w.path.as_str()).collect();
        assert!(paths.contains(&"package.json"));
        assert!(paths.contains(&"src/App.jsx"));
        assert!(written.iter().all(|w| w.overwrite));

        // Fresh compose has no deployments, so a deploy was queued.
        assert_eq!(platform.deploys().await.len(), 1);

        // Domain attached to the preview service.
        let domains = platform.created_domains().await;
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].port, 4173);
        assert_eq!(domains[0].service_name, "app");
        assert_eq!(domains[0].path, "/");

        // Token binds the compose and verifies under the secret.
        let claims = orch.with_claims(&outcome.token).unwrap();
        assert_eq!(claims.compose_id, outcome.session.compose_id);
        assert_eq!(claims.actor_id, "actor-1");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[tokio::test]
    async fn create_makes_actor_project_when_absent() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_project("p-unrelated", "e-unrelated").await;

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let outcome = orch.create("actor-2", "chat-1", None, "req-1").await.unwrap();
        assert!(outcome.session.project_id.starts_with("p-created-"));
    }

    #[tokio::test]
    async fn canary_without_server_fails_with_503() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;

        let mut cfg = settings("secret");
        cfg.canary_percent = 100.0;
        let orch = orchestrator(Arc::clone(&platform), cfg);

        let err = orch
            .create("actor-1", "chat-1", None, "req-1")
            .await
            .unwrap_err();
        assert_eq!(err.status.as_u16(), 503);
        assert_eq!(err.code, codes::NO_CANARY_DEPLOY_SERVER);
        assert_eq!(platform.create_calls().await, 0);
    }

    #[tokio::test]
    async fn canary_cohort_pins_canary_server() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;

        let mut cfg = settings("secret");
        cfg.canary_percent = 100.0;
        cfg.canary_server_id = Some("srv-canary".to_string());
        let orch = orchestrator(Arc::clone(&platform), cfg);

        let outcome = orch.create("actor-1", "chat-1", None, "req-1").await.unwrap();
        assert_eq!(outcome.session.rollout_cohort, Cohort::Canary);
        assert_eq!(outcome.session.server_id.as_deref(), Some("srv-canary"));
    }

    #[tokio::test]
    async fn stable_cohort_prefers_configured_then_ssh_server() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;
        platform.add_server("srv-nossh", None).await;
        platform.add_server("srv-ssh", Some("key-1")).await;

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let outcome = orch.create("actor-1", "chat-1", None, "req-1").await.unwrap();
        assert_eq!(outcome.session.server_id.as_deref(), Some("srv-ssh"));

        let mut cfg = settings("secret");
        cfg.server_id = Some("srv-pinned".to_string());
        let orch = orchestrator(Arc::clone(&platform), cfg);
        let outcome = orch.create("actor-1", "chat-2", None, "req-2").await.unwrap();
        assert_eq!(outcome.session.server_id.as_deref(), Some("srv-pinned"));
    }

    #[tokio::test]
    async fn reuse_skips_create_and_advances_lease() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;

        let now = Utc::now().timestamp_millis();
        let mut meta = SessionMetadata::new("actor-1", "chat-1", now - 60_000, 900);
        meta.last_seen_at = now - 60_000;
        platform
            .add_compose_in_project("p1", "e1", "c-existing", &metadata::format(&meta))
            .await;
        platform.add_deployment("c-existing", "done", 1_000).await;
        platform.add_domain("c-existing", "existing.preview.mock.dev").await;

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let outcome = orch.create("actor-1", "chat-1", None, "req-1").await.unwrap();

        assert_eq!(platform.create_calls().await, 0);
        assert!(platform.deleted_composes().await.is_empty());
        assert_eq!(outcome.session.compose_id, "c-existing");
        assert_eq!(outcome.session.status, SessionStatus::Ready);
        assert_eq!(outcome.deployment_status, DeploymentState::Done);
        assert_eq!(outcome.session.domain, "existing.preview.mock.dev");

        // Lease was rewritten with a fresh lastSeenAt.
        let description = platform.compose_description("c-existing").await.unwrap();
        let updated = metadata::parse(&description).unwrap();
        assert!(updated.last_seen_at >= now);
        assert_eq!(updated.created_at, meta.created_at);
        assert_eq!(updated.rollout_cohort, Some(Cohort::Stable));
    }

    #[tokio::test]
    async fn errored_session_is_pruned_and_replaced() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;

        let now = Utc::now().timestamp_millis();
        let meta = SessionMetadata::new("actor-1", "chat-1", now, 900);
        platform
            .add_compose_in_project("p1", "e1", "c-err", &metadata::format(&meta))
            .await;
        platform.add_deployment("c-err", "error", 2_000).await;

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let outcome = orch.create("actor-1", "chat-1", None, "req-1").await.unwrap();

        // Derived status error makes the candidate unusable: a fresh
        // compose is created and the dead one pruned.
        assert_eq!(platform.create_calls().await, 1);
        assert_ne!(outcome.session.compose_id, "c-err");
        assert!(platform.deleted_composes().await.contains(&"c-err".to_string()));
    }

    #[tokio::test]
    async fn reuse_triggers_deploy_when_queued() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;

        let now = Utc::now().timestamp_millis();
        let meta = SessionMetadata::new("actor-1", "chat-1", now, 900);
        platform
            .add_compose_in_project("p1", "e1", "c-queued", &metadata::format(&meta))
            .await;
        // No deployments at all: derived queued, session creating, reusable.

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let outcome = orch.create("actor-1", "chat-1", None, "req-1").await.unwrap();

        assert_eq!(platform.create_calls().await, 0);
        assert_eq!(platform.deploys().await, vec!["c-queued"]);
        assert_eq!(outcome.deployment_status, DeploymentState::Queued);
        assert_eq!(outcome.session.status, SessionStatus::Deploying);
    }

    #[tokio::test]
    async fn duplicate_sessions_prune_to_freshest() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;

        let now = Utc::now().timestamp_millis();
        let mut older = SessionMetadata::new("actor-1", "chat-1", now - 500_000, 900);
        older.last_seen_at = now - 400_000;
        let mut newer = SessionMetadata::new("actor-1", "chat-1", now - 300_000, 900);
        newer.last_seen_at = now - 10_000;

        platform
            .add_compose_in_project("p1", "e1", "c-old", &metadata::format(&older))
            .await;
        platform
            .add_compose_in_project("p1", "e1", "c-new", &metadata::format(&newer))
            .await;
        platform.add_deployment("c-old", "done", 1_000).await;
        platform.add_deployment("c-new", "done", 1_000).await;
        platform.add_domain("c-new", "new.preview.mock.dev").await;

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let outcome = orch.create("actor-1", "chat-1", None, "req-1").await.unwrap();

        assert_eq!(outcome.session.compose_id, "c-new");
        assert_eq!(platform.deleted_composes().await, vec!["c-old"]);
        assert_eq!(platform.create_calls().await, 0);
    }

    #[tokio::test]
    async fn concurrent_creates_share_one_platform_effect() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;
        platform.delay_compose_create(Duration::from_millis(40)).await;

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));

        let a = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.create("actor-1", "chat-1", None, "req-a").await })
        };
        let b = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.create("actor-1", "chat-1", None, "req-b").await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_eq!(platform.create_calls().await, 1);
        assert_eq!(a.token, b.token);
        assert_eq!(a.session, b.session);
    }

    #[tokio::test]
    async fn conflict_recovery_adopts_concurrent_winner() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;

        let now = Utc::now().timestamp_millis();
        let meta = SessionMetadata::new("actor-1", "chat-1", now, 900);
        platform
            .conflict_next_create(Some(("p1", "e1", &metadata::format(&meta))))
            .await;

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let outcome = orch.create("actor-1", "chat-1", None, "req-1").await.unwrap();

        assert!(outcome.session.compose_id.starts_with("c-conflict-"));
        assert_eq!(platform.create_calls().await, 1);
    }

    #[tokio::test]
    async fn unrecovered_conflict_surfaces() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;
        platform.conflict_next_create(None).await;

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let err = orch
            .create("actor-1", "chat-1", None, "req-1")
            .await
            .unwrap_err();
        assert_eq!(err.status.as_u16(), 409);
        assert_eq!(err.code, codes::CONFLICT);
    }

    #[tokio::test]
    async fn get_round_trips_session_from_token() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let created = orch.create("actor-1", "chat-1", None, "req-1").await.unwrap();

        let fetched = orch.get(&created.token, "req-2").await.unwrap();
        assert_eq!(fetched.claims.actor_id, "actor-1");
        assert_eq!(fetched.session.compose_id, created.session.compose_id);
        assert_eq!(fetched.session.domain, created.session.domain);
    }

    #[tokio::test]
    async fn get_with_bad_token_is_401() {
        let platform = Arc::new(MockPlatform::new());
        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let err = orch.get("garbage", "req-1").await.unwrap_err();
        assert_eq!(err.status.as_u16(), 401);
    }

    #[tokio::test]
    async fn heartbeat_slides_the_lease_and_reissues_token() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let created = orch.create("actor-1", "chat-1", None, "req-1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let before = Utc::now().timestamp_millis();
        let beat = orch.heartbeat(&created.token, "req-2").await.unwrap();

        // expiresAt == now + idleTtl, to clock tolerance.
        let horizon = beat.expires_at - before;
        assert!((15 * 60 * 1000 - 200..=15 * 60 * 1000 + 200).contains(&horizon));

        // New token, same binding, later expiry.
        assert_ne!(beat.token, created.token);
        let old_claims = orch.with_claims(&created.token).unwrap();
        let new_claims = orch.with_claims(&beat.token).unwrap();
        assert_eq!(new_claims.compose_id, old_claims.compose_id);
        assert!(new_claims.exp > old_claims.exp);

        // Metadata lastSeenAt advanced.
        let description = platform
            .compose_description(&created.session.compose_id)
            .await
            .unwrap();
        let updated = metadata::parse(&description).unwrap();
        assert!(updated.last_seen_at >= before - 200);
    }

    #[tokio::test]
    async fn delete_removes_compose_with_volumes() {
        let platform = Arc::new(MockPlatform::new());
        seed_actor_project(&platform, "actor-1").await;

        let orch = orchestrator(Arc::clone(&platform), settings("secret"));
        let created = orch.create("actor-1", "chat-1", None, "req-1").await.unwrap();

        orch.delete(&created.token, "req-2").await.unwrap();
        assert_eq!(
            platform.deleted_composes().await,
            vec![created.session.compose_id.clone()]
        );
    }

    #[tokio::test]
    async fn project_without_environment_is_500() {
        let project = Project {
            project_id: "p1".into(),
            name: "bolt-actor-x".into(),
            environments: vec![],
        };
        let err = resolve_environment(&project).unwrap_err();
        assert_eq!(err.status.as_u16(), 500);
        assert_eq!(err.code, codes::NO_ENVIRONMENT);
    }

    #[test]
    fn environment_resolution_prefers_default_then_production() {
        let env = |id: &str, name: &str, is_default: bool| Environment {
            environment_id: id.into(),
            name: name.into(),
            is_default,
            composes: vec![],
        };
        let project = Project {
            project_id: "p1".into(),
            name: "x".into(),
            environments: vec![
                env("e1", "staging", false),
                env("e2", "production", false),
                env("e3", "other", true),
            ],
        };
        // First match in order wins: e2 is "production" but e3 is flagged
        // default; iteration order finds e2 first.
        assert_eq!(resolve_environment(&project).unwrap().environment_id, "e2");

        let project = Project {
            project_id: "p1".into(),
            name: "x".into(),
            environments: vec![env("e1", "staging", false), env("e2", "qa", false)],
        };
        assert_eq!(resolve_environment(&project).unwrap().environment_id, "e1");
    }
}
