//! In-memory [`PlatformApi`] used by unit tests.
//!
//! Holds the same project → environment → compose shape the panel exposes,
//! records every mutation, and can be primed to fail or delay specific
//! calls so orchestration edge cases are reproducible.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use hyper::StatusCode;
use serde_json::json;
use tokio::sync::Mutex;

use super::types::*;
use super::PlatformApi;
use crate::error::{RuntimeError, codes};

#[derive(Default)]
struct MockState {
    projects: Vec<Project>,
    deployments: HashMap<String, Vec<Deployment>>,
    domains: HashMap<String, Vec<ComposeDomain>>,
    servers: Vec<PlatformServer>,
    files: HashMap<String, Vec<FileWriteInput>>,
    stored_files: HashMap<String, FileContent>,
    listings: HashMap<String, Vec<FileEntry>>,

    deleted: Vec<String>,
    deploys: Vec<String>,
    redeploys: Vec<String>,
    updates: Vec<ComposeUpdateInput>,
    generated_domains: Vec<String>,
    created_domains: Vec<DomainCreateInput>,

    create_calls: u32,
    conflicts_remaining: u32,
    conflict_seed: Option<(String, String, String)>,
    fail_delete: HashSet<String>,
    delay_project_all: Option<Duration>,
    delay_compose_create: Option<Duration>,
    next_seq: u32,
}

#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_project(&self, project_id: &str, env_id: &str) {
        let mut state = self.state.lock().await;
        ensure_project(&mut state, project_id, env_id);
    }

    pub async fn add_compose_in_project(
        &self,
        project_id: &str,
        env_id: &str,
        compose_id: &str,
        description: &str,
    ) {
        let mut state = self.state.lock().await;
        let env = ensure_project(&mut state, project_id, env_id);
        env.composes.push(Compose {
            compose_id: compose_id.to_string(),
            name: compose_id.to_string(),
            app_name: Some(compose_id.to_string()),
            description: Some(description.to_string()),
            compose_status: Some("idle".to_string()),
            server_id: None,
            environment_id: Some(env_id.to_string()),
        });
    }

    pub async fn set_project_name(&self, project_id: &str, name: &str) {
        let mut state = self.state.lock().await;
        if let Some(project) = state.projects.iter_mut().find(|p| p.project_id == project_id) {
            project.name = name.to_string();
        }
    }

    pub async fn set_compose_status(&self, compose_id: &str, status: &str) {
        let mut state = self.state.lock().await;
        if let Some(compose) = find_compose_mut(&mut state, compose_id) {
            compose.compose_status = Some(status.to_string());
        }
    }

    pub async fn set_compose_server(&self, compose_id: &str, server_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(compose) = find_compose_mut(&mut state, compose_id) {
            compose.server_id = Some(server_id.to_string());
        }
    }

    pub async fn add_deployment(&self, compose_id: &str, status: &str, ts: i64) {
        let mut state = self.state.lock().await;
        let list = state.deployments.entry(compose_id.to_string()).or_default();
        let seq = list.len();
        list.push(Deployment {
            deployment_id: format!("{compose_id}-d{seq}"),
            status: status.to_string(),
            created_at: chrono::TimeZone::timestamp_opt(&Utc, ts, 0).unwrap(),
        });
    }

    pub async fn add_domain(&self, compose_id: &str, host: &str) {
        let mut state = self.state.lock().await;
        state
            .domains
            .entry(compose_id.to_string())
            .or_default()
            .push(ComposeDomain {
                domain_id: None,
                host: host.to_string(),
                path: Some("/".to_string()),
                port: Some(4173),
                https: false,
            });
    }

    pub async fn add_server(&self, server_id: &str, ssh_key_id: Option<&str>) {
        let mut state = self.state.lock().await;
        state.servers.push(PlatformServer {
            server_id: server_id.to_string(),
            name: server_id.to_string(),
            ssh_key_id: ssh_key_id.map(String::from),
        });
    }

    pub async fn put_file(&self, compose_id: &str, content: FileContent) {
        let mut state = self.state.lock().await;
        state
            .stored_files
            .insert(format!("{compose_id}::{}", content.path), content);
    }

    pub async fn put_listing(&self, compose_id: &str, path: &str, entries: Vec<FileEntry>) {
        let mut state = self.state.lock().await;
        state
            .listings
            .insert(format!("{compose_id}::{path}"), entries);
    }

    /// Fail the next compose.create with CONFLICT; when `seed` is set the
    /// conflicting compose (with its description) appears in the project,
    /// as if a concurrent creator won the race.
    pub async fn conflict_next_create(&self, seed: Option<(&str, &str, &str)>) {
        let mut state = self.state.lock().await;
        state.conflicts_remaining = 1;
        state.conflict_seed =
            seed.map(|(p, e, d)| (p.to_string(), e.to_string(), d.to_string()));
    }

    pub async fn fail_delete_of(&self, compose_id: &str) {
        let mut state = self.state.lock().await;
        state.fail_delete.insert(compose_id.to_string());
    }

    pub async fn delay_project_all(&self, delay: Duration) {
        self.state.lock().await.delay_project_all = Some(delay);
    }

    pub async fn delay_compose_create(&self, delay: Duration) {
        self.state.lock().await.delay_compose_create = Some(delay);
    }

    // ── Recorded observations ───────────────────────────────────

    pub async fn create_calls(&self) -> u32 {
        self.state.lock().await.create_calls
    }

    pub async fn deleted_composes(&self) -> Vec<String> {
        self.state.lock().await.deleted.clone()
    }

    pub async fn deploys(&self) -> Vec<String> {
        self.state.lock().await.deploys.clone()
    }

    pub async fn redeploys(&self) -> Vec<String> {
        self.state.lock().await.redeploys.clone()
    }

    pub async fn updates(&self) -> Vec<ComposeUpdateInput> {
        self.state.lock().await.updates.clone()
    }

    pub async fn written_files(&self, compose_id: &str) -> Vec<FileWriteInput> {
        self.state
            .lock()
            .await
            .files
            .get(compose_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn created_domains(&self) -> Vec<DomainCreateInput> {
        self.state.lock().await.created_domains.clone()
    }

    pub async fn written_files_compose_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().await.files.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn compose_description(&self, compose_id: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        find_compose_mut(&mut state, compose_id).and_then(|c| c.description.clone())
    }
}

fn ensure_project<'a>(
    state: &'a mut MockState,
    project_id: &str,
    env_id: &str,
) -> &'a mut Environment {
    let index = match state
        .projects
        .iter()
        .position(|p| p.project_id == project_id)
    {
        Some(index) => index,
        None => {
            state.projects.push(Project {
                project_id: project_id.to_string(),
                name: project_id.to_string(),
                environments: Vec::new(),
            });
            state.projects.len() - 1
        }
    };
    let project = &mut state.projects[index];
    let env_index = match project
        .environments
        .iter()
        .position(|e| e.environment_id == env_id)
    {
        Some(index) => index,
        None => {
            project.environments.push(Environment {
                environment_id: env_id.to_string(),
                name: "production".to_string(),
                is_default: true,
                composes: Vec::new(),
            });
            project.environments.len() - 1
        }
    };
    &mut project.environments[env_index]
}

fn find_compose_mut<'a>(state: &'a mut MockState, compose_id: &str) -> Option<&'a mut Compose> {
    state
        .projects
        .iter_mut()
        .flat_map(|p| p.environments.iter_mut())
        .flat_map(|e| e.composes.iter_mut())
        .find(|c| c.compose_id == compose_id)
}

fn not_found(what: &str) -> RuntimeError {
    RuntimeError::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, format!("{what} not found"))
}

#[async_trait::async_trait]
impl PlatformApi for MockPlatform {
    async fn project_all(&self, _request_id: &str) -> Result<Vec<Project>, RuntimeError> {
        let delay = self.state.lock().await.delay_project_all;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state.lock().await.projects.clone())
    }

    async fn project_create(&self, name: &str, _request_id: &str) -> Result<Project, RuntimeError> {
        let mut state = self.state.lock().await;
        state.next_seq += 1;
        let project_id = format!("p-created-{}", state.next_seq);
        let env_id = format!("e-created-{}", state.next_seq);
        ensure_project(&mut state, &project_id, &env_id);
        let project = state
            .projects
            .iter_mut()
            .find(|p| p.project_id == project_id)
            .ok_or_else(|| not_found("project"))?;
        project.name = name.to_string();
        Ok(project.clone())
    }

    async fn project_one(
        &self,
        project_id: &str,
        _request_id: &str,
    ) -> Result<Project, RuntimeError> {
        self.state
            .lock()
            .await
            .projects
            .iter()
            .find(|p| p.project_id == project_id)
            .cloned()
            .ok_or_else(|| not_found("project"))
    }

    async fn compose_one(
        &self,
        compose_id: &str,
        _request_id: &str,
    ) -> Result<Compose, RuntimeError> {
        let mut state = self.state.lock().await;
        find_compose_mut(&mut state, compose_id)
            .map(|c| c.clone())
            .ok_or_else(|| not_found("compose"))
    }

    async fn compose_create(
        &self,
        input: &ComposeCreateInput,
        _request_id: &str,
    ) -> Result<Compose, RuntimeError> {
        let delay = self.state.lock().await.delay_compose_create;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().await;
        state.create_calls += 1;

        if state.conflicts_remaining > 0 {
            state.conflicts_remaining -= 1;
            if let Some((project_id, env_id, description)) = state.conflict_seed.take() {
                let seq = {
                    state.next_seq += 1;
                    state.next_seq
                };
                let compose_id = format!("c-conflict-{seq}");
                let env = ensure_project(&mut state, &project_id, &env_id);
                env.composes.push(Compose {
                    compose_id: compose_id.clone(),
                    name: compose_id.clone(),
                    app_name: Some(compose_id),
                    description: Some(description),
                    compose_status: Some("idle".to_string()),
                    server_id: None,
                    environment_id: Some(env_id),
                });
            }
            return Err(RuntimeError::new(
                StatusCode::CONFLICT,
                codes::CONFLICT,
                "compose already exists",
            )
            .with_details(json!({ "procedure": "compose.create" })));
        }

        state.next_seq += 1;
        let compose_id = format!("c-created-{}", state.next_seq);
        let compose = Compose {
            compose_id: compose_id.clone(),
            name: input.name.clone(),
            app_name: Some(input.app_name.clone()),
            description: Some(input.description.clone()),
            compose_status: Some("idle".to_string()),
            server_id: input.server_id.clone(),
            environment_id: Some(input.environment_id.clone()),
        };
        let env_id = input.environment_id.clone();
        let project_id = state
            .projects
            .iter()
            .find(|p| p.environments.iter().any(|e| e.environment_id == env_id))
            .map(|p| p.project_id.clone())
            .ok_or_else(|| not_found("environment"))?;
        let env = ensure_project(&mut state, &project_id, &env_id);
        env.composes.push(compose.clone());
        Ok(compose)
    }

    async fn compose_update(
        &self,
        input: &ComposeUpdateInput,
        _request_id: &str,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        let Some(compose) = find_compose_mut(&mut state, &input.compose_id) else {
            return Err(not_found("compose"));
        };
        compose.description = Some(input.description.clone());
        state.updates.push(input.clone());
        Ok(())
    }

    async fn compose_delete(
        &self,
        compose_id: &str,
        _delete_volumes: bool,
        _request_id: &str,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        if state.fail_delete.contains(compose_id) {
            return Err(RuntimeError::new(
                StatusCode::BAD_GATEWAY,
                codes::NETWORK_ERROR,
                "delete failed",
            ));
        }
        for project in &mut state.projects {
            for env in &mut project.environments {
                env.composes.retain(|c| c.compose_id != compose_id);
            }
        }
        state.deleted.push(compose_id.to_string());
        Ok(())
    }

    async fn compose_deploy(
        &self,
        compose_id: &str,
        _request_id: &str,
    ) -> Result<(), RuntimeError> {
        self.state.lock().await.deploys.push(compose_id.to_string());
        Ok(())
    }

    async fn compose_redeploy(
        &self,
        compose_id: &str,
        _request_id: &str,
    ) -> Result<(), RuntimeError> {
        self.state
            .lock()
            .await
            .redeploys
            .push(compose_id.to_string());
        Ok(())
    }

    async fn deployments_by_compose(
        &self,
        compose_id: &str,
        _request_id: &str,
    ) -> Result<Vec<Deployment>, RuntimeError> {
        Ok(self
            .state
            .lock()
            .await
            .deployments
            .get(compose_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn domains_by_compose(
        &self,
        compose_id: &str,
        _request_id: &str,
    ) -> Result<Vec<ComposeDomain>, RuntimeError> {
        Ok(self
            .state
            .lock()
            .await
            .domains
            .get(compose_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn domain_generate(
        &self,
        app_name: &str,
        _server_id: Option<&str>,
        _request_id: &str,
    ) -> Result<String, RuntimeError> {
        let host = format!("{app_name}.preview.mock.dev");
        self.state
            .lock()
            .await
            .generated_domains
            .push(host.clone());
        Ok(host)
    }

    async fn domain_create(
        &self,
        input: &DomainCreateInput,
        _request_id: &str,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.created_domains.push(input.clone());
        state
            .domains
            .entry(input.compose_id.clone())
            .or_default()
            .push(ComposeDomain {
                domain_id: None,
                host: input.host.clone(),
                path: Some(input.path.clone()),
                port: Some(input.port),
                https: input.https,
            });
        Ok(())
    }

    async fn server_all(&self, _request_id: &str) -> Result<Vec<PlatformServer>, RuntimeError> {
        Ok(self.state.lock().await.servers.clone())
    }

    async fn files_list(
        &self,
        compose_id: &str,
        path: &str,
        _request_id: &str,
    ) -> Result<Vec<FileEntry>, RuntimeError> {
        Ok(self
            .state
            .lock()
            .await
            .listings
            .get(&format!("{compose_id}::{path}"))
            .cloned()
            .unwrap_or_default())
    }

    async fn files_read(
        &self,
        compose_id: &str,
        path: &str,
        _request_id: &str,
    ) -> Result<FileContent, RuntimeError> {
        self.state
            .lock()
            .await
            .stored_files
            .get(&format!("{compose_id}::{path}"))
            .cloned()
            .ok_or_else(|| not_found("file"))
    }

    async fn files_write(
        &self,
        input: &FileWriteInput,
        _request_id: &str,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state
            .files
            .entry(input.compose_id.clone())
            .or_default()
            .push(input.clone());
        state.stored_files.insert(
            format!("{}::{}", input.compose_id, input.path),
            FileContent {
                path: input.path.clone(),
                content: input.content.clone(),
                encoding: input.encoding,
                is_binary: input.encoding == FileEncoding::Base64,
                size: Some(input.content.len() as u64),
                modified_at: None,
            },
        );
        Ok(())
    }

    async fn files_mkdir(
        &self,
        compose_id: &str,
        path: &str,
        _request_id: &str,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        let key = format!("{compose_id}::{path}");
        state.listings.entry(key).or_default();
        Ok(())
    }

    async fn files_delete(
        &self,
        compose_id: &str,
        path: &str,
        _recursive: bool,
        _request_id: &str,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state
            .stored_files
            .remove(&format!("{compose_id}::{path}"));
        Ok(())
    }

    async fn files_search(
        &self,
        compose_id: &str,
        query: &str,
        _path: Option<&str>,
        _request_id: &str,
    ) -> Result<Vec<FileEntry>, RuntimeError> {
        let state = self.state.lock().await;
        let prefix = format!("{compose_id}::");
        Ok(state
            .stored_files
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter(|(_, file)| file.path.contains(query) || file.content.contains(query))
            .map(|(_, file)| FileEntry {
                name: file
                    .path
                    .rsplit('/')
                    .next()
                    .unwrap_or(file.path.as_str())
                    .to_string(),
                path: file.path.clone(),
                kind: EntryKind::File,
                size: file.size,
                modified_at: None,
            })
            .collect())
    }
}
