//! In-memory [`RuntimeApi`] used by the SDK's unit tests: a virtual file
//! tree plus canned session responses, with call counters and injectable
//! failures.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use hyper::StatusCode;
use tokio::sync::Mutex;

use super::api::{
    CreateSessionResponse, GetSessionResponse, HeartbeatResponse, RemoteEntry, RemoteFile,
    RuntimeApi,
};
use crate::error::{RuntimeError, codes};
use crate::paths;
use crate::platform::types::{EntryKind, FileEncoding};
use crate::rollout::Cohort;
use crate::session::{DeploymentState, Session, SessionStatus};

struct MockState {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,

    list_calls: u32,
    read_calls: u32,
    writes: Vec<(String, String)>,
    mkdirs: Vec<String>,
    deletes: Vec<(String, bool)>,
    redeploys: u32,

    create_calls: u32,
    heartbeat_calls: u32,
    deleted_tokens: Vec<String>,
    token_seq: u32,
    rotate_heartbeat_token: bool,
    session_status: SessionStatus,
    deployment_status: DeploymentState,

    fail_lists: bool,
    fail_writes: bool,
    fail_get_status: Option<u16>,
    delay_lists: Option<Duration>,
    delay_create: Option<Duration>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            list_calls: 0,
            read_calls: 0,
            writes: Vec::new(),
            mkdirs: Vec::new(),
            deletes: Vec::new(),
            redeploys: 0,
            create_calls: 0,
            heartbeat_calls: 0,
            deleted_tokens: Vec::new(),
            token_seq: 0,
            rotate_heartbeat_token: false,
            session_status: SessionStatus::Ready,
            deployment_status: DeploymentState::Done,
            fail_lists: false,
            fail_writes: false,
            fail_get_status: None,
            delay_lists: None,
            delay_create: None,
        }
    }
}

pub struct MockRuntimeApi {
    state: Mutex<MockState>,
}

impl MockRuntimeApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    pub async fn seed_file(&self, virtual_path: &str, content: &str) {
        let mut state = self.state.lock().await;
        state
            .files
            .insert(virtual_path.to_string(), content.to_string());
        for dir in implied_dirs(virtual_path) {
            state.dirs.insert(dir);
        }
    }

    pub async fn seed_dir(&self, virtual_path: &str) {
        self.state.lock().await.dirs.insert(virtual_path.to_string());
    }

    pub async fn remove_file(&self, virtual_path: &str) {
        self.state.lock().await.files.remove(virtual_path);
    }

    pub async fn list_calls(&self) -> u32 {
        self.state.lock().await.list_calls
    }

    pub async fn read_calls(&self) -> u32 {
        self.state.lock().await.read_calls
    }

    pub async fn writes(&self) -> Vec<(String, String)> {
        self.state.lock().await.writes.clone()
    }

    pub async fn mkdirs(&self) -> Vec<String> {
        self.state.lock().await.mkdirs.clone()
    }

    pub async fn deletes(&self) -> Vec<(String, bool)> {
        self.state.lock().await.deletes.clone()
    }

    pub async fn redeploy_calls(&self) -> u32 {
        self.state.lock().await.redeploys
    }

    pub async fn create_calls(&self) -> u32 {
        self.state.lock().await.create_calls
    }

    pub async fn heartbeat_calls(&self) -> u32 {
        self.state.lock().await.heartbeat_calls
    }

    pub async fn deleted_tokens(&self) -> Vec<String> {
        self.state.lock().await.deleted_tokens.clone()
    }

    pub async fn fail_lists(&self, fail: bool) {
        self.state.lock().await.fail_lists = fail;
    }

    pub async fn fail_writes(&self, fail: bool) {
        self.state.lock().await.fail_writes = fail;
    }

    pub async fn fail_get_with(&self, status: u16) {
        self.state.lock().await.fail_get_status = Some(status);
    }

    pub async fn rotate_heartbeat_token(&self, rotate: bool) {
        self.state.lock().await.rotate_heartbeat_token = rotate;
    }

    pub async fn set_statuses(&self, session: SessionStatus, deployment: DeploymentState) {
        let mut state = self.state.lock().await;
        state.session_status = session;
        state.deployment_status = deployment;
    }

    pub async fn delay_lists(&self, delay: Duration) {
        self.state.lock().await.delay_lists = Some(delay);
    }

    pub async fn delay_create(&self, delay: Duration) {
        self.state.lock().await.delay_create = Some(delay);
    }

    fn session_for(chat_id: &str, status: SessionStatus) -> Session {
        Session {
            project_id: "p-mock".to_string(),
            environment_id: "e-mock".to_string(),
            compose_id: format!("c-{chat_id}"),
            domain: "mock.preview.dev".to_string(),
            preview_url: "https://mock.preview.dev".to_string(),
            status,
            expires_at: chrono::Utc::now().timestamp_millis() + 900_000,
            server_id: None,
            rollout_cohort: Cohort::Stable,
        }
    }
}

fn implied_dirs(virtual_path: &str) -> Vec<String> {
    let Some(rest) = virtual_path.strip_prefix(&format!("{}/", paths::VIRTUAL_WORKDIR)) else {
        return Vec::new();
    };
    let segments: Vec<&str> = rest.split('/').collect();
    let mut dirs = Vec::new();
    let mut current = paths::VIRTUAL_WORKDIR.to_string();
    for segment in &segments[..segments.len().saturating_sub(1)] {
        current = format!("{current}/{segment}");
        dirs.push(current.clone());
    }
    dirs
}

fn entry_for(virtual_path: &str, kind: EntryKind, size: Option<u64>) -> RemoteEntry {
    let name = virtual_path
        .rsplit('/')
        .next()
        .unwrap_or(virtual_path)
        .to_string();
    RemoteEntry {
        name,
        path: paths::to_platform_path(virtual_path).unwrap_or_default(),
        kind,
        size,
        modified_at: None,
        virtual_path: virtual_path.to_string(),
    }
}

#[async_trait]
impl RuntimeApi for MockRuntimeApi {
    async fn create_session(
        &self,
        chat_id: &str,
        _template_id: Option<&str>,
    ) -> Result<CreateSessionResponse, RuntimeError> {
        let delay = self.state.lock().await.delay_create;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().await;
        state.create_calls += 1;
        state.token_seq += 1;
        Ok(CreateSessionResponse {
            runtime_token: format!("tok-{}", state.token_seq),
            session: Self::session_for(chat_id, state.session_status),
            deployment_status: state.deployment_status,
        })
    }

    async fn get_session(&self, _token: &str) -> Result<GetSessionResponse, RuntimeError> {
        let state = self.state.lock().await;
        if let Some(status) = state.fail_get_status {
            return Err(RuntimeError::new(
                StatusCode::from_u16(status)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                codes::UNAUTHORIZED,
                "session lookup failed",
            ));
        }
        Ok(GetSessionResponse {
            session_status: state.session_status,
            preview_url: "https://mock.preview.dev".to_string(),
            deployment_status: state.deployment_status,
            session: Self::session_for("chat", state.session_status),
        })
    }

    async fn heartbeat(&self, _token: &str) -> Result<HeartbeatResponse, RuntimeError> {
        let mut state = self.state.lock().await;
        state.heartbeat_calls += 1;
        let runtime_token = if state.rotate_heartbeat_token {
            state.token_seq += 1;
            Some(format!("tok-{}", state.token_seq))
        } else {
            None
        };
        Ok(HeartbeatResponse {
            status: state.session_status,
            expires_at: chrono::Utc::now().timestamp_millis() + 900_000,
            runtime_token,
        })
    }

    async fn delete_session(&self, token: &str) -> Result<(), RuntimeError> {
        self.state
            .lock()
            .await
            .deleted_tokens
            .push(token.to_string());
        Ok(())
    }

    async fn redeploy(&self, _token: &str, _reason: Option<&str>) -> Result<(), RuntimeError> {
        self.state.lock().await.redeploys += 1;
        Ok(())
    }

    async fn list_files(
        &self,
        _token: &str,
        virtual_path: &str,
    ) -> Result<Vec<RemoteEntry>, RuntimeError> {
        let delay = self.state.lock().await.delay_lists;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().await;
        state.list_calls += 1;
        if state.fail_lists {
            return Err(RuntimeError::new(
                StatusCode::BAD_GATEWAY,
                codes::NETWORK_ERROR,
                "listing failed",
            ));
        }

        let prefix = format!("{}/", virtual_path.trim_end_matches('/'));
        let mut entries = Vec::new();
        for dir in &state.dirs {
            if let Some(rest) = dir.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(entry_for(dir, EntryKind::Directory, None));
                }
            }
        }
        for (file, content) in &state.files {
            if let Some(rest) = file.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(entry_for(file, EntryKind::File, Some(content.len() as u64)));
                }
            }
        }
        Ok(entries)
    }

    async fn read_file(
        &self,
        _token: &str,
        virtual_path: &str,
    ) -> Result<RemoteFile, RuntimeError> {
        let mut state = self.state.lock().await;
        state.read_calls += 1;
        let content = state
            .files
            .get(virtual_path)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found(format!("no such file: {virtual_path}")))?;
        Ok(RemoteFile {
            path: paths::to_platform_path(virtual_path).unwrap_or_default(),
            size: Some(content.len() as u64),
            content,
            encoding: FileEncoding::Utf8,
            is_binary: false,
            modified_at: None,
            virtual_path: virtual_path.to_string(),
        })
    }

    async fn write_file(
        &self,
        _token: &str,
        virtual_path: &str,
        content: &str,
        _encoding: FileEncoding,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        if state.fail_writes {
            return Err(RuntimeError::new(
                StatusCode::BAD_GATEWAY,
                codes::NETWORK_ERROR,
                "write failed",
            ));
        }
        state
            .writes
            .push((virtual_path.to_string(), content.to_string()));
        state
            .files
            .insert(virtual_path.to_string(), content.to_string());
        for dir in implied_dirs(virtual_path) {
            state.dirs.insert(dir);
        }
        Ok(())
    }

    async fn mkdir(&self, _token: &str, virtual_path: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.mkdirs.push(virtual_path.to_string());
        if state.dirs.contains(virtual_path) {
            return Err(RuntimeError::conflict("directory already exists"));
        }
        state.dirs.insert(virtual_path.to_string());
        Ok(())
    }

    async fn delete_path(
        &self,
        _token: &str,
        virtual_path: &str,
        recursive: bool,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.deletes.push((virtual_path.to_string(), recursive));
        if recursive {
            let prefix = format!("{virtual_path}/");
            state
                .files
                .retain(|path, _| path != virtual_path && !path.starts_with(&prefix));
            state
                .dirs
                .retain(|path| path != virtual_path && !path.starts_with(&prefix));
        } else {
            state.files.remove(virtual_path);
            state.dirs.remove(virtual_path);
        }
        Ok(())
    }

    async fn search_files(
        &self,
        _token: &str,
        query: &str,
        _virtual_path: Option<&str>,
    ) -> Result<Vec<RemoteEntry>, RuntimeError> {
        let state = self.state.lock().await;
        Ok(state
            .files
            .iter()
            .filter(|(path, content)| path.contains(query) || content.contains(query))
            .map(|(path, content)| entry_for(path, EntryKind::File, Some(content.len() as u64)))
            .collect())
    }
}
