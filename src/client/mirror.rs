//! Client-side model of the remote workspace tree.
//!
//! The mirror holds the editor's view: directory structure from cached
//! listings, file contents loaded on demand, optimistic local edits queued
//! through the write coalescer. A rejected commit rolls the local state
//! back to exactly what it was before the optimistic apply.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::{Mutex, RwLock};

use super::api::RuntimeApi;
use super::coalescer::{DEFAULT_DEBOUNCE, WriteCoalescer, WriteJob, WriteReceipt, WriteSink};
use super::dir_cache::DirectoryCache;
use crate::error::RuntimeError;
use crate::paths;
use crate::platform::types::{EntryKind, FileEncoding};
use crate::single_flight::SingleFlight;

#[derive(Debug, Clone)]
pub struct MirrorFile {
    pub content: Option<String>,
    pub encoding: FileEncoding,
    pub is_binary: bool,
    pub size: u64,
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone)]
pub enum MirrorNode {
    File(MirrorFile),
    Folder,
}

#[derive(Default)]
struct MirrorState {
    entries: HashMap<String, MirrorNode>,
    loaded: HashSet<String>,
    total_size: u64,
    /// Virtual path → remote content before the first local edit.
    modified: HashMap<String, Option<String>>,
}

struct RollbackSnapshot {
    node: Option<MirrorNode>,
    total_size: u64,
    was_loaded: bool,
    modified: Option<Option<String>>,
}

/// Commits coalesced writes through the service API with whatever token
/// the mirror currently holds.
struct ApiWriteSink {
    api: Arc<dyn RuntimeApi>,
    token: RwLock<String>,
}

#[async_trait]
impl WriteSink for ApiWriteSink {
    async fn write(&self, job: &WriteJob) -> Result<(), RuntimeError> {
        let token = self.token.read().await.clone();
        if token.is_empty() {
            return Err(RuntimeError::missing_token());
        }
        self.api
            .write_file(&token, &job.file_path, &job.content, job.encoding)
            .await
    }
}

/// The Arc'd half shared with the single-flighted tree walk.
struct MirrorShared {
    api: Arc<dyn RuntimeApi>,
    cache: DirectoryCache,
    state: Mutex<MirrorState>,
}

pub struct RemoteFilesMirror {
    shared: Arc<MirrorShared>,
    coalescer: WriteCoalescer,
    sink: Arc<ApiWriteSink>,
    current_token: Mutex<Option<String>>,
    refresh_flights: SingleFlight<()>,
}

impl RemoteFilesMirror {
    pub fn new(api: Arc<dyn RuntimeApi>) -> Self {
        Self::with_debounce(api, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(api: Arc<dyn RuntimeApi>, debounce: Duration) -> Self {
        let sink = Arc::new(ApiWriteSink {
            api: Arc::clone(&api),
            token: RwLock::new(String::new()),
        });
        Self {
            shared: Arc::new(MirrorShared {
                api,
                cache: DirectoryCache::new(),
                state: Mutex::new(MirrorState::default()),
            }),
            coalescer: WriteCoalescer::with_debounce(
                Arc::clone(&sink) as Arc<dyn WriteSink>,
                debounce,
            ),
            sink,
            current_token: Mutex::new(None),
            refresh_flights: SingleFlight::new(),
        }
    }

    /// Token rotation drops every cached listing; same token is a no-op.
    async fn adopt_token(&self, token: &str) {
        let mut current = self.current_token.lock().await;
        if current.as_deref() == Some(token) {
            return;
        }
        *current = Some(token.to_string());
        *self.sink.token.write().await = token.to_string();
        self.shared.cache.clear().await;
    }

    // ── Tree sync ───────────────────────────────────────────────

    /// Walk the remote tree and rebuild the local model. Contents already
    /// loaded stay loaded for files that still exist; nothing new is
    /// fetched. Concurrent calls share one walk.
    pub async fn refresh_from_remote(&self, token: &str, force: bool) -> Result<(), RuntimeError> {
        self.adopt_token(token).await;
        let shared = Arc::clone(&self.shared);
        let token = token.to_string();
        self.refresh_flights
            .run("refresh", move || async move {
                shared.walk_and_rebuild(&token, force).await
            })
            .await
    }

    /// Fetch a file's content unless it is already loaded.
    pub async fn ensure_file_content(
        &self,
        token: &str,
        virtual_path: &str,
    ) -> Result<String, RuntimeError> {
        self.adopt_token(token).await;
        {
            let state = self.shared.state.lock().await;
            if state.loaded.contains(virtual_path) {
                if let Some(MirrorNode::File(file)) = state.entries.get(virtual_path) {
                    if let Some(content) = &file.content {
                        return Ok(content.clone());
                    }
                }
            }
        }

        let file = self.shared.api.read_file(token, virtual_path).await?;
        let size = match file.encoding {
            FileEncoding::Base64 => BASE64
                .decode(file.content.as_bytes())
                .map(|bytes| bytes.len() as u64)
                .unwrap_or(file.content.len() as u64),
            FileEncoding::Utf8 => file.content.len() as u64,
        };

        let mut state = self.shared.state.lock().await;
        let old_size = entry_size(state.entries.get(virtual_path));
        state.total_size = state.total_size - old_size + size;
        state.entries.insert(
            virtual_path.to_string(),
            MirrorNode::File(MirrorFile {
                content: Some(file.content.clone()),
                encoding: file.encoding,
                is_binary: file.is_binary,
                size,
                modified_at: file.modified_at,
            }),
        );
        state.loaded.insert(virtual_path.to_string());
        Ok(file.content)
    }

    // ── Mutations ───────────────────────────────────────────────

    /// Optimistically apply the edit locally and queue the platform write.
    /// A rejected commit restores entry, size counter, loaded set, and
    /// modified map to their prior values; a canceled commit means a newer
    /// save owns the state.
    pub async fn save_file(
        &self,
        token: &str,
        virtual_path: &str,
        content: &str,
    ) -> Result<WriteReceipt, RuntimeError> {
        self.adopt_token(token).await;
        self.ensure_parents(token, virtual_path).await?;
        self.shared.cache.invalidate_token(token).await;

        let rollback = {
            let mut state = self.shared.state.lock().await;
            let snapshot = RollbackSnapshot {
                node: state.entries.get(virtual_path).cloned(),
                total_size: state.total_size,
                was_loaded: state.loaded.contains(virtual_path),
                modified: state.modified.get(virtual_path).cloned(),
            };

            let old_size = entry_size(state.entries.get(virtual_path));
            let prior_content = match state.entries.get(virtual_path) {
                Some(MirrorNode::File(file)) => file.content.clone(),
                _ => None,
            };
            state.entries.insert(
                virtual_path.to_string(),
                MirrorNode::File(MirrorFile {
                    content: Some(content.to_string()),
                    encoding: FileEncoding::Utf8,
                    is_binary: false,
                    size: content.len() as u64,
                    modified_at: None,
                }),
            );
            state.loaded.insert(virtual_path.to_string());
            state.total_size = state.total_size - old_size + content.len() as u64;
            state
                .modified
                .entry(virtual_path.to_string())
                .or_insert(prior_content);
            snapshot
        };

        let pending = self
            .coalescer
            .enqueue(virtual_path, content.to_string(), FileEncoding::Utf8)
            .await;
        match pending.wait().await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.rollback(virtual_path, rollback).await;
                Err(e)
            }
        }
    }

    pub async fn create_file(
        &self,
        token: &str,
        virtual_path: &str,
        content: &str,
    ) -> Result<WriteReceipt, RuntimeError> {
        self.save_file(token, virtual_path, content).await
    }

    pub async fn create_folder(&self, token: &str, virtual_path: &str) -> Result<(), RuntimeError> {
        self.adopt_token(token).await;
        let mut chain = parent_dirs(virtual_path);
        chain.push(virtual_path.to_string());
        for dir in chain {
            self.mkdir_if_missing(token, &dir).await?;
        }
        self.shared.cache.invalidate_token(token).await;
        Ok(())
    }

    /// Flush any in-flight coalesced write for the file (its content must
    /// not resurrect the path after deletion), cancel the rest, then
    /// delete remotely and locally.
    pub async fn delete_file(&self, token: &str, virtual_path: &str) -> Result<(), RuntimeError> {
        self.adopt_token(token).await;
        self.coalescer
            .flush_matching(|path| path == virtual_path)
            .await;
        self.coalescer.cancel(virtual_path).await;

        self.shared.api.delete_path(token, virtual_path, false).await?;
        self.shared.cache.invalidate_token(token).await;

        let mut state = self.shared.state.lock().await;
        remove_entry(&mut state, virtual_path);
        Ok(())
    }

    pub async fn delete_folder(&self, token: &str, virtual_path: &str) -> Result<(), RuntimeError> {
        self.adopt_token(token).await;
        let prefix = format!("{virtual_path}/");
        self.coalescer
            .flush_matching(|path| path == virtual_path || path.starts_with(&prefix))
            .await;
        self.coalescer
            .cancel_matching(|path| path == virtual_path || path.starts_with(&prefix))
            .await;

        self.shared.api.delete_path(token, virtual_path, true).await?;
        self.shared.cache.invalidate_token(token).await;

        let mut state = self.shared.state.lock().await;
        let subtree: Vec<String> = state
            .entries
            .keys()
            .filter(|path| *path == virtual_path || path.starts_with(&prefix))
            .cloned()
            .collect();
        for path in subtree {
            remove_entry(&mut state, &path);
        }
        Ok(())
    }

    /// Flush every pending write whose path satisfies the predicate.
    pub async fn flush_writes_matching(&self, predicate: impl Fn(&str) -> bool) {
        self.coalescer.flush_matching(predicate).await;
    }

    // ── Introspection ───────────────────────────────────────────

    pub async fn node(&self, virtual_path: &str) -> Option<MirrorNode> {
        self.shared.state.lock().await.entries.get(virtual_path).cloned()
    }

    pub async fn loaded_content(&self, virtual_path: &str) -> Option<String> {
        match self.shared.state.lock().await.entries.get(virtual_path) {
            Some(MirrorNode::File(file)) => file.content.clone(),
            _ => None,
        }
    }

    pub async fn entry_count(&self) -> usize {
        self.shared.state.lock().await.entries.len()
    }

    pub async fn total_size(&self) -> u64 {
        self.shared.state.lock().await.total_size
    }

    pub async fn is_modified(&self, virtual_path: &str) -> bool {
        self.shared
            .state
            .lock()
            .await
            .modified
            .contains_key(virtual_path)
    }

    // ── Internals ───────────────────────────────────────────────

    async fn ensure_parents(&self, token: &str, virtual_path: &str) -> Result<(), RuntimeError> {
        for dir in parent_dirs(virtual_path) {
            self.mkdir_if_missing(token, &dir).await?;
        }
        Ok(())
    }

    async fn mkdir_if_missing(&self, token: &str, dir: &str) -> Result<(), RuntimeError> {
        {
            let state = self.shared.state.lock().await;
            if state.entries.contains_key(dir) {
                return Ok(());
            }
        }
        match self.shared.api.mkdir(token, dir).await {
            Ok(()) => {}
            // Already exists remotely: adopt it.
            Err(e) if e.status.as_u16() == 409 => {}
            Err(e) => return Err(e),
        }
        self.shared
            .state
            .lock()
            .await
            .entries
            .insert(dir.to_string(), MirrorNode::Folder);
        Ok(())
    }

    async fn rollback(&self, virtual_path: &str, snapshot: RollbackSnapshot) {
        let mut state = self.shared.state.lock().await;
        match snapshot.node {
            Some(node) => {
                state.entries.insert(virtual_path.to_string(), node);
            }
            None => {
                state.entries.remove(virtual_path);
            }
        }
        state.total_size = snapshot.total_size;
        if snapshot.was_loaded {
            state.loaded.insert(virtual_path.to_string());
        } else {
            state.loaded.remove(virtual_path);
        }
        match snapshot.modified {
            Some(original) => {
                state.modified.insert(virtual_path.to_string(), original);
            }
            None => {
                state.modified.remove(virtual_path);
            }
        }
    }
}

impl MirrorShared {
    async fn walk_and_rebuild(&self, token: &str, force: bool) -> Result<(), RuntimeError> {
        let mut discovered = Vec::new();
        let mut queue = vec![paths::VIRTUAL_WORKDIR.to_string()];
        while let Some(dir) = queue.pop() {
            let entries = self.cache.list(self.api.as_ref(), token, &dir, force).await?;
            for entry in entries {
                if entry.kind == EntryKind::Directory {
                    queue.push(entry.virtual_path.clone());
                }
                discovered.push(entry);
            }
        }

        let mut state = self.state.lock().await;
        let mut next_entries = HashMap::new();
        let mut next_loaded = HashSet::new();
        let mut next_size: u64 = 0;

        for entry in discovered {
            let virtual_path = entry.virtual_path;
            match entry.kind {
                EntryKind::Directory => {
                    next_entries.insert(virtual_path, MirrorNode::Folder);
                }
                EntryKind::File => {
                    let preserved = if state.loaded.contains(&virtual_path) {
                        match state.entries.get(&virtual_path) {
                            Some(MirrorNode::File(file)) => file.content.clone(),
                            _ => None,
                        }
                    } else {
                        None
                    };
                    let size = entry
                        .size
                        .or_else(|| preserved.as_ref().map(|c| c.len() as u64))
                        .unwrap_or(0);
                    if preserved.is_some() {
                        next_loaded.insert(virtual_path.clone());
                    }
                    next_size += size;
                    next_entries.insert(
                        virtual_path,
                        MirrorNode::File(MirrorFile {
                            content: preserved,
                            encoding: FileEncoding::Utf8,
                            is_binary: false,
                            size,
                            modified_at: entry.modified_at,
                        }),
                    );
                }
            }
        }

        state.entries = next_entries;
        state.loaded = next_loaded;
        state.total_size = next_size;
        let gone: Vec<String> = state
            .modified
            .keys()
            .filter(|path| !state.entries.contains_key(*path))
            .cloned()
            .collect();
        for path in gone {
            state.modified.remove(&path);
        }
        Ok(())
    }
}

fn entry_size(node: Option<&MirrorNode>) -> u64 {
    match node {
        Some(MirrorNode::File(file)) => file.size,
        _ => 0,
    }
}

fn remove_entry(state: &mut MirrorState, virtual_path: &str) {
    if let Some(node) = state.entries.remove(virtual_path) {
        state.total_size -= entry_size(Some(&node));
    }
    state.loaded.remove(virtual_path);
    state.modified.remove(virtual_path);
}

/// Directories strictly between the workdir and the leaf.
fn parent_dirs(virtual_path: &str) -> Vec<String> {
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
