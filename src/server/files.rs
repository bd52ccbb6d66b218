//! Scoped filesystem endpoints plus manual redeploy.
//!
//! Every operation resolves the target compose from the verified token, and
//! every path crosses the virtual↔platform boundary exactly once. Writes to
//! a root dependency manifest queue a redeploy before the response goes
//! out, so the editor sees the new dependency state on its next poll.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use hyper::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{
    AppState, RemoteRuntime, extract_token, parse_body, request_id_from, validate_identifier,
    validate_path_input,
};
use crate::error::RuntimeError;
use crate::paths;
use crate::platform::{FileEntry, FileWriteInput, types::FileEncoding};
use crate::token::TokenClaims;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/files/list", get(list_files))
        .route("/files/read", get(read_file))
        .route("/files/write", put(write_file).post(write_file))
        .route("/files/mkdir", post(mkdir))
        .route("/files/delete", delete(delete_path))
        .route("/files/search", get(search_files))
        .route("/deploy/redeploy", post(redeploy))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FileQuery {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(rename = "runtimeToken", default)]
    pub runtime_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct WriteBody {
    pub path: Option<String>,
    pub content: Option<String>,
    pub encoding: Option<FileEncoding>,
    #[serde(rename = "runtimeToken")]
    pub runtime_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct PathBody {
    pub path: Option<String>,
    pub recursive: Option<bool>,
    #[serde(rename = "runtimeToken")]
    pub runtime_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RedeployBody {
    pub reason: Option<String>,
    #[serde(rename = "runtimeToken")]
    pub runtime_token: Option<String>,
}

/// Platform entry enriched with the editor-facing path.
#[derive(Debug, Serialize)]
struct EntryPayload {
    #[serde(flatten)]
    entry: FileEntry,
    #[serde(rename = "virtualPath")]
    virtual_path: String,
}

fn claims_for(
    remote: &RemoteRuntime,
    headers: &HeaderMap,
    body_token: Option<&str>,
    query_token: Option<&str>,
) -> Result<TokenClaims, RuntimeError> {
    let token = extract_token(headers, body_token, query_token)?;
    remote.orchestrator.with_claims(&token)
}

fn to_entry_payloads(entries: Vec<FileEntry>) -> Result<Vec<EntryPayload>, RuntimeError> {
    entries
        .into_iter()
        .map(|entry| {
            let virtual_path = paths::to_virtual_path(&entry.path)?;
            Ok(EntryPayload {
                entry,
                virtual_path,
            })
        })
        .collect()
}

fn required_path(path: Option<&str>) -> Result<String, RuntimeError> {
    let path = path.unwrap_or_default();
    if path.is_empty() {
        return Err(RuntimeError::bad_request("path is required"));
    }
    validate_path_input(path)?;
    paths::to_platform_path(path)
}

pub(crate) async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, RuntimeError> {
    let remote = state.remote()?;
    let request_id = request_id_from(&headers);
    let claims = claims_for(remote, &headers, None, query.runtime_token.as_deref())?;

    let raw_path = query.path.as_deref().unwrap_or(paths::VIRTUAL_WORKDIR);
    validate_path_input(raw_path)?;
    let platform_path = paths::to_platform_path(raw_path)?;

    let entries = remote
        .platform
        .files_list(&claims.compose_id, &platform_path, &request_id)
        .await?;
    Ok(Json(json!({ "entries": to_entry_payloads(entries)? })))
}

pub(crate) async fn read_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, RuntimeError> {
    let remote = state.remote()?;
    let request_id = request_id_from(&headers);
    let claims = claims_for(remote, &headers, None, query.runtime_token.as_deref())?;

    let platform_path = required_path(query.path.as_deref())?;
    let file = remote
        .platform
        .files_read(&claims.compose_id, &platform_path, &request_id)
        .await?;

    let virtual_path = paths::to_virtual_path(&file.path)?;
    let mut payload = serde_json::to_value(&file)
        .map_err(|e| RuntimeError::internal(format!("failed to encode file payload: {e}")))?;
    payload["virtualPath"] = json!(virtual_path);
    Ok(Json(json!({ "file": payload })))
}

pub(crate) async fn write_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Json<Value>, RuntimeError> {
    let remote = state.remote()?;
    let request_id = request_id_from(&headers);
    let body: WriteBody = parse_body(&bytes)?;
    let claims = claims_for(
        remote,
        &headers,
        body.runtime_token.as_deref(),
        query.runtime_token.as_deref(),
    )?;

    let raw_path = body.path.clone().unwrap_or_default();
    let platform_path = required_path(Some(&raw_path))?;
    let Some(content) = body.content else {
        return Err(RuntimeError::bad_request("content is required"));
    };

    remote
        .platform
        .files_write(
            &FileWriteInput {
                compose_id: claims.compose_id.clone(),
                path: platform_path,
                content,
                encoding: body.encoding.unwrap_or(FileEncoding::Utf8),
                overwrite: true,
            },
            &request_id,
        )
        .await?;

    // Dependency-manifest writes invalidate the running container image
    // contents; queue a redeploy before answering.
    if paths::is_redeploy_trigger_path(&raw_path) {
        tracing::info!(
            compose_id = %claims.compose_id,
            path = %raw_path,
            "redeploy-trigger path written, queueing redeploy"
        );
        remote
            .platform
            .compose_redeploy(&claims.compose_id, &request_id)
            .await?;
    }

    Ok(Json(json!({ "ok": true })))
}

pub(crate) async fn mkdir(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Json<Value>, RuntimeError> {
    let remote = state.remote()?;
    let request_id = request_id_from(&headers);
    let body: PathBody = parse_body(&bytes)?;
    let claims = claims_for(
        remote,
        &headers,
        body.runtime_token.as_deref(),
        query.runtime_token.as_deref(),
    )?;

    let platform_path = required_path(body.path.as_deref())?;
    remote
        .platform
        .files_mkdir(&claims.compose_id, &platform_path, &request_id)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

pub(crate) async fn delete_path(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Json<Value>, RuntimeError> {
    let remote = state.remote()?;
    let request_id = request_id_from(&headers);
    let body: PathBody = parse_body(&bytes)?;
    let claims = claims_for(
        remote,
        &headers,
        body.runtime_token.as_deref(),
        query.runtime_token.as_deref(),
    )?;

    let platform_path = required_path(body.path.as_deref())?;
    remote
        .platform
        .files_delete(
            &claims.compose_id,
            &platform_path,
            body.recursive.unwrap_or(false),
            &request_id,
        )
        .await?;
    Ok(Json(json!({ "ok": true })))
}

pub(crate) async fn search_files(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, RuntimeError> {
    let remote = state.remote()?;
    let request_id = request_id_from(&headers);
    let claims = claims_for(remote, &headers, None, query.runtime_token.as_deref())?;

    let needle = query.query.as_deref().unwrap_or_default();
    if needle.is_empty() {
        return Err(RuntimeError::bad_request("query is required"));
    }
    if needle.len() > super::MAX_SEARCH_QUERY_BYTES {
        return Err(RuntimeError::bad_request(format!(
            "query exceeds {} bytes",
            super::MAX_SEARCH_QUERY_BYTES
        )));
    }

    let scope = match query.path.as_deref() {
        Some(path) => {
            validate_path_input(path)?;
            Some(paths::to_platform_path(path)?)
        }
        None => None,
    };

    let entries = remote
        .platform
        .files_search(&claims.compose_id, needle, scope.as_deref(), &request_id)
        .await?;
    Ok(Json(json!({ "entries": to_entry_payloads(entries)? })))
}

pub(crate) async fn redeploy(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Json<Value>, RuntimeError> {
    let remote = state.remote()?;
    let request_id = request_id_from(&headers);
    let body: RedeployBody = parse_body(&bytes)?;
    let claims = claims_for(
        remote,
        &headers,
        body.runtime_token.as_deref(),
        query.runtime_token.as_deref(),
    )?;

    if let Some(reason) = body.reason.as_deref() {
        validate_identifier("reason", reason)?;
        tracing::info!(compose_id = %claims.compose_id, reason, "manual redeploy requested");
    }
    remote
        .platform
        .compose_redeploy(&claims.compose_id, &request_id)
        .await?;
    Ok(Json(json!({ "queued": true })))
}
