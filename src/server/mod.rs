//! HTTP surface: thin, stateless adapters over the orchestrator and
//! platform client. Handlers validate the request, extract the runtime
//! token, invoke the core, and map [`RuntimeError`] to the JSON error
//! envelope. No business logic lives here.

pub mod cleanup;
pub mod files;
pub mod middleware;
pub mod session;

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hyper::header::{self, HeaderMap};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::platform::{PlatformApi, resolve_request_id};
use crate::session::{IdleSweeper, SessionOrchestrator};

pub const ACTOR_COOKIE: &str = "bolt_actor_id";
const ACTOR_COOKIE_MAX_AGE_SEC: u64 = 365 * 24 * 60 * 60;

pub const MAX_PATH_BYTES: usize = 4096;
pub const MAX_IDENTIFIER_BYTES: usize = 256;
pub const MAX_SEARCH_QUERY_BYTES: usize = 512;

/// Everything the remote-runtime endpoints need. Absent when the deployment
/// runs the legacy in-browser provider.
#[derive(Clone)]
pub struct RemoteRuntime {
    pub platform: Arc<dyn PlatformApi>,
    pub orchestrator: Arc<SessionOrchestrator>,
    pub sweeper: Arc<IdleSweeper>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub remote: Option<RemoteRuntime>,
}

impl AppState {
    pub fn remote(&self) -> Result<&RemoteRuntime, RuntimeError> {
        self.remote.as_ref().ok_or_else(|| {
            RuntimeError::bad_request("runtime endpoints require RUNTIME_PROVIDER=dokploy")
        })
    }
}

impl IntoResponse for RuntimeError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "code": self.code,
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        (self.status, Json(body)).into_response()
    }
}

pub fn create_app(state: AppState) -> Router {
    let health_routes = Router::new().route(
        "/",
        get(|| async {
            Json(json!({
                "status": "ok",
            }))
        }),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .nest("/health", health_routes)
        .nest("/api/runtime", runtime_router())
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
        .layer(axum::middleware::from_fn(middleware::strip_trailing_slash))
        .layer(axum::middleware::from_fn(
            middleware::enrich_current_span_middleware,
        ))
}

fn runtime_router() -> Router<AppState> {
    Router::new()
        .merge(session::router())
        .merge(files::router())
        .merge(cleanup::router())
}

async fn not_found(req: axum::extract::Request) -> impl IntoResponse {
    tracing::warn!("unhandled path: {}", req.uri());
    RuntimeError::not_found("no such endpoint")
}

// ── Shared request plumbing ─────────────────────────────────────────

/// Echo the caller's request id down to the platform when it is safe.
pub(crate) fn request_id_from(headers: &HeaderMap) -> String {
    resolve_request_id(
        headers
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
    )
}

/// Token extraction order: Authorization bearer, body `runtimeToken`,
/// query `runtimeToken`.
pub(crate) fn extract_token(
    headers: &HeaderMap,
    body_token: Option<&str>,
    query_token: Option<&str>,
) -> Result<String, RuntimeError> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        let trimmed = value.trim();
        if let Some(token) = trimmed
            .strip_prefix("Bearer ")
            .or_else(|| trimmed.strip_prefix("bearer "))
        {
            let token = token.trim();
            if !token.is_empty() {
                return Ok(token.to_string());
            }
        }
    }
    if let Some(token) = body_token.filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }
    if let Some(token) = query_token.filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }
    Err(RuntimeError::missing_token())
}

pub(crate) fn validate_identifier(field: &str, value: &str) -> Result<(), RuntimeError> {
    if value.is_empty() {
        return Err(RuntimeError::bad_request(format!("{field} is required")));
    }
    if value.len() > MAX_IDENTIFIER_BYTES {
        return Err(RuntimeError::bad_request(format!(
            "{field} exceeds {MAX_IDENTIFIER_BYTES} bytes"
        )));
    }
    Ok(())
}

pub(crate) fn validate_path_input(value: &str) -> Result<(), RuntimeError> {
    if value.len() > MAX_PATH_BYTES {
        return Err(RuntimeError::bad_request(format!(
            "path exceeds {MAX_PATH_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Parse an optional JSON body: empty bytes decode as `T::default()`,
/// malformed JSON is a 400 with the cause in `details`.
pub(crate) fn parse_body<T>(bytes: &axum::body::Bytes) -> Result<T, RuntimeError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if bytes.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|e| {
        RuntimeError::bad_request("request body did not match the expected schema")
            .with_details(json!({ "cause": e.to_string() }))
    })
}

// ── Actor cookie ────────────────────────────────────────────────────

pub(crate) fn actor_id_from_cookies(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == ACTOR_COOKIE).then(|| value.trim().to_string())
        })
        .find(|value| is_valid_actor_id(value))
}

fn is_valid_actor_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'))
}

pub(crate) fn actor_cookie_header(actor_id: &str) -> String {
    format!(
        "{ACTOR_COOKIE}={actor_id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ACTOR_COOKIE_MAX_AGE_SEC}"
    )
}
