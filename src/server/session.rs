//! Session lifecycle endpoints.
//!
//! POST   /api/runtime/session            create or reuse (query `intent=delete` tears down)
//! GET    /api/runtime/session            status snapshot for the token's session
//! DELETE /api/runtime/session            tear down
//! POST   /api/runtime/session/heartbeat  slide the lease, reissue the token

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use hyper::header::{self, HeaderMap};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    AppState, actor_cookie_header, actor_id_from_cookies, extract_token, parse_body,
    request_id_from, validate_identifier,
};
use crate::error::RuntimeError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/session",
            post(create_session).get(get_session).delete(delete_session),
        )
        .route("/session/heartbeat", post(heartbeat))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SessionQuery {
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(rename = "runtimeToken", default)]
    pub runtime_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CreateSessionBody {
    #[serde(rename = "chatId")]
    pub chat_id: Option<String>,
    #[serde(rename = "templateId")]
    pub template_id: Option<String>,
    #[serde(rename = "runtimeToken")]
    pub runtime_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct TokenBody {
    #[serde(rename = "runtimeToken")]
    pub runtime_token: Option<String>,
}

pub(crate) async fn create_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Response, RuntimeError> {
    let remote = state.remote()?;
    let request_id = request_id_from(&headers);
    let body: CreateSessionBody = parse_body(&bytes)?;

    if query.intent.as_deref() == Some("delete") {
        let token = extract_token(
            &headers,
            body.runtime_token.as_deref(),
            query.runtime_token.as_deref(),
        )?;
        remote.orchestrator.delete(&token, &request_id).await?;
        return Ok(Json(json!({ "deleted": true })).into_response());
    }

    let chat_id = body.chat_id.as_deref().unwrap_or_default();
    validate_identifier("chatId", chat_id)?;
    if let Some(template_id) = body.template_id.as_deref() {
        validate_identifier("templateId", template_id)?;
    }

    let actor_id =
        actor_id_from_cookies(&headers).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let outcome = remote
        .orchestrator
        .create(&actor_id, chat_id, body.template_id.as_deref(), &request_id)
        .await?;

    Ok((
        [(header::SET_COOKIE, actor_cookie_header(&actor_id))],
        Json(outcome),
    )
        .into_response())
}

pub(crate) async fn get_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, RuntimeError> {
    let remote = state.remote()?;
    let request_id = request_id_from(&headers);
    let token = extract_token(&headers, None, query.runtime_token.as_deref())?;

    let outcome = remote.orchestrator.get(&token, &request_id).await?;
    Ok(Json(json!({
        "sessionStatus": outcome.session.status,
        "previewUrl": outcome.session.preview_url,
        "deploymentStatus": outcome.deployment_status,
        "session": outcome.session,
    })))
}

pub(crate) async fn delete_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Json<Value>, RuntimeError> {
    let remote = state.remote()?;
    let request_id = request_id_from(&headers);
    let body: TokenBody = parse_body(&bytes)?;
    let token = extract_token(
        &headers,
        body.runtime_token.as_deref(),
        query.runtime_token.as_deref(),
    )?;

    remote.orchestrator.delete(&token, &request_id).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub(crate) async fn heartbeat(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Response, RuntimeError> {
    let remote = state.remote()?;
    let request_id = request_id_from(&headers);
    let body: TokenBody = parse_body(&bytes)?;
    let token = extract_token(
        &headers,
        body.runtime_token.as_deref(),
        query.runtime_token.as_deref(),
    )?;

    let outcome = remote.orchestrator.heartbeat(&token, &request_id).await?;
    Ok(Json(outcome).into_response())
}
