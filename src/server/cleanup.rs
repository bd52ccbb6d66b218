//! Operator-only cleanup endpoint.
//!
//! POST /api/runtime/cleanup sweeps expired sessions for one actor or for
//! every actor the platform knows about. When `RUNTIME_CLEANUP_SECRET` is
//! configured, the `x-runtime-cleanup-secret` header must match.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use hyper::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{AppState, parse_body, request_id_from, validate_identifier};
use crate::error::RuntimeError;

pub const CLEANUP_SECRET_HEADER: &str = "x-runtime-cleanup-secret";

pub fn router() -> Router<AppState> {
    Router::new().route("/cleanup", post(cleanup))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CleanupBody {
    #[serde(rename = "actorId")]
    pub actor_id: Option<String>,
}

fn check_secret(state: &AppState, headers: &HeaderMap) -> Result<(), RuntimeError> {
    let Some(expected) = state.config.cleanup_secret.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(CLEANUP_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if provided != Some(expected) {
        return Err(RuntimeError::unauthorized("cleanup secret mismatch"));
    }
    Ok(())
}

pub(crate) async fn cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Json<Value>, RuntimeError> {
    let remote = state.remote()?;
    check_secret(&state, &headers)?;

    let request_id = request_id_from(&headers);
    let body: CleanupBody = parse_body(&bytes)?;

    let actor_count = match body.actor_id.as_deref() {
        Some(actor_id) => {
            validate_identifier("actorId", actor_id)?;
            remote
                .sweeper
                .run(remote.platform.as_ref(), actor_id, &request_id)
                .await?;
            1
        }
        None => {
            remote
                .sweeper
                .run_all(remote.platform.as_ref(), &request_id)
                .await?
        }
    };

    tracing::info!(actor_count, "cleanup sweep finished");
    Ok(Json(json!({ "ok": true, "actorCount": actor_count })))
}
