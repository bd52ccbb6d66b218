//! HTTP implementation of [`PlatformApi`] against a Dokploy panel.
//!
//! Wire contract: every procedure lives at `/api/trpc/{procedure}` with
//! `batch=1`. Queries are GETs carrying `input={"0":{"json":<input>}}` as a
//! URL parameter; mutations POST the same envelope as the JSON body. The
//! response is either a one-element array of envelopes or a bare envelope;
//! payload unwrap precedence is `result.data.json` → `result.data` →
//! `result`.

use std::time::Duration;

use hyper::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::types::*;
use super::{PlatformApi, resolve_request_id};
use crate::error::{RuntimeError, codes};

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_MAX_RETRIES: u32 = 2;
const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_CAP_MS: u64 = 2000;
const BACKOFF_JITTER_MS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Query,
    Mutation,
}

#[derive(Clone)]
pub struct DokployClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
    attempt_timeout: Duration,
}

impl DokployClient {
    pub fn new(http: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: DEFAULT_MAX_RETRIES,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_retry_policy(mut self, max_retries: u32, attempt_timeout: Duration) -> Self {
        self.max_retries = max_retries;
        self.attempt_timeout = attempt_timeout;
        self
    }

    async fn query<T: DeserializeOwned>(
        &self,
        procedure: &str,
        input: Value,
        request_id: &str,
    ) -> Result<T, RuntimeError> {
        let value = self
            .call(CallKind::Query, procedure, &input, request_id)
            .await?;
        decode(procedure, value)
    }

    async fn mutate<T: DeserializeOwned>(
        &self,
        procedure: &str,
        input: Value,
        request_id: &str,
    ) -> Result<T, RuntimeError> {
        let value = self
            .call(CallKind::Mutation, procedure, &input, request_id)
            .await?;
        decode(procedure, value)
    }

    /// Fire a mutation whose response payload we do not care about.
    async fn mutate_void(
        &self,
        procedure: &str,
        input: Value,
        request_id: &str,
    ) -> Result<(), RuntimeError> {
        self.call(CallKind::Mutation, procedure, &input, request_id)
            .await?;
        Ok(())
    }

    async fn call(
        &self,
        kind: CallKind,
        procedure: &str,
        input: &Value,
        request_id: &str,
    ) -> Result<Value, RuntimeError> {
        let request_id = resolve_request_id(Some(request_id));
        let mut attempt: u32 = 0;
        loop {
            tracing::debug!(
                procedure,
                request_id = %request_id,
                attempt,
                "platform call attempt"
            );

            let outcome = tokio::time::timeout(
                self.attempt_timeout,
                self.send_once(kind, procedure, input, &request_id),
            )
            .await;

            let err = match outcome {
                Ok(Ok(value)) => {
                    tracing::debug!(
                        procedure,
                        request_id = %request_id,
                        attempt,
                        "platform call succeeded"
                    );
                    return Ok(value);
                }
                Ok(Err(err)) => err,
                Err(_) => RuntimeError::new(
                    StatusCode::GATEWAY_TIMEOUT,
                    codes::TIMEOUT,
                    format!(
                        "platform call {procedure} timed out after {}s",
                        self.attempt_timeout.as_secs()
                    ),
                ),
            };

            if err.is_retryable() && attempt < self.max_retries {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    procedure,
                    request_id = %request_id,
                    attempt,
                    status = err.status.as_u16(),
                    code = %err.code,
                    delay_ms = delay.as_millis() as u64,
                    error = %err.message,
                    "platform call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let final_err = if err.is_retryable() && self.max_retries > 0 {
                RuntimeError {
                    status: err.status,
                    code: codes::RETRY_EXHAUSTED.to_string(),
                    message: format!(
                        "platform call {procedure} failed after {} attempts: {}",
                        attempt + 1,
                        err.message
                    ),
                    details: err.details,
                }
            } else {
                err
            };
            tracing::error!(
                procedure,
                request_id = %request_id,
                attempt,
                status = final_err.status.as_u16(),
                code = %final_err.code,
                error = %final_err.message,
                "platform call failed"
            );
            return Err(final_err);
        }
    }

    async fn send_once(
        &self,
        kind: CallKind,
        procedure: &str,
        input: &Value,
        request_id: &str,
    ) -> Result<Value, RuntimeError> {
        let url = format!("{}/api/trpc/{procedure}", self.base_url);
        let envelope = json!({ "0": { "json": input } });

        let request = match kind {
            CallKind::Query => {
                let input_param = envelope.to_string();
                self.http
                    .get(&url)
                    .query(&[("batch", "1"), ("input", input_param.as_str())])
            }
            CallKind::Mutation => self
                .http
                .post(&url)
                .query(&[("batch", "1")])
                .json(&envelope),
        };

        let response = request
            .header("x-api-key", &self.api_key)
            .header("x-request-id", request_id)
            .send()
            .await
            .map_err(|e| transport_error(procedure, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(procedure, &e))?;

        let payload: Value = serde_json::from_str(&body).map_err(|_| {
            RuntimeError::new(
                StatusCode::BAD_GATEWAY,
                codes::INVALID_JSON_RESPONSE,
                format!("platform returned unparseable JSON for {procedure}"),
            )
        })?;

        unwrap_envelope(procedure, status, payload)
    }
}

fn decode<T: DeserializeOwned>(procedure: &str, value: Value) -> Result<T, RuntimeError> {
    serde_json::from_value(value).map_err(|e| {
        RuntimeError::new(
            StatusCode::BAD_GATEWAY,
            codes::INVALID_TRPC_RESPONSE,
            format!("platform response for {procedure} had unexpected shape: {e}"),
        )
    })
}

fn transport_error(procedure: &str, err: &reqwest::Error) -> RuntimeError {
    if err.is_timeout() {
        RuntimeError::new(
            StatusCode::GATEWAY_TIMEOUT,
            codes::TIMEOUT,
            format!("platform call {procedure} timed out: {err}"),
        )
    } else {
        RuntimeError::new(
            StatusCode::BAD_GATEWAY,
            codes::NETWORK_ERROR,
            format!("platform call {procedure} failed: {err}"),
        )
    }
}

/// Peel the batch wrapper and apply the unwrap precedence. A platform-level
/// `error` object wins over the transport status; a missing `result` is a
/// malformed response.
fn unwrap_envelope(
    procedure: &str,
    status: StatusCode,
    payload: Value,
) -> Result<Value, RuntimeError> {
    let envelope = match payload {
        Value::Array(mut items) => {
            if items.is_empty() {
                return Err(invalid_trpc(procedure, "empty batch response"));
            }
            items.remove(0)
        }
        other => other,
    };

    if let Some(error) = envelope.get("error") {
        return Err(platform_error(procedure, error));
    }

    if !status.is_success() {
        return Err(status_error(procedure, status));
    }

    let Some(result) = envelope.get("result") else {
        return Err(invalid_trpc(procedure, "missing result field"));
    };

    if let Some(data) = result.get("data") {
        if let Some(inner) = data.get("json") {
            return Ok(inner.clone());
        }
        return Ok(data.clone());
    }
    Ok(result.clone())
}

fn invalid_trpc(procedure: &str, what: &str) -> RuntimeError {
    RuntimeError::new(
        StatusCode::BAD_GATEWAY,
        codes::INVALID_TRPC_RESPONSE,
        format!("platform response for {procedure}: {what}"),
    )
}

/// Map a platform error code onto the status we surface outward. Unknown
/// codes pass through verbatim behind a 502.
fn platform_error(procedure: &str, error: &Value) -> RuntimeError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("platform error")
        .to_string();
    let code = error
        .get("data")
        .and_then(|d| d.get("code"))
        .and_then(Value::as_str)
        .unwrap_or(codes::INTERNAL_SERVER_ERROR)
        .to_string();

    let status = match code.as_str() {
        codes::UNAUTHORIZED => StatusCode::UNAUTHORIZED,
        codes::FORBIDDEN => StatusCode::FORBIDDEN,
        codes::NOT_FOUND => StatusCode::NOT_FOUND,
        codes::BAD_REQUEST => StatusCode::BAD_REQUEST,
        codes::CONFLICT => StatusCode::CONFLICT,
        codes::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
        codes::TOO_MANY_REQUESTS => StatusCode::TOO_MANY_REQUESTS,
        codes::NOT_IMPLEMENTED => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::BAD_GATEWAY,
    };

    RuntimeError {
        status,
        code,
        message,
        details: Some(json!({ "procedure": procedure })),
    }
}

/// HTTP-level failure without a structured error envelope.
fn status_error(procedure: &str, status: StatusCode) -> RuntimeError {
    let (mapped, code) = match status.as_u16() {
        400 => (StatusCode::BAD_REQUEST, codes::BAD_REQUEST),
        401 => (StatusCode::UNAUTHORIZED, codes::UNAUTHORIZED),
        403 => (StatusCode::FORBIDDEN, codes::FORBIDDEN),
        404 => (StatusCode::NOT_FOUND, codes::NOT_FOUND),
        409 => (StatusCode::CONFLICT, codes::CONFLICT),
        413 => (StatusCode::PAYLOAD_TOO_LARGE, codes::PAYLOAD_TOO_LARGE),
        429 => (StatusCode::TOO_MANY_REQUESTS, codes::TOO_MANY_REQUESTS),
        501 => (StatusCode::NOT_IMPLEMENTED, codes::NOT_IMPLEMENTED),
        504 => (StatusCode::GATEWAY_TIMEOUT, codes::TIMEOUT),
        _ => (StatusCode::BAD_GATEWAY, codes::NETWORK_ERROR),
    };
    RuntimeError::new(
        mapped,
        code,
        format!("platform returned {status} for {procedure}"),
    )
}

fn jitter_ms() -> u64 {
    let mut buf = [0u8; 2];
    if getrandom::fill(&mut buf).is_err() {
        return 0;
    }
    u64::from(u16::from_le_bytes(buf)) % BACKOFF_JITTER_MS
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(20));
    Duration::from_millis(base.saturating_add(jitter_ms()).min(BACKOFF_CAP_MS))
}

fn required(field: &str, value: &str) -> Result<(), RuntimeError> {
    if value.trim().is_empty() {
        return Err(RuntimeError::bad_request(format!("{field} is required")));
    }
    Ok(())
}

#[async_trait::async_trait]
impl PlatformApi for DokployClient {
    async fn project_all(&self, request_id: &str) -> Result<Vec<Project>, RuntimeError> {
        self.query("project.all", json!({}), request_id).await
    }

    async fn project_create(&self, name: &str, request_id: &str) -> Result<Project, RuntimeError> {
        required("name", name)?;
        self.mutate("project.create", json!({ "name": name }), request_id)
            .await
    }

    async fn project_one(
        &self,
        project_id: &str,
        request_id: &str,
    ) -> Result<Project, RuntimeError> {
        required("projectId", project_id)?;
        self.query("project.one", json!({ "projectId": project_id }), request_id)
            .await
    }

    async fn compose_one(
        &self,
        compose_id: &str,
        request_id: &str,
    ) -> Result<Compose, RuntimeError> {
        required("composeId", compose_id)?;
        self.query("compose.one", json!({ "composeId": compose_id }), request_id)
            .await
    }

    async fn compose_create(
        &self,
        input: &ComposeCreateInput,
        request_id: &str,
    ) -> Result<Compose, RuntimeError> {
        required("name", &input.name)?;
        required("environmentId", &input.environment_id)?;
        required("composeFile", &input.compose_file)?;
        self.mutate(
            "compose.create",
            serde_json::to_value(input).unwrap_or_default(),
            request_id,
        )
        .await
    }

    async fn compose_update(
        &self,
        input: &ComposeUpdateInput,
        request_id: &str,
    ) -> Result<(), RuntimeError> {
        required("composeId", &input.compose_id)?;
        self.mutate_void(
            "compose.update",
            serde_json::to_value(input).unwrap_or_default(),
            request_id,
        )
        .await
    }

    async fn compose_delete(
        &self,
        compose_id: &str,
        delete_volumes: bool,
        request_id: &str,
    ) -> Result<(), RuntimeError> {
        required("composeId", compose_id)?;
        self.mutate_void(
            "compose.delete",
            json!({ "composeId": compose_id, "deleteVolumes": delete_volumes }),
            request_id,
        )
        .await
    }

    async fn compose_deploy(
        &self,
        compose_id: &str,
        request_id: &str,
    ) -> Result<(), RuntimeError> {
        required("composeId", compose_id)?;
        self.mutate_void(
            "compose.deploy",
            json!({ "composeId": compose_id }),
            request_id,
        )
        .await
    }

    async fn compose_redeploy(
        &self,
        compose_id: &str,
        request_id: &str,
    ) -> Result<(), RuntimeError> {
        required("composeId", compose_id)?;
        self.mutate_void(
            "compose.redeploy",
            json!({ "composeId": compose_id }),
            request_id,
        )
        .await
    }

    async fn deployments_by_compose(
        &self,
        compose_id: &str,
        request_id: &str,
    ) -> Result<Vec<Deployment>, RuntimeError> {
        required("composeId", compose_id)?;
        self.query(
            "deployment.allByCompose",
            json!({ "composeId": compose_id }),
            request_id,
        )
        .await
    }

    async fn domains_by_compose(
        &self,
        compose_id: &str,
        request_id: &str,
    ) -> Result<Vec<ComposeDomain>, RuntimeError> {
        required("composeId", compose_id)?;
        self.query(
            "domain.byComposeId",
            json!({ "composeId": compose_id }),
            request_id,
        )
        .await
    }

    async fn domain_generate(
        &self,
        app_name: &str,
        server_id: Option<&str>,
        request_id: &str,
    ) -> Result<String, RuntimeError> {
        required("appName", app_name)?;
        let mut input = json!({ "appName": app_name });
        if let Some(server_id) = server_id {
            input["serverId"] = json!(server_id);
        }
        let value = self
            .call(CallKind::Mutation, "domain.generateDomain", &input, request_id)
            .await?;
        // The panel answers either a bare string or `{"domain": "..."}`.
        match value {
            Value::String(host) => Ok(host),
            other => other
                .get("domain")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| invalid_trpc("domain.generateDomain", "no domain in response")),
        }
    }

    async fn domain_create(
        &self,
        input: &DomainCreateInput,
        request_id: &str,
    ) -> Result<(), RuntimeError> {
        required("composeId", &input.compose_id)?;
        required("host", &input.host)?;
        self.mutate_void(
            "domain.create",
            serde_json::to_value(input).unwrap_or_default(),
            request_id,
        )
        .await
    }

    async fn server_all(&self, request_id: &str) -> Result<Vec<PlatformServer>, RuntimeError> {
        self.query("server.all", json!({}), request_id).await
    }

    async fn files_list(
        &self,
        compose_id: &str,
        path: &str,
        request_id: &str,
    ) -> Result<Vec<FileEntry>, RuntimeError> {
        required("composeId", compose_id)?;
        self.query(
            "fileManager.listFiles",
            json!({ "composeId": compose_id, "path": path }),
            request_id,
        )
        .await
    }

    async fn files_read(
        &self,
        compose_id: &str,
        path: &str,
        request_id: &str,
    ) -> Result<FileContent, RuntimeError> {
        required("composeId", compose_id)?;
        required("path", path)?;
        self.query(
            "fileManager.readFile",
            json!({ "composeId": compose_id, "path": path }),
            request_id,
        )
        .await
    }

    async fn files_write(
        &self,
        input: &FileWriteInput,
        request_id: &str,
    ) -> Result<(), RuntimeError> {
        required("composeId", &input.compose_id)?;
        required("path", &input.path)?;
        self.mutate_void(
            "fileManager.writeFile",
            serde_json::to_value(input).unwrap_or_default(),
            request_id,
        )
        .await
    }

    async fn files_mkdir(
        &self,
        compose_id: &str,
        path: &str,
        request_id: &str,
    ) -> Result<(), RuntimeError> {
        required("composeId", compose_id)?;
        required("path", path)?;
        self.mutate_void(
            "fileManager.createDirectory",
            json!({ "composeId": compose_id, "path": path }),
            request_id,
        )
        .await
    }

    async fn files_delete(
        &self,
        compose_id: &str,
        path: &str,
        recursive: bool,
        request_id: &str,
    ) -> Result<(), RuntimeError> {
        required("composeId", compose_id)?;
        required("path", path)?;
        self.mutate_void(
            "fileManager.deleteFile",
            json!({ "composeId": compose_id, "path": path, "recursive": recursive }),
            request_id,
        )
        .await
    }

    async fn files_search(
        &self,
        compose_id: &str,
        query: &str,
        path: Option<&str>,
        request_id: &str,
    ) -> Result<Vec<FileEntry>, RuntimeError> {
        required("composeId", compose_id)?;
        required("query", query)?;
        let mut input = json!({ "composeId": compose_id, "query": query });
        if let Some(path) = path {
            input["path"] = json!(path);
        }
        self.query("fileManager.searchFiles", input, request_id)
            .await
    }
}
