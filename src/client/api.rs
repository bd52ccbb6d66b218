//! Editor-side access to the runtime service's HTTP API.
//!
//! [`RuntimeApi`] is the seam the rest of the SDK talks through;
//! [`HttpRuntimeApi`] is the reqwest implementation. Tests inject mocks.

use async_trait::async_trait;
use hyper::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{RuntimeError, codes};
use crate::platform::types::{EntryKind, FileEncoding};
use crate::session::{DeploymentState, Session, SessionStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    /// Platform-relative path.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "modifiedAt", default)]
    pub modified_at: Option<String>,
    #[serde(rename = "virtualPath")]
    pub virtual_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub content: String,
    pub encoding: FileEncoding,
    #[serde(rename = "isBinary", default)]
    pub is_binary: bool,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "modifiedAt", default)]
    pub modified_at: Option<String>,
    #[serde(rename = "virtualPath")]
    pub virtual_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionResponse {
    #[serde(rename = "runtimeToken")]
    pub runtime_token: String,
    pub session: Session,
    #[serde(rename = "deploymentStatus")]
    pub deployment_status: DeploymentState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetSessionResponse {
    #[serde(rename = "sessionStatus")]
    pub session_status: SessionStatus,
    #[serde(rename = "previewUrl")]
    pub preview_url: String,
    #[serde(rename = "deploymentStatus")]
    pub deployment_status: DeploymentState,
    pub session: Session,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatResponse {
    pub status: SessionStatus,
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
    #[serde(rename = "runtimeToken", default)]
    pub runtime_token: Option<String>,
}

#[async_trait]
pub trait RuntimeApi: Send + Sync {
    async fn create_session(
        &self,
        chat_id: &str,
        template_id: Option<&str>,
    ) -> Result<CreateSessionResponse, RuntimeError>;
    async fn get_session(&self, token: &str) -> Result<GetSessionResponse, RuntimeError>;
    async fn heartbeat(&self, token: &str) -> Result<HeartbeatResponse, RuntimeError>;
    async fn delete_session(&self, token: &str) -> Result<(), RuntimeError>;
    async fn redeploy(&self, token: &str, reason: Option<&str>) -> Result<(), RuntimeError>;

    async fn list_files(
        &self,
        token: &str,
        virtual_path: &str,
    ) -> Result<Vec<RemoteEntry>, RuntimeError>;
    async fn read_file(&self, token: &str, virtual_path: &str)
    -> Result<RemoteFile, RuntimeError>;
    async fn write_file(
        &self,
        token: &str,
        virtual_path: &str,
        content: &str,
        encoding: FileEncoding,
    ) -> Result<(), RuntimeError>;
    async fn mkdir(&self, token: &str, virtual_path: &str) -> Result<(), RuntimeError>;
    async fn delete_path(
        &self,
        token: &str,
        virtual_path: &str,
        recursive: bool,
    ) -> Result<(), RuntimeError>;
    async fn search_files(
        &self,
        token: &str,
        query: &str,
        virtual_path: Option<&str>,
    ) -> Result<Vec<RemoteEntry>, RuntimeError>;
}

#[derive(Debug, Deserialize)]
struct EntriesEnvelope {
    entries: Vec<RemoteEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    file: RemoteFile,
}

pub struct HttpRuntimeApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRuntimeApi {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/runtime{path}", self.base_url)
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RuntimeError> {
        let value = Self::check(response).await?;
        serde_json::from_value(value).map_err(|e| {
            RuntimeError::new(
                StatusCode::BAD_GATEWAY,
                codes::INVALID_JSON_RESPONSE,
                format!("runtime service answered an unexpected shape: {e}"),
            )
        })
    }

    /// Turn a non-success response into the server's error envelope.
    async fn check(response: reqwest::Response) -> Result<Value, RuntimeError> {
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            RuntimeError::new(
                StatusCode::BAD_GATEWAY,
                codes::INVALID_JSON_RESPONSE,
                format!("runtime service answered unparseable JSON: {e}"),
            )
        })?;
        if status.is_success() {
            return Ok(body);
        }
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("runtime service error")
            .to_string();
        let code = body
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or(codes::INTERNAL_SERVER_ERROR)
            .to_string();
        let mut err = RuntimeError::new(status, code, message);
        if let Some(details) = body.get("details") {
            err = err.with_details(details.clone());
        }
        Err(err)
    }

    fn transport(e: reqwest::Error) -> RuntimeError {
        if e.is_timeout() {
            RuntimeError::new(
                StatusCode::GATEWAY_TIMEOUT,
                codes::TIMEOUT,
                format!("runtime service call timed out: {e}"),
            )
        } else {
            RuntimeError::new(
                StatusCode::BAD_GATEWAY,
                codes::NETWORK_ERROR,
                format!("runtime service unreachable: {e}"),
            )
        }
    }
}

#[async_trait]
impl RuntimeApi for HttpRuntimeApi {
    async fn create_session(
        &self,
        chat_id: &str,
        template_id: Option<&str>,
    ) -> Result<CreateSessionResponse, RuntimeError> {
        let mut body = json!({ "chatId": chat_id });
        if let Some(template_id) = template_id {
            body["templateId"] = json!(template_id);
        }
        let response = self
            .http
            .post(self.url("/session"))
            .json(&body)
            .send()
            .await
            .map_err(Self::transport)?;
        Self::decode(response).await
    }

    async fn get_session(&self, token: &str) -> Result<GetSessionResponse, RuntimeError> {
        let response = self
            .http
            .get(self.url("/session"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::transport)?;
        Self::decode(response).await
    }

    async fn heartbeat(&self, token: &str) -> Result<HeartbeatResponse, RuntimeError> {
        let response = self
            .http
            .post(self.url("/session/heartbeat"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::transport)?;
        Self::decode(response).await
    }

    async fn delete_session(&self, token: &str) -> Result<(), RuntimeError> {
        let response = self
            .http
            .delete(self.url("/session"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::transport)?;
        Self::check(response).await.map(|_| ())
    }

    async fn redeploy(&self, token: &str, reason: Option<&str>) -> Result<(), RuntimeError> {
        let mut body = json!({});
        if let Some(reason) = reason {
            body["reason"] = json!(reason);
        }
        let response = self
            .http
            .post(self.url("/deploy/redeploy"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(Self::transport)?;
        Self::check(response).await.map(|_| ())
    }

    async fn list_files(
        &self,
        token: &str,
        virtual_path: &str,
    ) -> Result<Vec<RemoteEntry>, RuntimeError> {
        let response = self
            .http
            .get(self.url("/files/list"))
            .query(&[("path", virtual_path)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::transport)?;
        Self::decode::<EntriesEnvelope>(response)
            .await
            .map(|envelope| envelope.entries)
    }

    async fn read_file(
        &self,
        token: &str,
        virtual_path: &str,
    ) -> Result<RemoteFile, RuntimeError> {
        let response = self
            .http
            .get(self.url("/files/read"))
            .query(&[("path", virtual_path)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::transport)?;
        Self::decode::<FileEnvelope>(response)
            .await
            .map(|envelope| envelope.file)
    }

    async fn write_file(
        &self,
        token: &str,
        virtual_path: &str,
        content: &str,
        encoding: FileEncoding,
    ) -> Result<(), RuntimeError> {
        let response = self
            .http
            .put(self.url("/files/write"))
            .bearer_auth(token)
            .json(&json!({
                "path": virtual_path,
                "content": content,
                "encoding": encoding,
            }))
            .send()
            .await
            .map_err(Self::transport)?;
        Self::check(response).await.map(|_| ())
    }

    async fn mkdir(&self, token: &str, virtual_path: &str) -> Result<(), RuntimeError> {
        let response = self
            .http
            .post(self.url("/files/mkdir"))
            .bearer_auth(token)
            .json(&json!({ "path": virtual_path }))
            .send()
            .await
            .map_err(Self::transport)?;
        Self::check(response).await.map(|_| ())
    }

    async fn delete_path(
        &self,
        token: &str,
        virtual_path: &str,
        recursive: bool,
    ) -> Result<(), RuntimeError> {
        let response = self
            .http
            .delete(self.url("/files/delete"))
            .bearer_auth(token)
            .json(&json!({ "path": virtual_path, "recursive": recursive }))
            .send()
            .await
            .map_err(Self::transport)?;
        Self::check(response).await.map(|_| ())
    }

    async fn search_files(
        &self,
        token: &str,
        query: &str,
        virtual_path: Option<&str>,
    ) -> Result<Vec<RemoteEntry>, RuntimeError> {
        let mut params = vec![("query", query.to_string())];
        if let Some(path) = virtual_path {
            params.push(("path", path.to_string()));
        }
        let response = self
            .http
            .get(self.url("/files/search"))
            .query(&params)
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::transport)?;
        Self::decode::<EntriesEnvelope>(response)
            .await
            .map(|envelope| envelope.entries)
    }
}
