//! Wire types for the platform's batched-envelope API.
//!
//! Field names follow the platform's camelCase JSON. Everything optional on
//! the wire is optional here; the orchestrator decides what absence means.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Projects & environments ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "projectId")]
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub environments: Vec<Environment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    #[serde(rename = "environmentId")]
    pub environment_id: String,
    pub name: String,
    #[serde(rename = "isDefault", default)]
    pub is_default: bool,
    #[serde(default)]
    pub composes: Vec<Compose>,
}

// ── Composes & deployments ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compose {
    #[serde(rename = "composeId")]
    pub compose_id: String,
    pub name: String,
    #[serde(rename = "appName", default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "composeStatus", default)]
    pub compose_status: Option<String>,
    #[serde(rename = "serverId", default)]
    pub server_id: Option<String>,
    #[serde(rename = "environmentId", default)]
    pub environment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(rename = "deploymentId")]
    pub deployment_id: String,
    pub status: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeCreateInput {
    pub name: String,
    #[serde(rename = "appName")]
    pub app_name: String,
    #[serde(rename = "environmentId")]
    pub environment_id: String,
    #[serde(rename = "composeType")]
    pub compose_type: String,
    #[serde(rename = "composeFile")]
    pub compose_file: String,
    pub description: String,
    #[serde(rename = "serverId", skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeUpdateInput {
    #[serde(rename = "composeId")]
    pub compose_id: String,
    pub description: String,
    #[serde(rename = "sourceType", skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(rename = "composePath", skip_serializing_if = "Option::is_none")]
    pub compose_path: Option<String>,
}

// ── Domains & servers ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeDomain {
    #[serde(rename = "domainId", default)]
    pub domain_id: Option<String>,
    pub host: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub https: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainCreateInput {
    #[serde(rename = "composeId")]
    pub compose_id: String,
    pub host: String,
    pub path: String,
    pub port: u16,
    pub https: bool,
    #[serde(rename = "serviceName")]
    pub service_name: String,
    #[serde(rename = "certificateType")]
    pub certificate_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformServer {
    #[serde(rename = "serverId")]
    pub server_id: String,
    pub name: String,
    #[serde(rename = "sshKeyId", default)]
    pub ssh_key_id: Option<String>,
}

impl PlatformServer {
    pub fn is_ssh_enabled(&self) -> bool {
        self.ssh_key_id.is_some()
    }
}

// ── File manager ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    Utf8,
    Base64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    /// Platform-relative path (no leading slash).
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "modifiedAt", default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub encoding: FileEncoding,
    #[serde(rename = "isBinary", default)]
    pub is_binary: bool,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "modifiedAt", default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileWriteInput {
    #[serde(rename = "composeId")]
    pub compose_id: String,
    pub path: String,
    pub content: String,
    pub encoding: FileEncoding,
    pub overwrite: bool,
}
