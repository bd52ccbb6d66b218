//! Typed client for the platform's batched-envelope HTTP surface.
//!
//! Everything above this module talks to [`PlatformApi`]; the HTTP
//! implementation is [`client::DokployClient`]. Tests inject mock
//! implementations of the trait instead of a live panel.

pub mod client;
#[cfg(test)]
pub mod test_support;
pub mod types;

use async_trait::async_trait;

pub use client::DokployClient;
pub use types::*;

use crate::error::RuntimeError;

/// Caller-supplied request ids are accepted when they are safe to echo into
/// headers and logs; anything else gets a fresh UUID.
pub fn resolve_request_id(candidate: Option<&str>) -> String {
    match candidate {
        Some(id) if is_valid_request_id(id) => id.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

fn is_valid_request_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'-'))
}

/// The platform operations the broker depends on.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn project_all(&self, request_id: &str) -> Result<Vec<Project>, RuntimeError>;
    async fn project_create(&self, name: &str, request_id: &str) -> Result<Project, RuntimeError>;
    async fn project_one(&self, project_id: &str, request_id: &str)
    -> Result<Project, RuntimeError>;

    async fn compose_one(&self, compose_id: &str, request_id: &str)
    -> Result<Compose, RuntimeError>;
    async fn compose_create(
        &self,
        input: &ComposeCreateInput,
        request_id: &str,
    ) -> Result<Compose, RuntimeError>;
    async fn compose_update(
        &self,
        input: &ComposeUpdateInput,
        request_id: &str,
    ) -> Result<(), RuntimeError>;
    async fn compose_delete(
        &self,
        compose_id: &str,
        delete_volumes: bool,
        request_id: &str,
    ) -> Result<(), RuntimeError>;
    async fn compose_deploy(&self, compose_id: &str, request_id: &str)
    -> Result<(), RuntimeError>;
    async fn compose_redeploy(
        &self,
        compose_id: &str,
        request_id: &str,
    ) -> Result<(), RuntimeError>;

    async fn deployments_by_compose(
        &self,
        compose_id: &str,
        request_id: &str,
    ) -> Result<Vec<Deployment>, RuntimeError>;

    async fn domains_by_compose(
        &self,
        compose_id: &str,
        request_id: &str,
    ) -> Result<Vec<ComposeDomain>, RuntimeError>;
    async fn domain_generate(
        &self,
        app_name: &str,
        server_id: Option<&str>,
        request_id: &str,
    ) -> Result<String, RuntimeError>;
    async fn domain_create(
        &self,
        input: &DomainCreateInput,
        request_id: &str,
    ) -> Result<(), RuntimeError>;

    async fn server_all(&self, request_id: &str) -> Result<Vec<PlatformServer>, RuntimeError>;

    async fn files_list(
        &self,
        compose_id: &str,
        path: &str,
        request_id: &str,
    ) -> Result<Vec<FileEntry>, RuntimeError>;
    async fn files_read(
        &self,
        compose_id: &str,
        path: &str,
        request_id: &str,
    ) -> Result<FileContent, RuntimeError>;
    async fn files_write(
        &self,
        input: &FileWriteInput,
        request_id: &str,
    ) -> Result<(), RuntimeError>;
    async fn files_mkdir(
        &self,
        compose_id: &str,
        path: &str,
        request_id: &str,
    ) -> Result<(), RuntimeError>;
    async fn files_delete(
        &self,
        compose_id: &str,
        path: &str,
        recursive: bool,
        request_id: &str,
    ) -> Result<(), RuntimeError>;
    async fn files_search(
        &self,
        compose_id: &str,
        query: &str,
        path: Option<&str>,
        request_id: &str,
    ) -> Result<Vec<FileEntry>, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_request_ids_pass_through() {
        for id in ["abc", "req_1", "a.b:c-d", "A1"] {
            assert_eq!(resolve_request_id(Some(id)), id);
        }
    }

    #[test]
    fn invalid_request_ids_get_replaced() {
        let replaced = resolve_request_id(Some("has spaces"));
        assert_ne!(replaced, "has spaces");
        assert!(uuid::Uuid::parse_str(&replaced).is_ok());

        assert!(uuid::Uuid::parse_str(&resolve_request_id(Some(""))).is_ok());
        assert!(uuid::Uuid::parse_str(&resolve_request_id(None)).is_ok());

        let too_long = "x".repeat(129);
        assert!(uuid::Uuid::parse_str(&resolve_request_id(Some(&too_long))).is_ok());
    }

    #[test]
    fn max_length_id_is_kept() {
        let id = "x".repeat(128);
        assert_eq!(resolve_request_id(Some(&id)), id);
    }
}
