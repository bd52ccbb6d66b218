use hyper::StatusCode;
use serde_json::Value;

/// Externally visible error codes. Every layer below the HTTP adapter
/// produces these; the adapter turns them into the response envelope.
pub mod codes {
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const MISSING_RUNTIME_TOKEN: &str = "MISSING_RUNTIME_TOKEN";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const METHOD_NOT_ALLOWED: &str = "METHOD_NOT_ALLOWED";
    pub const CONFLICT: &str = "CONFLICT";
    pub const PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";
    pub const TOO_MANY_REQUESTS: &str = "TOO_MANY_REQUESTS";
    pub const NOT_IMPLEMENTED: &str = "NOT_IMPLEMENTED";
    pub const NO_ENVIRONMENT: &str = "NO_ENVIRONMENT";
    pub const NO_CANARY_DEPLOY_SERVER: &str = "NO_CANARY_DEPLOY_SERVER";
    pub const RUNTIME_DOMAIN_UNAVAILABLE: &str = "RUNTIME_DOMAIN_UNAVAILABLE";
    pub const INVALID_JSON_RESPONSE: &str = "INVALID_JSON_RESPONSE";
    pub const INVALID_TRPC_RESPONSE: &str = "INVALID_TRPC_RESPONSE";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const RETRY_EXHAUSTED: &str = "RETRY_EXHAUSTED";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
}

/// The one error value that flows across every layer of the runtime broker.
///
/// `status` is what the HTTP surface will answer with, `code` is the stable
/// machine-readable identifier, `message` is the human-readable text.
/// Platform error codes pass through `code` verbatim, so it is a `String`
/// rather than a closed enum.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RuntimeError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

impl RuntimeError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, codes::UNAUTHORIZED, message)
    }

    pub fn missing_token() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::MISSING_RUNTIME_TOKEN,
            "missing runtime token",
        )
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, codes::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, codes::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::INTERNAL_SERVER_ERROR,
            message,
        )
    }

    pub fn is_code(&self, code: &str) -> bool {
        self.code == code
    }

    /// Transient upstream failures worth re-attempting. The set is
    /// status-driven: everything the platform could recover from on a
    /// fresh attempt, plus transport-level failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status.as_u16(),
            408 | 425 | 429 | 500 | 502 | 503 | 504
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_code_and_message() {
        let err = RuntimeError::bad_request("path traversal");
        assert_eq!(err.to_string(), "BAD_REQUEST: path traversal");
    }

    #[test]
    fn constructors_set_status() {
        assert_eq!(RuntimeError::bad_request("x").status, StatusCode::BAD_REQUEST);
        assert_eq!(RuntimeError::unauthorized("x").status, StatusCode::UNAUTHORIZED);
        assert_eq!(RuntimeError::forbidden("x").status, StatusCode::FORBIDDEN);
        assert_eq!(RuntimeError::not_found("x").status, StatusCode::NOT_FOUND);
        assert_eq!(RuntimeError::conflict("x").status, StatusCode::CONFLICT);
        assert_eq!(
            RuntimeError::internal("x").status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn missing_token_uses_dedicated_code() {
        let err = RuntimeError::missing_token();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.code, codes::MISSING_RUNTIME_TOKEN);
    }

    #[test]
    fn retryable_statuses() {
        for status in [408u16, 425, 429, 500, 502, 503, 504] {
            let err = RuntimeError::new(
                StatusCode::from_u16(status).unwrap(),
                codes::NETWORK_ERROR,
                "transient",
            );
            assert!(err.is_retryable(), "status {status} should be retryable");
        }
        for status in [400u16, 401, 403, 404, 409, 413, 501] {
            let err = RuntimeError::new(
                StatusCode::from_u16(status).unwrap(),
                codes::BAD_REQUEST,
                "terminal",
            );
            assert!(!err.is_retryable(), "status {status} should not retry");
        }
    }

    #[test]
    fn is_code_matches_exactly() {
        let err = RuntimeError::conflict("duplicate compose");
        assert!(err.is_code(codes::CONFLICT));
        assert!(!err.is_code(codes::BAD_REQUEST));
    }

    #[test]
    fn details_round_trip() {
        let err = RuntimeError::bad_request("schema mismatch")
            .with_details(serde_json::json!({"field": "chatId"}));
        assert_eq!(err.details.unwrap()["field"], "chatId");
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RuntimeError>();
    }
}
