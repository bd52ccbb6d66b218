//! Session token codec.
//!
//! Tokens are HS256 JWTs binding an editor to exactly one compose. They are
//! opaque to the client, never stored server-side, and every heartbeat
//! reissues one with a fresh expiry (sliding TTL). Revocation is implicit:
//! deleting the compose makes the token useless.

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

pub const TOKEN_SCHEMA_VERSION: u8 = 1;

/// The identity a token binds: everything a scoped operation needs, so the
/// server never trusts client-supplied compose or project ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBinding {
    pub actor_id: String,
    pub chat_id: String,
    pub project_id: String,
    pub environment_id: String,
    pub compose_id: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub v: u8,
    #[serde(rename = "actorId")]
    pub actor_id: String,
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "environmentId")]
    pub environment_id: String,
    #[serde(rename = "composeId")]
    pub compose_id: String,
    pub domain: String,
    /// Issued-at, seconds since epoch.
    pub iat: i64,
    /// Expiry, seconds since epoch.
    pub exp: i64,
}

impl TokenClaims {
    pub fn binding(&self) -> SessionBinding {
        SessionBinding {
            actor_id: self.actor_id.clone(),
            chat_id: self.chat_id.clone(),
            project_id: self.project_id.clone(),
            environment_id: self.environment_id.clone(),
            compose_id: self.compose_id.clone(),
            domain: self.domain.clone(),
        }
    }
}

/// Sign a token whose lease starts now.
pub fn sign(
    binding: &SessionBinding,
    secret: &str,
    ttl_sec: i64,
) -> Result<(String, TokenClaims), RuntimeError> {
    sign_at(binding, secret, ttl_sec, Utc::now().timestamp())
}

/// Sign with an explicit issue time. Split out so tests control the clock.
pub fn sign_at(
    binding: &SessionBinding,
    secret: &str,
    ttl_sec: i64,
    iat: i64,
) -> Result<(String, TokenClaims), RuntimeError> {
    let claims = TokenClaims {
        v: TOKEN_SCHEMA_VERSION,
        actor_id: binding.actor_id.clone(),
        chat_id: binding.chat_id.clone(),
        project_id: binding.project_id.clone(),
        environment_id: binding.environment_id.clone(),
        compose_id: binding.compose_id.clone(),
        domain: binding.domain.clone(),
        iat,
        exp: iat + ttl_sec,
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| RuntimeError::internal(format!("failed to sign runtime token: {e}")))?;
    Ok((token, claims))
}

/// Verify signature, algorithm, and expiry. Any failure is a 401.
pub fn verify(token: &str, secret: &str) -> Result<TokenClaims, RuntimeError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp"]);

    let data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => RuntimeError::unauthorized("runtime token expired"),
        _ => RuntimeError::unauthorized("invalid runtime token"),
    })?;

    if data.claims.v != TOKEN_SCHEMA_VERSION {
        return Err(RuntimeError::unauthorized("unsupported runtime token version"));
    }
    Ok(data.claims)
}
