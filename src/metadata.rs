//! Session metadata codec.
//!
//! The platform gives us exactly one free-form slot per compose: the
//! description string. Everything the broker needs to recognize and expire
//! a session lives there, behind a sentinel prefix so composes created by
//! anyone else are never mistaken for ours.

use serde::{Deserialize, Serialize};

use crate::rollout::Cohort;

pub const METADATA_PREFIX: &str = "BOLT_RUNTIME:";
pub const METADATA_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub v: u8,
    #[serde(rename = "actorId")]
    pub actor_id: String,
    #[serde(rename = "chatId")]
    pub chat_id: String,
    /// Milliseconds since epoch.
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    /// Milliseconds since epoch. Advanced by every heartbeat.
    #[serde(rename = "lastSeenAt")]
    pub last_seen_at: i64,
    #[serde(rename = "idleTtlSec")]
    pub idle_ttl_sec: i64,
    #[serde(
        rename = "rolloutCohort",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub rollout_cohort: Option<Cohort>,
}

impl SessionMetadata {
    pub fn new(actor_id: &str, chat_id: &str, now_ms: i64, idle_ttl_sec: i64) -> Self {
        Self {
            v: METADATA_SCHEMA_VERSION,
            actor_id: actor_id.to_string(),
            chat_id: chat_id.to_string(),
            created_at: now_ms,
            last_seen_at: now_ms,
            idle_ttl_sec,
            rollout_cohort: None,
        }
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.last_seen_at + self.idle_ttl_sec * 1000
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms() < now_ms
    }
}

/// Serialize metadata into the compose description slot.
pub fn format(metadata: &SessionMetadata) -> String {
    // SessionMetadata has no map keys or non-string keys, so this cannot fail.
    let json = serde_json::to_string(metadata).unwrap_or_default();
    format!("{METADATA_PREFIX}{json}")
}

/// Parse the description slot. `None` means "not one of ours": missing
/// prefix, unparseable JSON, wrong schema version, or missing identity.
pub fn parse(description: &str) -> Option<SessionMetadata> {
    let json = description.strip_prefix(METADATA_PREFIX)?;
    let metadata: SessionMetadata = serde_json::from_str(json).ok()?;
    if metadata.v != METADATA_SCHEMA_VERSION {
        return None;
    }
    if metadata.actor_id.is_empty() || metadata.chat_id.is_empty() {
        return None;
    }
    Some(metadata)
}
