//! Canary cohort selection.
//!
//! A chat is pinned to the stable or canary deploy server by a
//! deterministic bucket hash over `actorId:chatId`. The hash constants are
//! part of the contract: changing them reshuffles every existing chat.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cohort {
    Stable,
    Canary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutDecision {
    pub bucket: u32,
    pub percent: u32,
    pub cohort: Cohort,
}

/// 32-bit FNV-style mix used for cohort bucketing.
pub fn bucket_hash(input: &str) -> u32 {
    let mut h: u32 = 2_166_136_261;
    for byte in input.bytes() {
        h ^= u32::from(byte);
        h = h.wrapping_add(
            (h << 1)
                .wrapping_add(h << 4)
                .wrapping_add(h << 7)
                .wrapping_add(h << 8)
                .wrapping_add(h << 24),
        );
    }
    h
}

/// 64-bit FNV-1a in hex, used to derive resource names (`bolt-actor-*`,
/// `bolt-chat-*`) long enough for a 10–12 char prefix.
pub fn name_hash(input: &str) -> String {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in input.bytes() {
        h ^= u64::from(byte);
        h = h.wrapping_mul(0x1_0000_0000_01b3);
    }
    format!("{h:016x}")
}

/// Pick the rollout cohort for a chat. `percent` is clamped and truncated
/// into [0, 100]; canary requires a strictly winning bucket.
pub fn select(actor_id: &str, chat_id: &str, percent: f64) -> RolloutDecision {
    let percent = if percent.is_nan() {
        0
    } else {
        percent.clamp(0.0, 100.0).trunc() as u32
    };
    let bucket = bucket_hash(&format!("{actor_id}:{chat_id}")) % 100;
    let cohort = if percent > 0 && bucket < percent {
        Cohort::Canary
    } else {
        Cohort::Stable
    };
    RolloutDecision {
        bucket,
        percent,
        cohort,
    }
}
