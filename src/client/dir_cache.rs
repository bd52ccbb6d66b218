//! Short-TTL directory-listing cache with in-flight dedup.
//!
//! Keyed by (token, path): a token rotation must never serve another
//! session's listing. Concurrent lookups for the same key share one
//! network call via the slot's `OnceCell`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;

use super::api::{RemoteEntry, RuntimeApi};
use crate::error::RuntimeError;

pub const DEFAULT_TTL: Duration = Duration::from_millis(2000);

#[derive(Clone)]
struct CachedListing {
    entries: Vec<RemoteEntry>,
    resolved_at: Instant,
}

struct Slot {
    cell: OnceCell<CachedListing>,
}

pub struct DirectoryCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn key(token: &str, virtual_path: &str) -> String {
        format!("{token}::{virtual_path}")
    }

    pub async fn list(
        &self,
        api: &dyn RuntimeApi,
        token: &str,
        virtual_path: &str,
        force: bool,
    ) -> Result<Vec<RemoteEntry>, RuntimeError> {
        let key = Self::key(token, virtual_path);
        let slot = {
            let mut slots = self.slots.lock().await;
            if force {
                slots.remove(&key);
            } else {
                let expired = slots
                    .get(&key)
                    .and_then(|slot| slot.cell.get())
                    .is_some_and(|cached| cached.resolved_at.elapsed() >= self.ttl);
                if expired {
                    slots.remove(&key);
                }
            }
            Arc::clone(slots.entry(key).or_insert_with(|| {
                Arc::new(Slot {
                    cell: OnceCell::new(),
                })
            }))
        };

        let listing = slot
            .cell
            .get_or_try_init(|| async {
                let entries = api.list_files(token, virtual_path).await?;
                Ok::<_, RuntimeError>(CachedListing {
                    entries,
                    resolved_at: Instant::now(),
                })
            })
            .await?;
        Ok(listing.entries.clone())
    }

    /// Drop every entry cached under a token. Used after any write, mkdir,
    /// or delete through that token.
    pub async fn invalidate_token(&self, token: &str) {
        let prefix = format!("{token}::");
        self.slots
            .lock()
            .await
            .retain(|key, _| !key.starts_with(&prefix));
    }

    /// Drop everything. Used when the session token rotates.
    pub async fn clear(&self) {
        self.slots.lock().await.clear();
    }
}
