//! Keyed single-flight execution.
//!
//! Concurrent callers with the same key observe one underlying task and
//! share its result. The inner task is spawned, so a caller going away does
//! not abort work other callers are waiting on. Entries are removed only by
//! the task that owns them (checked by id), so a newer task that reclaimed
//! the key is never evicted by an older one settling late.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex;

use crate::error::RuntimeError;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, RuntimeError>>>;

struct Entry<T: Clone> {
    id: u64,
    fut: SharedResult<T>,
}

pub struct SingleFlight<T: Clone> {
    entries: Arc<Mutex<HashMap<String, Entry<T>>>>,
    next_id: AtomicU64,
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight task for `key`, or start one with `make`.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Result<T, RuntimeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>> + Send + 'static,
    {
        let fut = {
            let mut entries = self.entries.lock().await;
            // A settled future still sitting in the map (its watcher has
            // not run yet) must not serve stale results to new callers.
            let in_flight = entries
                .get(key)
                .filter(|entry| entry.fut.peek().is_none())
                .map(|entry| entry.fut.clone());
            if let Some(fut) = in_flight {
                fut
            } else {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let task = tokio::spawn(make());
                let fut: SharedResult<T> = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(e) => Err(RuntimeError::internal(format!(
                            "single-flight task failed: {e}"
                        ))),
                    }
                }
                .boxed()
                .shared();
                entries.insert(
                    key.to_string(),
                    Entry {
                        id,
                        fut: fut.clone(),
                    },
                );

                // Settle watcher: clear the key once the task finishes,
                // unless a newer task already replaced it.
                let watcher_fut = fut.clone();
                let watcher_entries = Arc::clone(&self.entries);
                let watcher_key = key.to_string();
                tokio::spawn(async move {
                    let _ = watcher_fut.await;
                    let mut entries = watcher_entries.lock().await;
                    if entries.get(&watcher_key).map(|e| e.id) == Some(id) {
                        entries.remove(&watcher_key);
                    }
                });

                fut
            }
        };
        fut.await
    }

    #[cfg(test)]
    pub async fn in_flight(&self) -> usize {
        self.entries.lock().await.len()
    }
}
