//! Visibility-aware refresh pacing.
//!
//! A visible editor refreshes its file tree 20 s after each completed
//! refresh. A hidden tab backs off 20→40→80→160→300 s (capped) and snaps
//! back to the visible cadence the moment it is foregrounded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

pub const VISIBLE_REFRESH_DELAY: Duration = Duration::from_secs(20);
pub const HIDDEN_REFRESH_CAP: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct RefreshBackoff {
    visible_delay: Duration,
    hidden_cap: Duration,
    next_hidden: Duration,
}

impl Default for RefreshBackoff {
    fn default() -> Self {
        Self::with_delays(VISIBLE_REFRESH_DELAY, HIDDEN_REFRESH_CAP)
    }
}

impl RefreshBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delays(visible_delay: Duration, hidden_cap: Duration) -> Self {
        Self {
            visible_delay,
            hidden_cap,
            next_hidden: visible_delay,
        }
    }

    /// Delay until the next refresh. Visible ticks also reset the hidden
    /// ladder.
    pub fn next_delay(&mut self, visible: bool) -> Duration {
        if visible {
            self.next_hidden = self.visible_delay;
            self.visible_delay
        } else {
            let delay = self.next_hidden;
            self.next_hidden = (delay * 2).min(self.hidden_cap);
            delay
        }
    }

    pub fn reset(&mut self) {
        self.next_hidden = self.visible_delay;
    }
}

/// Runs one refresh at a time on the backoff cadence; visibility changes
/// interrupt the current wait and restart it on the reset ladder.
pub struct RefreshScheduler {
    visible: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn start<F, Fut>(refresh: F) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        Self::start_with(refresh, RefreshBackoff::new())
    }

    pub fn start_with<F, Fut>(refresh: F, mut backoff: RefreshBackoff) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let scheduler = Arc::new(Self {
            visible: Arc::new(AtomicBool::new(true)),
            wake: Arc::new(Notify::new()),
            task: Mutex::new(None),
        });

        let visible = Arc::clone(&scheduler.visible);
        let wake = Arc::clone(&scheduler.wake);
        let task = tokio::spawn(async move {
            loop {
                let delay = backoff.next_delay(visible.load(Ordering::SeqCst));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        refresh().await;
                    }
                    _ = wake.notified() => {
                        backoff.reset();
                    }
                }
            }
        });
        if let Ok(mut slot) = scheduler.task.try_lock() {
            *slot = Some(task);
        }
        scheduler
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn hidden_delays_follow_the_documented_ladder() {
        let mut backoff = RefreshBackoff::new();
        let secs: Vec<u64> = (0..6).map(|_| backoff.next_delay(false).as_secs()).collect();
        assert_eq!(secs, vec![20, 40, 80, 160, 300, 300]);
    }

    #[test]
    fn visible_tick_resets_the_ladder() {
        let mut backoff = RefreshBackoff::new();
        backoff.next_delay(false);
        backoff.next_delay(false);
        backoff.next_delay(false);

        assert_eq!(backoff.next_delay(true).as_secs(), 20);
        assert_eq!(backoff.next_delay(false).as_secs(), 20);
    }

    #[test]
    fn explicit_reset_matches_visible_reset() {
        let mut backoff = RefreshBackoff::new();
        backoff.next_delay(false);
        backoff.next_delay(false);
        backoff.reset();
        assert_eq!(backoff.next_delay(false).as_secs(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_fires_on_the_visible_cadence() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let scheduler = RefreshScheduler::start(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(21)).await;
            tokio::task::yield_now().await;
        }
        assert!(count.load(Ordering::SeqCst) >= 2);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_scheduler_slows_down() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let scheduler = RefreshScheduler::start(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        scheduler.set_visible(false);
        tokio::task::yield_now().await;

        // Hidden ladder: first fire at 20s, second at 20+40s.
        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        let fired = count.load(Ordering::SeqCst);
        assert!(fired <= 2, "hidden tab fired {fired} times in 61s");
        scheduler.stop().await;
    }
}
