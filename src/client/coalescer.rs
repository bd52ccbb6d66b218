//! Per-file write coalescing.
//!
//! Editors emit a write per keystroke burst; the platform wants one. Each
//! file gets a lane holding the latest pending job (older jobs collapse),
//! a resettable debounce timer, and a worker that commits dispatched jobs
//! strictly in order. Every enqueued generation resolves exactly once:
//! `written` when its content hit the platform, `canceled` when a newer
//! generation superseded it. Cancellation is a resolution, never an error;
//! only a platform failure rejects, and only for the generation that was
//! actually committed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::RuntimeError;
use crate::platform::types::FileEncoding;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct WriteJob {
    pub file_path: String,
    pub content: String,
    pub encoding: FileEncoding,
    pub generation: u64,
}

#[async_trait]
pub trait WriteSink: Send + Sync {
    async fn write(&self, job: &WriteJob) -> Result<(), RuntimeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Written,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    pub generation: u64,
    pub status: WriteStatus,
}

type Resolver = oneshot::Sender<Result<WriteReceipt, RuntimeError>>;

enum Commit {
    Write { job: WriteJob, resolver: Resolver },
    Barrier(oneshot::Sender<()>),
}

struct Lane {
    latest_generation: u64,
    latest_job: Option<WriteJob>,
    pending: HashMap<u64, Resolver>,
    debounce: Option<JoinHandle<()>>,
    commits: mpsc::UnboundedSender<Commit>,
    _worker: JoinHandle<()>,
}

/// Handle for one enqueued write.
pub struct PendingWrite {
    generation: u64,
    rx: oneshot::Receiver<Result<WriteReceipt, RuntimeError>>,
}

impl PendingWrite {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn wait(self) -> Result<WriteReceipt, RuntimeError> {
        match self.rx.await {
            Ok(result) => result,
            // The coalescer was dropped wholesale; treat like a cancel.
            Err(_) => Ok(WriteReceipt {
                generation: self.generation,
                status: WriteStatus::Canceled,
            }),
        }
    }
}

pub struct WriteCoalescer {
    inner: Arc<CoalescerInner>,
}

struct CoalescerInner {
    sink: Arc<dyn WriteSink>,
    debounce: Duration,
    lanes: Mutex<HashMap<String, Lane>>,
}

impl WriteCoalescer {
    pub fn new(sink: Arc<dyn WriteSink>) -> Self {
        Self::with_debounce(sink, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(sink: Arc<dyn WriteSink>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(CoalescerInner {
                sink,
                debounce,
                lanes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Queue a write. The debounce timer restarts; an undisplaced timer
    /// fire commits only the newest generation.
    pub async fn enqueue(
        &self,
        file_path: &str,
        content: String,
        encoding: FileEncoding,
    ) -> PendingWrite {
        let mut lanes = self.inner.lanes.lock().await;
        let lane = lanes
            .entry(file_path.to_string())
            .or_insert_with(|| spawn_lane(&self.inner.sink));

        lane.latest_generation += 1;
        let generation = lane.latest_generation;
        lane.latest_job = Some(WriteJob {
            file_path: file_path.to_string(),
            content,
            encoding,
            generation,
        });

        let (tx, rx) = oneshot::channel();
        lane.pending.insert(generation, tx);

        if let Some(handle) = lane.debounce.take() {
            handle.abort();
        }
        let inner = Arc::clone(&self.inner);
        let path = file_path.to_string();
        let delay = self.inner.debounce;
        lane.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.dispatch(&path, true).await;
        }));

        PendingWrite { generation, rx }
    }

    /// Dispatch any pending job now and wait until the lane's commit chain
    /// drains. Re-runs if a commit raced in a newer job.
    pub async fn flush(&self, file_path: &str) {
        loop {
            self.inner.dispatch(file_path, false).await;
            let Some(barrier) = self.inner.barrier(file_path).await else {
                return;
            };
            let _ = barrier.await;

            let lanes = self.inner.lanes.lock().await;
            let drained = lanes
                .get(file_path)
                .map(|lane| lane.latest_job.is_none() && lane.debounce.is_none())
                .unwrap_or(true);
            if drained {
                return;
            }
        }
    }

    pub async fn flush_all(&self) {
        self.flush_matching(|_| true).await;
    }

    pub async fn flush_matching(&self, predicate: impl Fn(&str) -> bool) {
        let paths: Vec<String> = {
            let lanes = self.inner.lanes.lock().await;
            lanes.keys().filter(|p| predicate(p)).cloned().collect()
        };
        for path in paths {
            self.flush(&path).await;
        }
    }

    /// Drop the pending job and resolve every waiter as canceled. Commits
    /// already handed to the worker still complete.
    pub async fn cancel(&self, file_path: &str) {
        let mut lanes = self.inner.lanes.lock().await;
        if let Some(lane) = lanes.get_mut(file_path) {
            cancel_lane(lane);
        }
    }

    pub async fn cancel_all(&self) {
        self.cancel_matching(|_| true).await;
    }

    pub async fn cancel_matching(&self, predicate: impl Fn(&str) -> bool) {
        let mut lanes = self.inner.lanes.lock().await;
        for (path, lane) in lanes.iter_mut() {
            if predicate(path) {
                cancel_lane(lane);
            }
        }
    }
}

impl CoalescerInner {
    /// Move the newest job to the commit worker; everything older resolves
    /// canceled right here.
    async fn dispatch(&self, file_path: &str, from_timer: bool) {
        let mut lanes = self.lanes.lock().await;
        let Some(lane) = lanes.get_mut(file_path) else {
            return;
        };
        if from_timer {
            lane.debounce = None;
        } else if let Some(handle) = lane.debounce.take() {
            handle.abort();
        }
        let Some(job) = lane.latest_job.take() else {
            return;
        };
        let snapshot = job.generation;

        let older: Vec<u64> = lane
            .pending
            .keys()
            .copied()
            .filter(|g| *g < snapshot)
            .collect();
        for generation in older {
            if let Some(resolver) = lane.pending.remove(&generation) {
                let _ = resolver.send(Ok(WriteReceipt {
                    generation,
                    status: WriteStatus::Canceled,
                }));
            }
        }

        if let Some(resolver) = lane.pending.remove(&snapshot) {
            let _ = lane.commits.send(Commit::Write { job, resolver });
        }
    }

    async fn barrier(&self, file_path: &str) -> Option<oneshot::Receiver<()>> {
        let lanes = self.lanes.lock().await;
        let lane = lanes.get(file_path)?;
        let (tx, rx) = oneshot::channel();
        lane.commits.send(Commit::Barrier(tx)).ok()?;
        Some(rx)
    }
}

fn cancel_lane(lane: &mut Lane) {
    if let Some(handle) = lane.debounce.take() {
        handle.abort();
    }
    lane.latest_job = None;
    for (generation, resolver) in lane.pending.drain() {
        let _ = resolver.send(Ok(WriteReceipt {
            generation,
            status: WriteStatus::Canceled,
        }));
    }
}

fn spawn_lane(sink: &Arc<dyn WriteSink>) -> Lane {
    let (tx, mut rx) = mpsc::unbounded_channel::<Commit>();
    let sink = Arc::clone(sink);
    let worker = tokio::spawn(async move {
        while let Some(commit) = rx.recv().await {
            match commit {
                Commit::Write { job, resolver } => {
                    let generation = job.generation;
                    let result = sink.write(&job).await.map(|()| WriteReceipt {
                        generation,
                        status: WriteStatus::Written,
                    });
                    if let Err(e) = &result {
                        tracing::warn!(
                            file_path = %job.file_path,
                            generation,
                            error = %e,
                            "coalesced write failed"
                        );
                    }
                    let _ = resolver.send(result);
                }
                Commit::Barrier(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    });
    Lane {
        latest_generation: 0,
        latest_job: None,
        pending: HashMap::new(),
        debounce: None,
        commits: tx,
        _worker: worker,
    }
}
