//! Worker registry: exactly one poll worker per (match, sport) key.
//!
//! The check-and-insert is a compare-and-insert on the key's `DashMap` shard,
//! so subscribers of unrelated matches never contend. Each entry also carries
//! a first-fetch gate: the subscriber that created the key holds it until its
//! immediate fetch finishes, and later subscribers that find the cache empty
//! wait on it before deciding whether to fetch themselves.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::models::PollKey;

struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    first_fetch: Arc<Semaphore>,
    started_at: DateTime<Utc>,
}

/// Held by the subscriber that started a worker; opens the key's first-fetch
/// gate when dropped.
pub struct FirstFetchGuard {
    gate: Arc<Semaphore>,
}

impl Drop for FirstFetchGuard {
    fn drop(&mut self) {
        self.gate.add_permits(1);
    }
}

/// Outcome of [`WorkerRegistry::ensure_started`].
pub enum Registration {
    /// A worker was started by this call.
    Started(FirstFetchGuard),
    /// A worker already existed; the gate opens once its first fetch is done.
    Existing(Arc<Semaphore>),
}

/// Diagnostic view of one registered worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub key: String,
    pub started_at: DateTime<Utc>,
    pub running: bool,
}

pub struct WorkerRegistry {
    workers: DashMap<PollKey, WorkerHandle>,
    started: AtomicUsize,
    /// Parent of every worker's token
    shutdown: CancellationToken,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        WorkerRegistry {
            workers: DashMap::new(),
            started: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start a worker for `key` unless one is already registered.
    ///
    /// `start` is invoked at most once per key for the life of the registry
    /// and receives the worker's cancellation token. Entries are never
    /// removed except by [`shutdown`](Self::shutdown).
    pub fn ensure_started<F, Fut>(&self, key: &PollKey, start: F) -> Registration
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let registration = match self.workers.entry(key.clone()) {
            Entry::Occupied(entry) => {
                return Registration::Existing(Arc::clone(&entry.get().first_fetch));
            }
            Entry::Vacant(slot) => {
                let cancel = self.shutdown.child_token();
                let gate = Arc::new(Semaphore::new(0));
                let task = tokio::spawn(start(cancel.clone()));
                slot.insert(WorkerHandle {
                    cancel,
                    task,
                    first_fetch: Arc::clone(&gate),
                    started_at: Utc::now(),
                });
                self.started.fetch_add(1, Ordering::SeqCst);
                Registration::Started(FirstFetchGuard { gate })
            }
        };

        // Shard lock released; safe to look at the whole map.
        let (started, live) = (self.started_total(), self.len());
        if started > live && !self.shutdown.is_cancelled() {
            error!(
                "Worker registry invariant violated: {} starts for {} keys (last: {})",
                started, live, key
            );
        }
        registration
    }

    #[cfg(test)]
    pub fn contains(&self, key: &PollKey) -> bool {
        self.workers.contains_key(key)
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Total workers ever started. Equal to `len()` unless something is badly
    /// wrong.
    pub fn started_total(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        let mut infos: Vec<WorkerInfo> = self
            .workers
            .iter()
            .map(|entry| WorkerInfo {
                key: entry.key().to_string(),
                started_at: entry.value().started_at,
                running: !entry.value().cancel.is_cancelled() && !entry.value().task.is_finished(),
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Cancel every worker and wait for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let keys: Vec<PollKey> = self.workers.iter().map(|e| e.key().clone()).collect();
        let mut stopped = 0;
        for key in keys {
            let Some((key, handle)) = self.workers.remove(&key) else {
                continue;
            };
            if let Err(e) = handle.task.await {
                warn!("Poll worker {} ended abnormally: {}", key, e);
            }
            stopped += 1;
        }
        info!("Stopped {} poll worker(s)", stopped);
    }
}
