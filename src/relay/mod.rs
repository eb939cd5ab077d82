//! The relay core: worker registry, poll workers, state cache and topic
//! fan-out, tied together by one cloneable [`Relay`] handle.
//!
//! ```text
//!  viewer ──subscribe──▶ Relay::subscribe ──▶ Topics::join
//!                              │
//!                              ├─▶ WorkerRegistry::ensure_started ──spawn──▶ poll worker
//!                              │                                              │ every interval
//!                              └─▶ immediate fetch / cached snapshot          ▼
//!                                            │                    fetch → StateCache::put
//!                                            ▼                              │
//!                                   Topics::publish ◀───────────────────────┘
//! ```
//!
//! The handle is created once in `main` and cloned into every connection
//! task and worker; there is no global state.

pub mod cache;
pub mod fanout;
pub mod registry;
pub mod subscription;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::StateCache;
pub use fanout::{ConnectionId, Topics, Viewer};
pub use registry::{WorkerInfo, WorkerRegistry};
pub use subscription::Delivery;
pub use worker::PollSettings;

use serde::Serialize;
use std::sync::Arc;

use crate::live_scores::StateSource;

/// Shared process-scoped relay state.
#[derive(Clone)]
pub struct Relay {
    source: Arc<dyn StateSource>,
    cache: StateCache,
    registry: Arc<WorkerRegistry>,
    topics: Arc<Topics>,
    settings: PollSettings,
}

/// Snapshot of relay occupancy for `/api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct RelayStats {
    pub source: String,
    pub workers: Vec<WorkerInfo>,
    pub topics: usize,
    pub viewers: usize,
    pub cached: usize,
    pub poll_interval_secs: f64,
    pub fetch_timeout_secs: f64,
}

impl Relay {
    pub fn new(source: Arc<dyn StateSource>, settings: PollSettings) -> Self {
        Relay {
            source,
            cache: StateCache::new(),
            registry: Arc::new(WorkerRegistry::new()),
            topics: Arc::new(Topics::new()),
            settings,
        }
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn source(&self) -> &dyn StateSource {
        self.source.as_ref()
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            source: self.source.name().to_string(),
            workers: self.registry.workers(),
            topics: self.topics.topic_count(),
            viewers: self.topics.membership_count(),
            cached: self.cache.len(),
            poll_interval_secs: self.settings.poll_interval.as_secs_f64(),
            fetch_timeout_secs: self.settings.fetch_timeout.as_secs_f64(),
        }
    }

    /// Cancel all poll workers and wait for them to stop.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
