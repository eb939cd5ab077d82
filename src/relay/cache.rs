//! In-memory cache of the latest normalized state per poll key.
//!
//! Written by the refresh path (poll workers and the subscribe-time immediate
//! fetch), read by subscribers and the `/api/match` endpoint. Entries are
//! replaced whole; nothing is ever evicted.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::models::{MatchState, PollKey};

/// Thread-safe latest-snapshot cache. Each key is replaced atomically under
/// its own shard lock, so writers for different matches never contend on a
/// global lock.
#[derive(Clone, Default)]
pub struct StateCache {
    inner: Arc<DashMap<PollKey, MatchState>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `state` as the latest value for `key`, returning the value it
    /// replaced.
    pub fn put(&self, key: &PollKey, state: MatchState) -> Option<MatchState> {
        let previous = self.inner.insert(key.clone(), state);
        debug!(
            "StateCache: {} {} ({} entries)",
            if previous.is_some() { "replaced" } else { "created" },
            key,
            self.inner.len()
        );
        previous
    }

    pub fn get(&self, key: &PollKey) -> Option<MatchState> {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    /// Number of cached snapshots.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
