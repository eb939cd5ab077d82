use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Relay;
use crate::error::SourceError;
use crate::models::{Envelope, MatchState, PollKey};

/// Timing knobs for the refresh loop.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Sleep between iterations
    pub poll_interval: Duration,
    /// Upper bound on a single upstream fetch
    pub fetch_timeout: Duration,
    /// Delay before the first iteration, so it does not race the subscriber's
    /// immediate fetch
    pub initial_delay: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            poll_interval: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(10),
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl Relay {
    /// Fetch and normalize one snapshot, bounded by the fetch timeout. A
    /// panicking source is reported as an error, not propagated.
    pub(crate) async fn fetch_state(&self, key: &PollKey) -> Result<MatchState, SourceError> {
        let fetch = AssertUnwindSafe(self.source.fetch_state(&key.match_id, key.sport)).catch_unwind();
        match tokio::time::timeout(self.settings.fetch_timeout, fetch).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SourceError::Panicked),
            Err(_) => Err(SourceError::Timeout(self.settings.fetch_timeout)),
        }
    }

    /// One refresh: fetch, overwrite the cache, then publish to the topic.
    pub(crate) async fn refresh(&self, key: &PollKey) -> Result<(), SourceError> {
        let state = self.fetch_state(key).await?;
        let [home, away] = state.teams();
        info!(
            "Match data updated for {}: {} vs {} ({})",
            key,
            home,
            away,
            state.status()
        );

        let envelope = Envelope::update(&key.match_id, &state);
        self.cache.put(key, state);
        self.topics.publish(&key.match_id, envelope);
        Ok(())
    }
}

pub(crate) fn log_no_data(key: &PollKey, err: &SourceError) {
    if err.is_expected() {
        info!("No match data available for {} ({})", key, err);
    } else {
        warn!("Fetch failed for {}: {}", key, err);
    }
}

/// Background refresh loop for one poll key. Runs until `cancel` fires.
pub(crate) async fn run_poll_worker(relay: Relay, key: PollKey, cancel: CancellationToken) {
    info!("Poll worker started for {}", key);

    tokio::select! {
        _ = cancel.cancelled() => {
            info!("Poll worker for {} cancelled before first poll", key);
            return;
        }
        _ = sleep(relay.settings.initial_delay) => {}
    }
    debug!("Poll worker for {} running (interval={:?})", key, relay.settings.poll_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = relay.refresh(&key) => {
                if let Err(e) = result {
                    log_no_data(&key, &e);
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(relay.settings.poll_interval) => {}
        }
    }

    info!("Poll worker for {} stopped", key);
}
