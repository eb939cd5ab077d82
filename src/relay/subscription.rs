use tracing::{debug, info};

use super::fanout::{ConnectionId, Viewer};
use super::registry::Registration;
use super::worker::{log_no_data, run_poll_worker};
use super::Relay;
use crate::models::{Envelope, PollKey, Sport};

/// How a subscribe request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Served from the state cache without touching the network
    Cached,
    /// Fetched synchronously and published
    Fetched,
    /// Fetch failed; a no-data notice was published instead
    NoData,
}

impl Relay {
    /// Join `viewer` to the topic for `match_id`, make sure a poll worker
    /// exists for `(match_id, sport)`, and answer the topic right away with
    /// either the cached snapshot, a fresh one, or an explicit no-data
    /// notice. Never leaves the viewer without a message.
    pub async fn subscribe(&self, viewer: &Viewer, match_id: &str, sport: Sport) -> Delivery {
        self.topics.join(match_id, viewer);
        info!("Viewer {} subscribed to {} (sport: {})", viewer.id(), match_id, sport);

        let key = PollKey::new(match_id, sport);
        let registration = self.registry.ensure_started(&key, |cancel| {
            run_poll_worker(self.clone(), key.clone(), cancel)
        });

        match registration {
            Registration::Started(first_fetch) => {
                info!("Started poll worker for {}, fetching initial data", key);
                let delivery = self.fetch_for_topic(&key).await;
                drop(first_fetch);
                delivery
            }
            Registration::Existing(gate) => {
                if let Some(delivery) = self.publish_cached(&key) {
                    return delivery;
                }
                // Let an in-flight first fetch for this key land before
                // deciding to hit the network again. The permit is released
                // at once so waiters never queue behind each other's
                // fallback fetch, and the wait is bounded by one fetch.
                if tokio::time::timeout(self.settings.fetch_timeout, gate.acquire())
                    .await
                    .is_err()
                {
                    debug!("First fetch for {} still running, fetching for subscriber", key);
                }
                if let Some(delivery) = self.publish_cached(&key) {
                    return delivery;
                }
                debug!("No cached data for {}, fetching for subscriber", key);
                self.fetch_for_topic(&key).await
            }
        }
    }

    /// Remove `viewer_id` from the topic. The poll worker keeps running.
    pub fn unsubscribe(&self, viewer_id: ConnectionId, match_id: &str) -> bool {
        let left = self.topics.leave(match_id, viewer_id);
        info!("Viewer {} unsubscribed from {}", viewer_id, match_id);
        left
    }

    /// Drop a closed connection from every topic.
    pub fn disconnect(&self, viewer_id: ConnectionId) -> usize {
        let left = self.topics.leave_all(viewer_id);
        debug!("Viewer {} disconnected, left {} topic(s)", viewer_id, left);
        left
    }

    fn publish_cached(&self, key: &PollKey) -> Option<Delivery> {
        let state = self.cache.get(key)?;
        debug!("Sending cached data for {}", key);
        self.topics
            .publish(&key.match_id, Envelope::update(&key.match_id, &state));
        Some(Delivery::Cached)
    }

    async fn fetch_for_topic(&self, key: &PollKey) -> Delivery {
        match self.refresh(key).await {
            Ok(()) => Delivery::Fetched,
            Err(e) => {
                log_no_data(key, &e);
                self.topics
                    .publish(&key.match_id, Envelope::no_data(key, e.viewer_message()));
                Delivery::NoData
            }
        }
    }
}
