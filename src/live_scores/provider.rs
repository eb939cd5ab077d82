use async_trait::async_trait;
use serde::Serialize;

use crate::error::SourceError;
use crate::models::{MatchState, Sport};

/// Trait that every upstream match-state source must implement.
#[async_trait]
pub trait StateSource: Send + Sync {
    /// Fetch and normalize the current state for `sport`. `match_id` is the
    /// viewer-chosen key the fetch is made on behalf of.
    async fn fetch_state(&self, match_id: &str, sport: Sport) -> Result<MatchState, SourceError>;

    /// Check upstream reachability without normalizing anything.
    async fn probe(&self, sport: Sport) -> Result<SourceProbe, SourceError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Result of a reachability probe, served by `/api/test`.
#[derive(Debug, Clone, Serialize)]
pub struct SourceProbe {
    pub sport: Sport,
    pub events_count: usize,
    pub has_data: bool,
    pub sample_keys: Vec<String>,
}
