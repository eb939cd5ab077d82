//! Per-match topics and best-effort fan-out to connected viewers.
//!
//! Uses `DashMap` for both the topic index and each topic's member set so
//! that join/leave from many connection tasks and publishes from many poll
//! workers proceed without a global lock.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::models::Envelope;

/// Unique viewer connection identifier.
pub type ConnectionId = Uuid;

/// Outbound half of a viewer connection.
///
/// The queue is bounded; when a slow viewer's queue is full further
/// envelopes are dropped for that viewer only.
#[derive(Clone)]
pub struct Viewer {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<Envelope>>,
}

impl Viewer {
    /// Create a viewer and the receiver its connection task drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Arc<Envelope>>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Viewer {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Topic membership: match id → connected viewers.
#[derive(Default)]
pub struct Topics {
    topics: DashMap<String, DashMap<ConnectionId, mpsc::Sender<Arc<Envelope>>>>,
}

impl Topics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `viewer` to the topic for `match_id`. Returns `false` if it was
    /// already a member.
    pub fn join(&self, match_id: &str, viewer: &Viewer) -> bool {
        let members = self.topics.entry(match_id.to_string()).or_default();
        members.insert(viewer.id, viewer.tx.clone()).is_none()
    }

    /// Remove a viewer from one topic. The topic itself is kept.
    pub fn leave(&self, match_id: &str, id: ConnectionId) -> bool {
        self.topics
            .get(match_id)
            .map(|members| members.remove(&id).is_some())
            .unwrap_or(false)
    }

    /// Remove a viewer from every topic it joined. Returns how many topics it
    /// left.
    pub fn leave_all(&self, id: ConnectionId) -> usize {
        self.topics
            .iter()
            .filter(|topic| topic.value().remove(&id).is_some())
            .count()
    }

    /// Queue `envelope` for every current member of the topic. Returns the
    /// number of viewers it was queued for.
    pub fn publish(&self, match_id: &str, envelope: Envelope) -> usize {
        let Some(members) = self.topics.get(match_id) else {
            debug!("Publish to {}: no topic", match_id);
            return 0;
        };

        let envelope = Arc::new(envelope);
        let mut delivered = 0;
        let mut closed = Vec::new();

        for member in members.iter() {
            match member.value().try_send(Arc::clone(&envelope)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!("Viewer {} queue full, dropping update for {}", member.key(), match_id);
                }
                Err(TrySendError::Closed(_)) => closed.push(*member.key()),
            }
        }

        // Viewers that went away between lookup and delivery
        for id in closed {
            members.remove(&id);
        }

        debug!("Published to {}: {} viewer(s)", match_id, delivered);
        delivered
    }

    #[cfg(test)]
    pub fn member_count(&self, match_id: &str) -> usize {
        self.topics.get(match_id).map(|m| m.len()).unwrap_or(0)
    }

    /// Number of topics ever created.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Total memberships across all topics.
    pub fn membership_count(&self) -> usize {
        self.topics.iter().map(|t| t.value().len()).sum()
    }
}
