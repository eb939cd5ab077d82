use std::time::Duration;
use thiserror::Error;

/// Everything that can keep a state source from producing a usable snapshot.
///
/// The relay folds all of these into "no data"; the variants only matter for
/// log levels and the informational text shown to viewers.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("no events currently available")]
    NoEvents,

    #[error("iteration panicked")]
    Panicked,
}

impl SourceError {
    /// An empty result set is a normal outcome, not a failure.
    pub fn is_expected(&self) -> bool {
        matches!(self, SourceError::NoEvents)
    }

    /// Text for the `info` field of a no-data envelope.
    pub fn viewer_message(&self) -> String {
        match self {
            SourceError::NoEvents => {
                "No active matches found. Waiting for matches to become available...".to_string()
            }
            other => format!("Error fetching match data: {}", other),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown sport '{0}' (expected football or cricket)")]
pub struct UnknownSport(pub String);
