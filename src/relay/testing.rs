//! Scriptable in-process state source for relay tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{PollSettings, Relay};
use crate::error::SourceError;
use crate::live_scores::{SourceProbe, StateSource};
use crate::models::{CricketLine, CricketState, FootballLine, FootballState, MatchState, Sport};

#[derive(Debug, Clone, Copy)]
pub(crate) enum Mode {
    Ok,
    NoEvents,
    Fail,
    Panic,
}

pub(crate) struct FakeSource {
    mode: Mutex<Mode>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: AtomicUsize,
    calls_by_match: Mutex<HashMap<String, usize>>,
}

impl FakeSource {
    pub(crate) fn new(mode: Mode) -> Arc<Self> {
        Arc::new(FakeSource {
            mode: Mutex::new(mode),
            delays: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            calls_by_match: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Make every fetch for `match_id` sleep for `delay` first.
    pub(crate) fn slow_down(&self, match_id: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(match_id.to_string(), delay);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn calls_for(&self, match_id: &str) -> usize {
        self.calls_by_match
            .lock()
            .unwrap()
            .get(match_id)
            .copied()
            .unwrap_or(0)
    }
}

/// A snapshot whose first team's score equals `score`, so successive fetches
/// are distinguishable.
pub(crate) fn sample_state(sport: Sport, score: u32) -> MatchState {
    match sport {
        Sport::Football => {
            let mut by_team = BTreeMap::new();
            by_team.insert(
                "Home".to_string(),
                FootballLine {
                    score,
                    possession: "50%".into(),
                },
            );
            by_team.insert(
                "Away".to_string(),
                FootballLine {
                    score: 0,
                    possession: "50%".into(),
                },
            );
            MatchState::Football(FootballState {
                last_updated: Utc::now(),
                teams: ["Home".into(), "Away".into()],
                by_team,
                status: "In Progress".into(),
            })
        }
        Sport::Cricket => {
            let mut by_team = BTreeMap::new();
            by_team.insert(
                "Home".to_string(),
                CricketLine {
                    runs: score,
                    wickets: 1,
                    overs: "5.0".into(),
                },
            );
            by_team.insert(
                "Away".to_string(),
                CricketLine {
                    runs: 0,
                    wickets: 0,
                    overs: "0.0".into(),
                },
            );
            MatchState::Cricket(CricketState {
                last_updated: Utc::now(),
                teams: ["Home".into(), "Away".into()],
                by_team,
                status: "First Innings".into(),
            })
        }
    }
}

#[async_trait]
impl StateSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_state(&self, match_id: &str, sport: Sport) -> Result<MatchState, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .calls_by_match
            .lock()
            .unwrap()
            .entry(match_id.to_string())
            .or_insert(0) += 1;

        let delay = self.delays.lock().unwrap().get(match_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mode = *self.mode.lock().unwrap();
        match mode {
            Mode::Ok => Ok(sample_state(sport, call as u32)),
            Mode::NoEvents => Err(SourceError::NoEvents),
            Mode::Fail => Err(SourceError::Malformed("fake failure".into())),
            Mode::Panic => panic!("fake source panicked"),
        }
    }

    async fn probe(&self, sport: Sport) -> Result<SourceProbe, SourceError> {
        let mode = *self.mode.lock().unwrap();
        match mode {
            Mode::Fail => return Err(SourceError::Status(reqwest::StatusCode::BAD_GATEWAY)),
            Mode::NoEvents => {
                return Ok(SourceProbe {
                    sport,
                    events_count: 0,
                    has_data: false,
                    sample_keys: vec!["events".into()],
                })
            }
            Mode::Ok | Mode::Panic => {}
        }
        Ok(SourceProbe {
            sport,
            events_count: 1,
            has_data: true,
            sample_keys: vec!["events".into()],
        })
    }
}

pub(crate) fn test_relay(source: Arc<FakeSource>) -> Relay {
    Relay::new(source, PollSettings::default())
}
