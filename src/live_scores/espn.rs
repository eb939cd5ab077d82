use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::provider::{SourceProbe, StateSource};
use crate::error::SourceError;
use crate::models::{CricketLine, CricketState, FootballLine, FootballState, MatchState, Sport};

pub const DEFAULT_FOOTBALL_URL: &str =
    "https://site.api.espn.com/apis/site/v2/sports/football/college-football/scoreboard";
pub const DEFAULT_CRICKET_URL: &str =
    "https://site.api.espn.com/apis/site/v2/sports/cricket/scoreboard";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// State source backed by ESPN's public scoreboard API (no key needed).
///
/// Only the first event's first competition is used; ESPN has no notion of
/// our viewer-chosen match ids.
pub struct EspnScoreboard {
    http: Client,
    football_url: String,
    cricket_url: String,
}

impl EspnScoreboard {
    pub fn new(football_url: &str, cricket_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(EspnScoreboard {
            http,
            football_url: football_url.to_string(),
            cricket_url: cricket_url.to_string(),
        })
    }

    fn url_for(&self, sport: Sport) -> &str {
        match sport {
            Sport::Football => &self.football_url,
            Sport::Cricket => &self.cricket_url,
        }
    }

    async fn fetch_scoreboard(&self, sport: Sport) -> Result<Value, SourceError> {
        let url = self.url_for(sport);
        debug!("Fetching {} scoreboard from {}", sport, url);

        let resp = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SourceError::Status(resp.status()));
        }

        let body = resp.bytes().await?;
        let raw: Value = serde_json::from_slice(&body)
            .map_err(|e| SourceError::Malformed(format!("invalid JSON: {}", e)))?;

        debug!(
            "{} scoreboard: {} events",
            sport,
            raw["events"].as_array().map(|a| a.len()).unwrap_or(0)
        );
        Ok(raw)
    }
}

#[async_trait]
impl StateSource for EspnScoreboard {
    fn name(&self) -> &str {
        "ESPN"
    }

    async fn fetch_state(&self, match_id: &str, sport: Sport) -> Result<MatchState, SourceError> {
        let raw = self.fetch_scoreboard(sport).await?;
        let state = normalize(sport, &raw, Utc::now())?;
        debug!(
            "Normalized {} state for {}: {} vs {}",
            sport,
            match_id,
            state.teams()[0],
            state.teams()[1]
        );
        Ok(state)
    }

    async fn probe(&self, sport: Sport) -> Result<SourceProbe, SourceError> {
        let raw = self.fetch_scoreboard(sport).await?;
        let events_count = raw["events"].as_array().map(|a| a.len()).unwrap_or(0);
        let sample_keys = raw
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        Ok(SourceProbe {
            sport,
            events_count,
            has_data: events_count > 0,
            sample_keys,
        })
    }
}

/// Convert a raw ESPN scoreboard payload into our internal state.
pub fn normalize(sport: Sport, raw: &Value, now: DateTime<Utc>) -> Result<MatchState, SourceError> {
    match sport {
        Sport::Football => normalize_football(raw, now),
        Sport::Cricket => normalize_cricket(raw, now),
    }
}

/// Pull the first competition and its first two competitors out of a
/// scoreboard payload.
fn first_competition(raw: &Value) -> Result<(&Value, &Value, &Value), SourceError> {
    let events = raw
        .get("events")
        .and_then(|e| e.as_array())
        .ok_or_else(|| SourceError::Malformed("'events' key not found".into()))?;

    let event = events.first().ok_or(SourceError::NoEvents)?;

    let comp = event
        .get("competitions")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| SourceError::Malformed("no competitions found in event".into()))?;

    let competitors = comp
        .get("competitors")
        .and_then(|c| c.as_array())
        .ok_or_else(|| SourceError::Malformed("no competitors found in competition".into()))?;

    match competitors.as_slice() {
        [a, b, ..] => Ok((comp, a, b)),
        other => Err(SourceError::Malformed(format!(
            "not enough teams found ({} teams)",
            other.len()
        ))),
    }
}

fn team_name(competitor: &Value) -> Result<String, SourceError> {
    competitor["team"]["displayName"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| SourceError::Malformed("missing team displayName".into()))
}

fn status_description(comp: &Value) -> String {
    comp["status"]["type"]["description"]
        .as_str()
        .unwrap_or("Unknown")
        .to_string()
}

/// ESPN mixes numbers and numeric strings for the same field.
fn as_u32(v: &Value) -> Option<u32> {
    v.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u32))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn normalize_football(raw: &Value, now: DateTime<Utc>) -> Result<MatchState, SourceError> {
    let (comp, a, b) = first_competition(raw)?;
    let teams = [team_name(a)?, team_name(b)?];

    let mut by_team = BTreeMap::new();
    for (name, competitor) in teams.iter().zip([a, b]) {
        by_team.insert(
            name.clone(),
            FootballLine {
                score: as_u32(&competitor["score"]).unwrap_or(0),
                possession: possession(competitor),
            },
        );
    }

    Ok(MatchState::Football(FootballState {
        last_updated: now,
        teams,
        by_team,
        status: status_description(comp),
    }))
}

/// Possession from the team statistics; falls back to the first statistic's
/// display value, then "0%".
fn possession(competitor: &Value) -> String {
    let Some(stats) = competitor["statistics"].as_array().filter(|s| !s.is_empty()) else {
        return "0%".to_string();
    };
    stats
        .iter()
        .find(|s| matches!(s["name"].as_str(), Some("possession") | Some("timeOfPossession")))
        .or_else(|| stats.first())
        .and_then(|s| s["displayValue"].as_str())
        .unwrap_or("0%")
        .to_string()
}

fn normalize_cricket(raw: &Value, now: DateTime<Utc>) -> Result<MatchState, SourceError> {
    let (comp, a, b) = first_competition(raw)?;
    let teams = [team_name(a)?, team_name(b)?];

    let mut by_team = BTreeMap::new();
    for (name, competitor) in teams.iter().zip([a, b]) {
        by_team.insert(name.clone(), innings_line(competitor));
    }

    Ok(MatchState::Cricket(CricketState {
        last_updated: now,
        teams,
        by_team,
        status: status_description(comp),
    }))
}

/// Build a cricket line from the competitor's score string, then let
/// `linescores` and finally `statistics` entries override it.
fn innings_line(competitor: &Value) -> CricketLine {
    let mut line = CricketLine {
        runs: 0,
        wickets: 0,
        overs: "0.0".to_string(),
    };

    match &competitor["score"] {
        Value::String(s) => {
            let (runs, wickets, overs) = parse_cricket_score(s);
            line.runs = runs.unwrap_or(0);
            line.wickets = wickets.unwrap_or(0);
            if let Some(overs) = overs {
                line.overs = overs;
            }
        }
        other => line.runs = as_u32(other).unwrap_or(0),
    }

    for source in ["linescores", "statistics"] {
        let Some(entries) = competitor[source].as_array() else {
            continue;
        };
        for entry in entries {
            let name = entry["name"].as_str().unwrap_or("").to_lowercase();
            if name.contains("run") || name.contains("score") {
                if let Some(runs) = as_u32(&entry["value"]) {
                    line.runs = runs;
                }
            } else if name.contains("wicket") {
                if let Some(wickets) = as_u32(&entry["value"]) {
                    line.wickets = wickets;
                }
            } else if name.contains("over") {
                let display = entry["displayValue"]
                    .as_str()
                    .map(|s| s.to_string())
                    .filter(|s| !s.is_empty())
                    .or_else(|| entry["value"].as_f64().map(|v| v.to_string()));
                if let Some(overs) = display {
                    line.overs = overs;
                }
            }
        }
    }

    line
}

/// Parse score strings like "145/3", "145/3 (19.4 ov)" or "212".
fn parse_cricket_score(s: &str) -> (Option<u32>, Option<u32>, Option<String>) {
    let leading_number = |t: &str| -> Option<u32> {
        let digits: String = t.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    };

    let (head, tail) = match s.split_once('(') {
        Some((h, t)) => (h, Some(t)),
        None => (s, None),
    };

    let (runs, wickets) = match head.split_once('/') {
        Some((r, w)) => (leading_number(r), leading_number(w)),
        None => (leading_number(head), None),
    };

    let overs = tail.and_then(|t| {
        let inner = t.split(')').next()?.trim();
        let inner = inner.strip_suffix("ov").unwrap_or(inner).trim();
        // "19.4/20" → "19.4"
        let overs = inner.split('/').next()?.trim();
        (!overs.is_empty()).then(|| overs.to_string())
    });

    (runs, wickets, overs)
}
