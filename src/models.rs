use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownSport;

/// Sports the relay knows how to fetch and normalize.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Football,
    Cricket,
}

impl Sport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::Football => "football",
            Sport::Cricket => "cricket",
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sport {
    type Err = UnknownSport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "football" => Ok(Sport::Football),
            "cricket" => Ok(Sport::Cricket),
            _ => Err(UnknownSport(s.to_string())),
        }
    }
}

/// Deduplication unit for background polling: one worker per (match, sport).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PollKey {
    pub match_id: String,
    pub sport: Sport,
}

impl PollKey {
    pub fn new(match_id: impl Into<String>, sport: Sport) -> Self {
        PollKey {
            match_id: match_id.into(),
            sport,
        }
    }
}

impl fmt::Display for PollKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.match_id, self.sport)
    }
}

/// Normalized snapshot of a match. Every refresh yields a full replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sport", rename_all = "lowercase")]
pub enum MatchState {
    Football(FootballState),
    Cricket(CricketState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootballState {
    pub last_updated: DateTime<Utc>,
    /// Ordered as the source lists them
    pub teams: [String; 2],
    /// team name → metrics
    pub by_team: BTreeMap<String, FootballLine>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootballLine {
    pub score: u32,
    /// Display value as reported upstream, e.g. "54%"
    pub possession: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CricketState {
    pub last_updated: DateTime<Utc>,
    pub teams: [String; 2],
    pub by_team: BTreeMap<String, CricketLine>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CricketLine {
    pub runs: u32,
    pub wickets: u32,
    /// Overs bowled in "overs.balls" notation, e.g. "19.4"
    pub overs: String,
}

impl MatchState {
    pub fn sport(&self) -> Sport {
        match self {
            MatchState::Football(_) => Sport::Football,
            MatchState::Cricket(_) => Sport::Cricket,
        }
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        match self {
            MatchState::Football(s) => s.last_updated,
            MatchState::Cricket(s) => s.last_updated,
        }
    }

    pub fn teams(&self) -> &[String; 2] {
        match self {
            MatchState::Football(s) => &s.teams,
            MatchState::Cricket(s) => &s.teams,
        }
    }

    pub fn status(&self) -> &str {
        match self {
            MatchState::Football(s) => &s.status,
            MatchState::Cricket(s) => &s.status,
        }
    }

    /// Derive the per-sport statistics block sent alongside the raw state.
    pub fn stats(&self) -> MatchStats {
        match self {
            MatchState::Football(s) => MatchStats::Football(football_stats(s)),
            MatchState::Cricket(s) => MatchStats::Cricket(cricket_stats(s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MatchStats {
    Football(FootballStats),
    Cricket(CricketStats),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FootballStats {
    pub possession: BTreeMap<String, String>,
    /// Team ahead on score, `None` while level
    pub leader: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CricketStats {
    pub wickets: BTreeMap<String, u32>,
    /// Runs per over, only for teams that have faced at least one ball
    pub run_rate: BTreeMap<String, f64>,
    /// "<team> <runs>/<wickets> (<overs> ov)" in team order
    pub innings: Vec<String>,
}

fn football_stats(state: &FootballState) -> FootballStats {
    let possession = state
        .by_team
        .iter()
        .map(|(team, line)| (team.clone(), line.possession.clone()))
        .collect();

    let score_of = |team: &str| state.by_team.get(team).map(|l| l.score).unwrap_or(0);
    let [a, b] = &state.teams;
    let leader = match score_of(a).cmp(&score_of(b)) {
        std::cmp::Ordering::Greater => Some(a.clone()),
        std::cmp::Ordering::Less => Some(b.clone()),
        std::cmp::Ordering::Equal => None,
    };

    FootballStats { possession, leader }
}

fn cricket_stats(state: &CricketState) -> CricketStats {
    let mut wickets = BTreeMap::new();
    let mut run_rate = BTreeMap::new();
    let mut innings = Vec::with_capacity(2);

    for team in &state.teams {
        let Some(line) = state.by_team.get(team) else {
            continue;
        };
        wickets.insert(team.clone(), line.wickets);
        if let Some(overs) = overs_to_decimal(&line.overs).filter(|o| *o > 0.0) {
            run_rate.insert(team.clone(), line.runs as f64 / overs);
        }
        innings.push(format!(
            "{} {}/{} ({} ov)",
            team, line.runs, line.wickets, line.overs
        ));
    }

    CricketStats {
        wickets,
        run_rate,
        innings,
    }
}

/// Convert cricket "overs.balls" notation to decimal overs.
/// "12.3" → 12.5, "20" → 20.0. Returns `None` for anything unparseable or
/// for a ball count outside 0..=5.
pub fn overs_to_decimal(overs: &str) -> Option<f64> {
    let overs = overs.trim();
    let (whole, balls) = match overs.split_once('.') {
        Some((w, b)) => (w, b),
        None => (overs, "0"),
    };
    let whole: u32 = whole.parse().ok()?;
    let balls: u32 = balls.parse().ok()?;
    if balls > 5 {
        return None;
    }
    Some(whole as f64 + balls as f64 / 6.0)
}

/// Message delivered to every viewer on a match topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Update(MatchUpdate),
    NoData(NoDataNotice),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchUpdate {
    pub id: String,
    pub sport: Sport,
    pub raw: MatchState,
    pub stats: MatchStats,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoDataNotice {
    pub info: String,
    pub id: String,
    pub sport: Sport,
}

impl Envelope {
    pub fn update(match_id: &str, state: &MatchState) -> Self {
        Envelope::Update(MatchUpdate {
            id: match_id.to_string(),
            sport: state.sport(),
            raw: state.clone(),
            stats: state.stats(),
            last_updated: state.last_updated(),
        })
    }

    pub fn no_data(key: &PollKey, info: impl Into<String>) -> Self {
        Envelope::NoData(NoDataNotice {
            info: info.into(),
            id: key.match_id.clone(),
            sport: key.sport,
        })
    }

    pub fn match_id(&self) -> &str {
        match self {
            Envelope::Update(u) => &u.id,
            Envelope::NoData(n) => &n.id,
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Envelope::Update(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn football(home: u32, away: u32) -> MatchState {
        let mut by_team = BTreeMap::new();
        by_team.insert(
            "Arsenal".to_string(),
            FootballLine {
                score: home,
                possession: "58%".into(),
            },
        );
        by_team.insert(
            "Chelsea".to_string(),
            FootballLine {
                score: away,
                possession: "42%".into(),
            },
        );
        MatchState::Football(FootballState {
            last_updated: Utc::now(),
            teams: ["Arsenal".into(), "Chelsea".into()],
            by_team,
            status: "In Progress".into(),
        })
    }

    fn cricket() -> MatchState {
        let mut by_team = BTreeMap::new();
        by_team.insert(
            "India".to_string(),
            CricketLine {
                runs: 145,
                wickets: 3,
                overs: "20.0".into(),
            },
        );
        by_team.insert(
            "Australia".to_string(),
            CricketLine {
                runs: 0,
                wickets: 0,
                overs: "0.0".into(),
            },
        );
        MatchState::Cricket(CricketState {
            last_updated: Utc::now(),
            teams: ["India".into(), "Australia".into()],
            by_team,
            status: "First Innings".into(),
        })
    }

    #[test]
    fn test_sport_parse_is_case_insensitive() {
        assert_eq!("Cricket".parse::<Sport>().unwrap(), Sport::Cricket);
        assert_eq!(" football ".parse::<Sport>().unwrap(), Sport::Football);
        assert!("curling".parse::<Sport>().is_err());
    }

    #[test]
    fn test_poll_key_display() {
        assert_eq!(PollKey::new("m1", Sport::Football).to_string(), "m1:football");
    }

    #[test]
    fn test_overs_to_decimal() {
        assert_relative_eq!(overs_to_decimal("12.3").unwrap(), 12.5);
        assert_relative_eq!(overs_to_decimal("20").unwrap(), 20.0);
        assert!(overs_to_decimal("4.7").is_none());
        assert!(overs_to_decimal("").is_none());
    }

    #[test]
    fn test_football_leader() {
        match football(2, 1).stats() {
            MatchStats::Football(s) => {
                assert_eq!(s.leader.as_deref(), Some("Arsenal"));
                assert_eq!(s.possession["Chelsea"], "42%");
            }
            other => panic!("unexpected stats {:?}", other),
        }
        match football(1, 1).stats() {
            MatchStats::Football(s) => assert!(s.leader.is_none()),
            other => panic!("unexpected stats {:?}", other),
        }
    }

    #[test]
    fn test_cricket_stats_skip_run_rate_before_first_ball() {
        let MatchStats::Cricket(s) = cricket().stats() else {
            panic!("expected cricket stats");
        };
        assert_relative_eq!(s.run_rate["India"], 7.25);
        assert!(!s.run_rate.contains_key("Australia"));
        assert_eq!(s.wickets["India"], 3);
        assert_eq!(s.innings[0], "India 145/3 (20.0 ov)");
        assert_eq!(s.innings[1], "Australia 0/0 (0.0 ov)");
    }

    #[test]
    fn test_update_envelope_wire_shape() {
        let state = football(1, 0);
        let json = serde_json::to_value(Envelope::update("m1", &state)).unwrap();
        assert_eq!(json["id"], "m1");
        assert_eq!(json["sport"], "football");
        assert_eq!(json["raw"]["sport"], "football");
        assert_eq!(json["raw"]["teams"][0], "Arsenal");
        assert_eq!(json["stats"]["leader"], "Arsenal");
        assert_eq!(json["last_updated"], json["raw"]["last_updated"]);
    }

    #[test]
    fn test_no_data_envelope_wire_shape() {
        let key = PollKey::new("m2", Sport::Cricket);
        let json = serde_json::to_value(Envelope::no_data(&key, "nothing yet")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"info": "nothing yet", "id": "m2", "sport": "cricket"})
        );
    }

    #[test]
    fn test_match_state_round_trips_through_json() {
        let state = cricket();
        let json = serde_json::to_string(&state).unwrap();
        let back: MatchState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
