use clap::Parser;
use std::time::Duration;

use crate::live_scores::espn::{DEFAULT_CRICKET_URL, DEFAULT_FOOTBALL_URL};
use crate::models::Sport;
use crate::relay::PollSettings;

/// Live match state relay over WebSockets
#[derive(Parser, Debug, Clone)]
#[command(name = "matchcast", version, about)]
pub struct Config {
    /// HTTP / WebSocket listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:5000")]
    pub listen_addr: String,

    /// Seconds between poll iterations for one match
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "10")]
    pub poll_interval_secs: u64,

    /// Upper bound on a single upstream fetch, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "10")]
    pub fetch_timeout_secs: u64,

    /// Delay before a new worker's first poll, in milliseconds
    #[arg(long, env = "INITIAL_DELAY_MS", default_value = "1000")]
    pub initial_delay_ms: u64,

    /// Sport assumed when a subscribe request omits it
    #[arg(long, env = "DEFAULT_SPORT", value_enum, default_value = "football")]
    pub default_sport: Sport,

    /// Per-connection outbound queue length; updates beyond it are dropped
    #[arg(long, env = "VIEWER_BUFFER", default_value = "64")]
    pub viewer_buffer: usize,

    /// ESPN football scoreboard URL
    #[arg(long, env = "ESPN_FOOTBALL_URL", default_value = DEFAULT_FOOTBALL_URL)]
    pub espn_football_url: String,

    /// ESPN cricket scoreboard URL
    #[arg(long, env = "ESPN_CRICKET_URL", default_value = DEFAULT_CRICKET_URL)]
    pub espn_cricket_url: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be greater than zero");
        }
        if self.viewer_buffer == 0 {
            anyhow::bail!("viewer_buffer must be greater than zero");
        }
        for (name, raw) in [
            ("espn_football_url", &self.espn_football_url),
            ("espn_cricket_url", &self.espn_cricket_url),
        ] {
            if let Err(e) = url::Url::parse(raw) {
                anyhow::bail!("{} is not a valid URL ({}): {}", name, e, raw);
            }
        }
        Ok(())
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
        }
    }
}
