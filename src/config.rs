use clap::Parser;
use std::time::Duration;

use crate::db::models::ResourceKey;
use crate::hub::{OverflowPolicy, PollSettings, SinkSettings};
use crate::standings::StandingsSettings;

/// Live football fixture relay
#[derive(Parser, Debug, Clone)]
#[command(name = "matchday-relay", version, about)]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "matchday.db")]
    pub database_path: String,

    /// API-Football base URL
    #[arg(
        long,
        env = "API_FOOTBALL_URL",
        default_value = "https://v3.football.api-sports.io"
    )]
    pub api_football_url: String,

    /// API-Football key (required unless --offline)
    #[arg(long, env = "API_FOOTBALL_KEY")]
    pub api_football_key: Option<String>,

    /// Run without an upstream key; upstream calls fail and are retried
    #[arg(long, env = "OFFLINE", default_value = "false")]
    pub offline: bool,

    /// Poll interval while fixtures are live, in seconds
    #[arg(long, env = "ACTIVE_INTERVAL_SECS", default_value = "15")]
    pub active_interval_secs: u64,

    /// Minimum seconds between "next fixture" lookups while idle
    #[arg(long, env = "NEXT_FIXTURE_REFRESH_SECS", default_value = "300")]
    pub next_fixture_refresh_secs: u64,

    /// Seconds between season schedule syncs
    #[arg(long, env = "SCHEDULE_REFRESH_SECS", default_value = "21600")]
    pub schedule_refresh_secs: u64,

    /// Per-subscriber event queue capacity
    #[arg(long, env = "SUBSCRIBER_QUEUE_CAPACITY", default_value = "256")]
    pub subscriber_queue_capacity: usize,

    /// What to do when a subscriber's queue is full
    #[arg(long, env = "OVERFLOW_POLICY", value_enum, default_value = "drop-event")]
    pub overflow_policy: OverflowPolicy,

    /// Standings cache TTL while matches are in progress, in seconds
    #[arg(long, env = "STANDINGS_LIVE_TTL_SECS", default_value = "60")]
    pub standings_live_ttl_secs: u64,

    /// Standings cache TTL otherwise, in seconds
    #[arg(long, env = "STANDINGS_IDLE_TTL_SECS", default_value = "3600")]
    pub standings_idle_ttl_secs: u64,

    /// Standings refresh interval while matches are in progress, in seconds
    #[arg(long, env = "STANDINGS_LIVE_REFRESH_SECS", default_value = "120")]
    pub standings_live_refresh_secs: u64,

    /// Competitions to reconcile standings for from startup (LEAGUE:SEASON)
    #[arg(long = "reconcile", env = "RECONCILE", value_delimiter = ',')]
    pub reconcile: Vec<ResourceKey>,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.offline && self.api_football_key.is_none() {
            anyhow::bail!("API_FOOTBALL_KEY is required. Use --offline to run without upstream access.");
        }
        if self.active_interval_secs == 0 {
            anyhow::bail!("active_interval_secs must be positive");
        }
        if self.next_fixture_refresh_secs == 0 || self.schedule_refresh_secs == 0 {
            anyhow::bail!("refresh intervals must be positive");
        }
        if self.subscriber_queue_capacity == 0 {
            anyhow::bail!("subscriber_queue_capacity must be positive");
        }
        if self.standings_live_refresh_secs == 0 {
            anyhow::bail!("standings_live_refresh_secs must be positive");
        }
        if self.standings_live_ttl_secs > self.standings_idle_ttl_secs {
            anyhow::bail!("standings_live_ttl_secs must not exceed standings_idle_ttl_secs");
        }
        Ok(())
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            active_interval: Duration::from_secs(self.active_interval_secs),
            next_fixture_refresh: Duration::from_secs(self.next_fixture_refresh_secs),
            schedule_refresh: Duration::from_secs(self.schedule_refresh_secs),
        }
    }

    pub fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            capacity: self.subscriber_queue_capacity,
            overflow: self.overflow_policy,
        }
    }

    pub fn standings_settings(&self) -> StandingsSettings {
        StandingsSettings {
            live_ttl: Duration::from_secs(self.standings_live_ttl_secs),
            idle_ttl: Duration::from_secs(self.standings_idle_ttl_secs),
            live_refresh: Duration::from_secs(self.standings_live_refresh_secs),
        }
    }
}
