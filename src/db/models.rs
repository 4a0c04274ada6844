use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A pollable competition: league id plus season year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub league: i64,
    pub season: i32,
}

impl ResourceKey {
    pub fn new(league: i64, season: i32) -> Self {
        ResourceKey { league, season }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.league, self.season)
    }
}

impl FromStr for ResourceKey {
    type Err = anyhow::Error;

    /// Parses `LEAGUE:SEASON`, e.g. `39:2024`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (league, season) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("expected LEAGUE:SEASON, got '{}'", s))?;
        Ok(ResourceKey {
            league: league.trim().parse()?,
            season: season.trim().parse()?,
        })
    }
}

/// No authoritative end time exists; a match is assumed over this long after
/// kickoff.
pub const ESTIMATED_MATCH_MINUTES: i64 = 120;

/// Upstream status: short code ("1H", "HT", "FT"...), long description and
/// elapsed minutes as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureStatus {
    pub short: String,
    pub long: String,
    pub elapsed: Option<i32>,
}

impl FixtureStatus {
    /// Match is underway (including breaks such as half time).
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self.short.as_str(),
            "1H" | "HT" | "2H" | "ET" | "BT" | "P" | "SUSP" | "INT" | "LIVE"
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.short.as_str(),
            "FT" | "AET" | "PEN" | "PST" | "CANC" | "ABD" | "AWD" | "WO"
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub logo: Option<String>,
}

/// An atomic in-match happening: goal, card, substitution or VAR review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub elapsed: i32,
    pub extra: Option<i32>,
    /// Provider type string: "Goal", "Card", "subst", "Var"
    #[serde(rename = "type")]
    pub kind: String,
    /// e.g. "Normal Goal", "Yellow Card", "Missed Penalty"
    pub detail: String,
    pub actor_id: Option<i64>,
    pub actor: Option<String>,
    pub assist: Option<String>,
    pub team_id: Option<i64>,
    pub team: Option<String>,
    pub comments: Option<String>,
}

/// Identity of an occurrence. Only these fields take part in change detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OccurrenceId {
    pub elapsed: i32,
    pub extra: Option<i32>,
    pub kind: String,
    pub detail: String,
    pub actor_id: Option<i64>,
}

impl Occurrence {
    pub fn identity(&self) -> OccurrenceId {
        OccurrenceId {
            elapsed: self.elapsed,
            extra: self.extra,
            kind: self.kind.to_lowercase(),
            detail: self.detail.to_lowercase(),
            actor_id: self.actor_id,
        }
    }

    /// Match-clock ordering key (regular minute, then stoppage minute).
    pub fn clock(&self) -> (i32, i32) {
        (self.elapsed, self.extra.unwrap_or(0))
    }
}

/// Raw fixture state as fetched from the upstream provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureObservation {
    pub fixture_id: i64,
    pub key: ResourceKey,
    pub kickoff: DateTime<Utc>,
    pub venue: Option<String>,
    pub round: Option<String>,
    pub home: Team,
    pub away: Team,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub status: FixtureStatus,
    /// Occurrences embedded in the response; empty when the provider did not
    /// include them.
    pub occurrences: Vec<Occurrence>,
}

/// Fixture summary carried on every outbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureSummary {
    pub fixture_id: i64,
    pub kickoff: DateTime<Utc>,
    pub round: Option<String>,
    pub home_team: String,
    pub away_team: String,
    pub home_logo: Option<String>,
    pub away_logo: Option<String>,
    pub home_score: i32,
    pub away_score: i32,
    pub status: String,
    pub status_long: String,
    pub elapsed: Option<i32>,
}

impl From<&FixtureObservation> for FixtureSummary {
    fn from(obs: &FixtureObservation) -> Self {
        FixtureSummary {
            fixture_id: obs.fixture_id,
            kickoff: obs.kickoff,
            round: obs.round.clone(),
            home_team: obs.home.name.clone(),
            away_team: obs.away.name.clone(),
            home_logo: obs.home.logo.clone(),
            away_logo: obs.away.logo.clone(),
            home_score: obs.home_score.unwrap_or(0),
            away_score: obs.away_score.unwrap_or(0),
            status: obs.status.short.clone(),
            status_long: obs.status.long.clone(),
            elapsed: obs.status.elapsed,
        }
    }
}

/// Closed set of event classifications delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MatchStarted,
    Goal,
    MissedPenalty,
    RedCard,
    YellowCard,
    Card,
    Substitution,
    Var,
    StatusUpdate,
    TimeUpdate,
    MatchFinished,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MatchStarted => "match_started",
            EventKind::Goal => "goal",
            EventKind::MissedPenalty => "missed_penalty",
            EventKind::RedCard => "red_card",
            EventKind::YellowCard => "yellow_card",
            EventKind::Card => "card",
            EventKind::Substitution => "substitution",
            EventKind::Var => "var",
            EventKind::StatusUpdate => "status_update",
            EventKind::TimeUpdate => "time_update",
            EventKind::MatchFinished => "match_finished",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified change for one fixture. Produced once per poll cycle and
/// shared (behind an `Arc`) by every subscriber it is delivered to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub resource_key: ResourceKey,
    pub fixture_id: i64,
    pub occurred_at: DateTime<Utc>,
    pub kind: EventKind,
    pub fixture: FixtureSummary,
    /// Every occurrence observed so far this match, in match-clock order
    pub occurrences: Vec<Occurrence>,
    /// The occurrence that triggered this event, if any
    pub newest_occurrence: Option<Occurrence>,
}

/// One row of a league table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingRow {
    pub rank: i32,
    pub team_id: i64,
    pub team: String,
    pub points: i32,
    pub played: i32,
    pub won: i32,
    pub drawn: i32,
    pub lost: i32,
    pub goals_for: i32,
    pub goals_against: i32,
    pub goal_diff: i32,
    pub form: Option<String>,
    pub group: Option<String>,
}

/// Persisted fixture record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFixture {
    pub fixture_id: i64,
    pub league: i64,
    pub season: i32,
    pub kickoff: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub status_short: String,
    pub status_long: String,
    pub elapsed: Option<i32>,
    pub updated_at: DateTime<Utc>,
}
