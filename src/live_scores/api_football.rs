use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::provider::{FixtureProvider, ProviderError};
use crate::db::models::{
    FixtureObservation, FixtureStatus, Occurrence, ResourceKey, StandingRow, Team,
};

/// Fixture provider backed by the API-Football v3 REST API.
/// Docs: <https://www.api-football.com/documentation-v3>
pub struct ApiFootball {
    http: Client,
    api_key: Option<String>,
    /// Base URL for overriding in tests
    base_url: Url,
}

impl ApiFootball {
    pub fn new(api_key: Option<&str>, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        Ok(ApiFootball {
            http,
            api_key: api_key.map(str::to_string),
            base_url: Url::parse(&base).context("Invalid API-Football base URL")?,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.base_url.join(path)?;
        debug!("GET {} {:?}", url, query);

        let mut req = self.http.get(url).query(query);
        if let Some(key) = &self.api_key {
            req = req.header("x-apisports-key", key);
        }
        let resp = req.send().await.context("API-Football request failed")?;

        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(ProviderError::RateLimited.into()),
            s if !s.is_success() => return Err(ProviderError::Http(s).into()),
            _ => {}
        }

        let raw: Value = resp
            .json()
            .await
            .context("Failed to parse API-Football response")?;
        check_api_errors(&raw)?;
        Ok(raw)
    }
}

#[async_trait]
impl FixtureProvider for ApiFootball {
    fn name(&self) -> &str {
        "API-Football"
    }

    async fn fetch_live_observations(&self, key: ResourceKey) -> Result<Vec<FixtureObservation>> {
        let raw = self
            .get(
                "fixtures",
                &[
                    ("live", "all".to_string()),
                    ("league", key.league.to_string()),
                    ("season", key.season.to_string()),
                ],
            )
            .await?;
        Ok(parse_fixtures_response(&raw, key))
    }

    async fn fetch_fixture_by_id(&self, fixture_id: i64) -> Result<FixtureObservation> {
        let raw = self
            .get("fixtures", &[("id", fixture_id.to_string())])
            .await?;
        raw["response"]
            .as_array()
            .and_then(|items| items.first())
            .and_then(|item| parse_fixture(item, None))
            .ok_or_else(|| {
                ProviderError::Decode(format!("fixture {} missing from response", fixture_id))
                    .into()
            })
    }

    async fn fetch_occurrences(&self, fixture_id: i64) -> Result<Vec<Occurrence>> {
        let raw = self
            .get("fixtures/events", &[("fixture", fixture_id.to_string())])
            .await?;
        Ok(parse_occurrences(&raw["response"]))
    }

    async fn fetch_season_fixtures(&self, key: ResourceKey) -> Result<Vec<FixtureObservation>> {
        let raw = self
            .get(
                "fixtures",
                &[
                    ("league", key.league.to_string()),
                    ("season", key.season.to_string()),
                ],
            )
            .await?;
        Ok(parse_fixtures_response(&raw, key))
    }

    async fn fetch_standings(&self, key: ResourceKey) -> Result<Vec<StandingRow>> {
        let raw = self
            .get(
                "standings",
                &[
                    ("league", key.league.to_string()),
                    ("season", key.season.to_string()),
                ],
            )
            .await?;
        Ok(parse_standings_response(&raw))
    }
}

/// API-Football answers 200 with an `errors` object/array on bad keys, quota
/// exhaustion and invalid parameters.
fn check_api_errors(raw: &Value) -> Result<(), ProviderError> {
    let errors = &raw["errors"];
    let message = match errors {
        Value::Object(map) if !map.is_empty() => map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v.as_str().unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("; "),
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; "),
        _ => return Ok(()),
    };
    if message.to_lowercase().contains("rate") || message.to_lowercase().contains("limit") {
        return Err(ProviderError::RateLimited);
    }
    Err(ProviderError::Api(message))
}

fn parse_fixtures_response(raw: &Value, key: ResourceKey) -> Vec<FixtureObservation> {
    match raw["response"].as_array() {
        Some(items) => items
            .iter()
            .filter_map(|item| parse_fixture(item, Some(key)))
            .collect(),
        None => vec![],
    }
}

/// Decode one `response[]` entry. `key` overrides the league/season echoed by
/// the provider when the caller already knows it.
fn parse_fixture(item: &Value, key: Option<ResourceKey>) -> Option<FixtureObservation> {
    let fixture = &item["fixture"];
    let fixture_id = fixture["id"].as_i64()?;

    let kickoff = fixture["date"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            fixture["timestamp"]
                .as_i64()
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
        })?;

    let key = match key {
        Some(k) => k,
        None => ResourceKey::new(
            item["league"]["id"].as_i64()?,
            item["league"]["season"].as_i64()? as i32,
        ),
    };

    let status = &fixture["status"];
    let status = FixtureStatus {
        short: status["short"].as_str().unwrap_or("NS").to_string(),
        long: status["long"].as_str().unwrap_or("Not Started").to_string(),
        elapsed: status["elapsed"].as_i64().map(|v| v as i32),
    };

    Some(FixtureObservation {
        fixture_id,
        key,
        kickoff,
        venue: fixture["venue"]["name"].as_str().map(str::to_string),
        round: item["league"]["round"].as_str().map(str::to_string),
        home: parse_team(&item["teams"]["home"])?,
        away: parse_team(&item["teams"]["away"])?,
        home_score: item["goals"]["home"].as_i64().map(|v| v as i32),
        away_score: item["goals"]["away"].as_i64().map(|v| v as i32),
        status,
        occurrences: parse_occurrences(&item["events"]),
    })
}

fn parse_team(team: &Value) -> Option<Team> {
    Some(Team {
        id: team["id"].as_i64()?,
        name: team["name"].as_str()?.to_string(),
        logo: team["logo"].as_str().map(str::to_string),
    })
}

fn parse_occurrences(events: &Value) -> Vec<Occurrence> {
    let Some(events) = events.as_array() else {
        return vec![];
    };
    events
        .iter()
        .filter_map(|ev| {
            Some(Occurrence {
                elapsed: ev["time"]["elapsed"].as_i64()? as i32,
                extra: ev["time"]["extra"].as_i64().map(|v| v as i32),
                kind: ev["type"].as_str()?.to_string(),
                detail: ev["detail"].as_str().unwrap_or_default().to_string(),
                actor_id: ev["player"]["id"].as_i64(),
                actor: ev["player"]["name"].as_str().map(str::to_string),
                assist: ev["assist"]["name"].as_str().map(str::to_string),
                team_id: ev["team"]["id"].as_i64(),
                team: ev["team"]["name"].as_str().map(str::to_string),
                comments: ev["comments"].as_str().map(str::to_string),
            })
        })
        .collect()
}

fn parse_standings_response(raw: &Value) -> Vec<StandingRow> {
    let Some(groups) = raw["response"]
        .as_array()
        .and_then(|r| r.first())
        .and_then(|league| league["league"]["standings"].as_array())
    else {
        return vec![];
    };

    groups
        .iter()
        .filter_map(|group| group.as_array())
        .flatten()
        .filter_map(|row| {
            let all = &row["all"];
            let int = |v: &Value| v.as_i64().unwrap_or(0) as i32;
            Some(StandingRow {
                rank: row["rank"].as_i64()? as i32,
                team_id: row["team"]["id"].as_i64()?,
                team: row["team"]["name"].as_str()?.to_string(),
                points: int(&row["points"]),
                played: int(&all["played"]),
                won: int(&all["win"]),
                drawn: int(&all["draw"]),
                lost: int(&all["lose"]),
                goals_for: int(&all["goals"]["for"]),
                goals_against: int(&all["goals"]["against"]),
                goal_diff: int(&row["goalsDiff"]),
                form: row["form"].as_str().map(str::to_string),
                group: row["group"].as_str().map(str::to_string),
            })
        })
        .collect()
}
