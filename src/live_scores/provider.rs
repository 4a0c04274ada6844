use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::db::models::{FixtureObservation, Occurrence, ResourceKey, StandingRow};

/// Trait that every upstream fixture provider must implement.
#[async_trait]
pub trait FixtureProvider: Send + Sync {
    /// All fixtures of the resource currently being played, in one call.
    async fn fetch_live_observations(&self, key: ResourceKey) -> Result<Vec<FixtureObservation>>;

    /// Authoritative state of a single fixture.
    async fn fetch_fixture_by_id(&self, fixture_id: i64) -> Result<FixtureObservation>;

    /// Occurrences recorded so far for a fixture.
    async fn fetch_occurrences(&self, fixture_id: i64) -> Result<Vec<Occurrence>>;

    /// The full season schedule of a resource.
    async fn fetch_season_fixtures(&self, key: ResourceKey) -> Result<Vec<FixtureObservation>>;

    async fn fetch_standings(&self, key: ResourceKey) -> Result<Vec<StandingRow>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Upstream failure categories. Carried inside `anyhow::Error`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("upstream returned HTTP {0}")]
    Http(reqwest::StatusCode),
    #[error("upstream rate limit reached")]
    RateLimited,
    #[error("upstream reported errors: {0}")]
    Api(String),
    #[error("unexpected upstream payload: {0}")]
    Decode(String),
}
