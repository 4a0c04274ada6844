pub mod api_football;
pub mod cadence;
pub mod differ;
pub mod provider;

pub use api_football::ApiFootball;
pub use provider::FixtureProvider;

use anyhow::Result;
use tracing::{info, warn};

use crate::db::models::ResourceKey;
use crate::db::FixtureStore;

/// Copy a resource's season schedule into the fixture store so the idle path
/// knows what is on today and when the next kickoff is. Individual write
/// failures are logged and skipped.
pub async fn sync_schedule(
    provider: &dyn FixtureProvider,
    store: &dyn FixtureStore,
    key: ResourceKey,
) -> Result<usize> {
    let fixtures = provider.fetch_season_fixtures(key).await?;
    let mut stored = 0;
    for obs in &fixtures {
        match store.persist_observation(obs).await {
            Ok(()) => stored += 1,
            Err(e) => warn!("Failed to store fixture {}: {:#}", obs.fixture_id, e),
        }
    }
    info!(
        league = key.league,
        season = key.season,
        "Synced {}/{} fixtures from {}",
        stored,
        fixtures.len(),
        provider.name()
    );
    Ok(stored)
}
