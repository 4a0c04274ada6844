//! Standings reconciliation: one operator-started loop per resource key that
//! republishes the league table into the [`StandingsCache`].
//!
//! Cadence follows the match day, judged by kickoff times since stored
//! statuses can lag the pitch:
//! - a fixture kicked off within the estimated match length and not yet
//!   terminal: refresh every `live_refresh`, short TTL
//! - day's last fixture not yet over: sleep no later than its estimated end
//! - day's last fixture over: follow-up refreshes at +10, +20, +30 and +65
//!   minutes after its estimated end, since external standings lag live
//!   results
//! - otherwise idle until the next fixture

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::StandingsCache;
use crate::db::models::{ResourceKey, ESTIMATED_MATCH_MINUTES};
use crate::db::FixtureStore;
use crate::hub::{lock, PollSettings};
use crate::live_scores::{cadence, sync_schedule, FixtureProvider};

/// Follow-up offsets after the estimated end of the day's last match.
const FOLLOWUP_OFFSETS_MINS: [i64; 4] = [10, 20, 30, 65];

#[derive(Debug, Clone, Copy)]
pub struct StandingsSettings {
    /// Cache TTL while matches are in progress
    pub live_ttl: Duration,
    /// Cache TTL otherwise
    pub idle_ttl: Duration,
    /// Refresh spacing while matches are in progress
    pub live_refresh: Duration,
}

impl Default for StandingsSettings {
    fn default() -> Self {
        StandingsSettings {
            live_ttl: Duration::from_secs(60),
            idle_ttl: Duration::from_secs(60 * 60),
            live_refresh: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconciliationStatus {
    pub active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Times of the post-match follow-up refreshes for a day whose last fixture
/// kicked off at `last_kickoff`.
pub fn followup_schedule(last_kickoff: DateTime<Utc>) -> [DateTime<Utc>; 4] {
    let estimated_end = estimated_end(last_kickoff);
    FOLLOWUP_OFFSETS_MINS.map(|m| estimated_end + ChronoDuration::minutes(m))
}

fn estimated_end(kickoff: DateTime<Utc>) -> DateTime<Utc> {
    kickoff + ChronoDuration::minutes(ESTIMATED_MATCH_MINUTES)
}

struct LoopHandle {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct DayState {
    /// Match day whose follow-up refreshes already ran
    followups_done_for: Option<NaiveDate>,
    schedule_synced_at: Option<Instant>,
    primed: bool,
}

pub struct Reconciler {
    provider: Arc<dyn FixtureProvider>,
    store: Arc<dyn FixtureStore>,
    cache: StandingsCache,
    poll: PollSettings,
    settings: StandingsSettings,
    tasks: Mutex<HashMap<ResourceKey, LoopHandle>>,
    last_runs: Mutex<HashMap<ResourceKey, DateTime<Utc>>>,
    generations: AtomicU64,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn FixtureProvider>,
        store: Arc<dyn FixtureStore>,
        cache: StandingsCache,
        poll: PollSettings,
        settings: StandingsSettings,
    ) -> Arc<Self> {
        Arc::new(Reconciler {
            provider,
            store,
            cache,
            poll,
            settings,
            tasks: Mutex::new(HashMap::new()),
            last_runs: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        })
    }

    pub fn cache(&self) -> &StandingsCache {
        &self.cache
    }

    /// Start reconciling `key`. No-op (returns `false`) if already running.
    pub fn start(self: &Arc<Self>, key: ResourceKey) -> bool {
        let mut tasks = lock(&self.tasks);
        if tasks.contains_key(&key) {
            return false;
        }
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        tasks.insert(
            key,
            LoopHandle {
                generation,
                token: token.clone(),
            },
        );
        drop(tasks);

        let reconciler = Arc::clone(self);
        tokio::spawn(async move { reconciler.run_loop(key, generation, token).await });
        true
    }

    pub fn stop(&self, key: ResourceKey) -> bool {
        match lock(&self.tasks).remove(&key) {
            Some(handle) => {
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self, key: ResourceKey) -> ReconciliationStatus {
        ReconciliationStatus {
            active: lock(&self.tasks).contains_key(&key),
            last_run_at: lock(&self.last_runs).get(&key).copied(),
        }
    }

    pub fn shutdown(&self) {
        for (_, handle) in lock(&self.tasks).drain() {
            handle.token.cancel();
        }
    }

    async fn run_loop(self: Arc<Self>, key: ResourceKey, generation: u64, token: CancellationToken) {
        info!(league = key.league, season = key.season, "Standings reconciliation started");
        let mut state = DayState::default();

        loop {
            let outcome = tokio::select! {
                _ = token.cancelled() => break,
                outcome = self.cycle(key, &mut state) => outcome,
            };
            let delay = outcome.unwrap_or_else(|e| {
                warn!(league = key.league, season = key.season, "Standings cycle failed: {:#}", e);
                self.poll.active_interval
            });

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let mut tasks = lock(&self.tasks);
        if tasks.get(&key).is_some_and(|h| h.generation == generation) {
            tasks.remove(&key);
        }
        info!(league = key.league, season = key.season, "Standings reconciliation stopped");
    }

    async fn cycle(&self, key: ResourceKey, state: &mut DayState) -> Result<Duration> {
        let sync_due = state
            .schedule_synced_at
            .map_or(true, |at| at.elapsed() >= self.poll.schedule_refresh);
        if sync_due {
            state.schedule_synced_at = Some(Instant::now());
            if let Err(e) = sync_schedule(self.provider.as_ref(), self.store.as_ref(), key).await {
                warn!(league = key.league, season = key.season, "Schedule sync failed: {:#}", e);
            }
        }

        if self.store.has_fixtures_underway(key).await? {
            self.refresh(key, self.settings.live_ttl).await?;
            state.primed = true;
            return Ok(self.settings.live_refresh);
        }

        if !state.primed {
            self.refresh(key, self.settings.idle_ttl).await?;
            state.primed = true;
        }

        let mut day_ends_at = None;
        if let Some(last_kickoff) = self.store.last_kickoff_of_match_day(key).await? {
            let end = estimated_end(last_kickoff);
            let match_day = last_kickoff.date_naive();
            if Utc::now() < end {
                day_ends_at = Some(end);
            } else if state.followups_done_for != Some(match_day) {
                self.run_followups(key, last_kickoff).await;
                state.followups_done_for = Some(match_day);
            }
        }

        let now = Utc::now();
        let next = self.store.next_upcoming_fixture_timestamp(key).await?;
        let mut delay = cadence::sleep_for(now, next, self.poll.active_interval);
        if let Some(until_end) = day_ends_at.and_then(|end| (end - now).to_std().ok()) {
            delay = delay.min(until_end);
        }
        debug!(
            league = key.league,
            season = key.season,
            "Standings idle; next fixture {:?}, sleeping {:?}",
            next,
            delay
        );
        Ok(delay)
    }

    /// Follow-up refreshes after the day's last match. Follow-ups already in
    /// the past collapse into a single immediate refresh.
    async fn run_followups(&self, key: ResourceKey, last_kickoff: DateTime<Utc>) {
        let wall = Utc::now();
        let base = Instant::now();
        let mut overdue = false;

        for at in followup_schedule(last_kickoff) {
            let Ok(wait) = (at - wall).to_std() else {
                overdue = true;
                continue;
            };
            if overdue {
                self.refresh_logged(key).await;
                overdue = false;
            }
            debug!(league = key.league, season = key.season, "Next standings follow-up at {}", at);
            tokio::time::sleep_until(base + wait).await;
            self.refresh_logged(key).await;
        }
        if overdue {
            self.refresh_logged(key).await;
        }
        info!(league = key.league, season = key.season, "Post-match standings follow-ups done");
    }

    async fn refresh_logged(&self, key: ResourceKey) {
        if let Err(e) = self.refresh(key, self.settings.idle_ttl).await {
            warn!(league = key.league, season = key.season, "Standings follow-up failed: {:#}", e);
        }
    }

    async fn refresh(&self, key: ResourceKey, ttl: Duration) -> Result<()> {
        let rows = self.provider.fetch_standings(key).await?;
        info!(
            league = key.league,
            season = key.season,
            "Standings refreshed: {} rows (ttl {:?})",
            rows.len(),
            ttl
        );
        self.cache.put(key, rows, ttl).await;
        lock(&self.last_runs).insert(key, Utc::now());
        Ok(())
    }
}
