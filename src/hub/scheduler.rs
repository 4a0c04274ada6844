//! One upstream poll loop per resource key.
//!
//! A loop is started by the first subscriber of a key and retires itself at
//! the top of an iteration once the key has no subscribers left. Every
//! suspension point (collaborator calls and sleeps) races the loop's
//! cancellation token, so `stop`/`shutdown` take effect immediately.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::lock;
use super::registry::SubscriberRegistry;
use crate::db::models::{Event, FixtureObservation, ResourceKey};
use crate::db::FixtureStore;
use crate::live_scores::cadence;
use crate::live_scores::differ::{self, ResourceState};
use crate::live_scores::{sync_schedule, FixtureProvider};
use crate::notify::{self, Notifier};

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Sleep between polls while fixtures are live
    pub active_interval: Duration,
    /// Minimum spacing of "next fixture" lookups while idle
    pub next_fixture_refresh: Duration,
    /// Spacing of full season-schedule syncs into the fixture store
    pub schedule_refresh: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            active_interval: Duration::from_secs(15),
            next_fixture_refresh: Duration::from_secs(5 * 60),
            schedule_refresh: Duration::from_secs(6 * 60 * 60),
        }
    }
}

struct LoopHandle {
    generation: u64,
    token: CancellationToken,
}

pub struct PollScheduler {
    provider: Arc<dyn FixtureProvider>,
    store: Arc<dyn FixtureStore>,
    notifier: Arc<dyn Notifier>,
    registry: Arc<SubscriberRegistry>,
    settings: PollSettings,
    tasks: Mutex<HashMap<ResourceKey, LoopHandle>>,
    generations: AtomicU64,
}

/// Cached "next kickoff" lookup, refreshed at most every `next_fixture_refresh`.
#[derive(Default)]
struct NextFixture {
    value: Option<DateTime<Utc>>,
    fetched_at: Option<Instant>,
}

/// Per-loop working memory. Dropped when the loop exits.
#[derive(Default)]
struct LoopState {
    fixtures: ResourceState,
    next_fixture: NextFixture,
    schedule_synced_at: Option<Instant>,
}

impl PollScheduler {
    pub fn new(
        provider: Arc<dyn FixtureProvider>,
        store: Arc<dyn FixtureStore>,
        notifier: Arc<dyn Notifier>,
        registry: Arc<SubscriberRegistry>,
        settings: PollSettings,
    ) -> Arc<Self> {
        Arc::new(PollScheduler {
            provider,
            store,
            notifier,
            registry,
            settings,
            tasks: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        })
    }

    /// Start a poll loop for `key` unless one is already registered.
    /// Returns `true` if a new loop was launched.
    pub fn start_if_needed(self: &Arc<Self>, key: ResourceKey) -> bool {
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

        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run_loop(key, generation, token).await });
        true
    }

    /// Cancel the loop for `key`. Returns `false` if none was running.
    pub fn stop(&self, key: ResourceKey) -> bool {
        let mut tasks = lock(&self.tasks);
        match tasks.remove(&key) {
            Some(handle) => {
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every loop (process shutdown).
    pub fn shutdown(&self) {
        let mut tasks = lock(&self.tasks);
        for (key, handle) in tasks.drain() {
            debug!("Cancelling poll loop for {}", key);
            handle.token.cancel();
        }
    }

    pub fn is_running(&self, key: ResourceKey) -> bool {
        lock(&self.tasks).contains_key(&key)
    }

    pub fn running_count(&self) -> usize {
        lock(&self.tasks).len()
    }

    async fn run_loop(self: Arc<Self>, key: ResourceKey, generation: u64, token: CancellationToken) {
        info!(league = key.league, season = key.season, "Poll loop started");
        let mut state = LoopState::default();

        loop {
            if token.is_cancelled() || self.retire_if_unwatched(key, generation) {
                break;
            }

            let outcome = tokio::select! {
                _ = token.cancelled() => break,
                outcome = self.cycle(key, &mut state, &token) => outcome,
            };
            let delay = match outcome {
                Ok(delay) => delay,
                Err(e) => {
                    warn!(league = key.league, season = key.season, "Poll cycle failed: {:#}", e);
                    self.settings.active_interval
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.forget(key, generation);
        info!(league = key.league, season = key.season, "Poll loop stopped");
    }

    /// Retire the loop if nobody is listening. The subscriber count is read
    /// while holding the task map lock: a subscriber registering concurrently
    /// either is counted here or finds the slot free and starts a new loop.
    fn retire_if_unwatched(&self, key: ResourceKey, generation: u64) -> bool {
        let mut tasks = lock(&self.tasks);
        if self.registry.subscriber_count(key) > 0 {
            return false;
        }
        if tasks.get(&key).is_some_and(|h| h.generation == generation) {
            tasks.remove(&key);
        }
        debug!(league = key.league, season = key.season, "No subscribers left");
        true
    }

    fn forget(&self, key: ResourceKey, generation: u64) {
        let mut tasks = lock(&self.tasks);
        if tasks.get(&key).is_some_and(|h| h.generation == generation) {
            tasks.remove(&key);
        }
    }

    /// One poll cycle. Returns how long to sleep before the next one.
    async fn cycle(
        &self,
        key: ResourceKey,
        state: &mut LoopState,
        token: &CancellationToken,
    ) -> Result<Duration> {
        self.sync_schedule_if_due(key, state).await;

        let now = Utc::now();
        // Fixtures still tracked keep the loop on the live path even once the
        // store no longer lists them for today (matches running past midnight).
        if state.fixtures.is_empty() && !self.store.has_unfinished_fixtures_today(key).await? {
            state.fixtures.clear();
            let next = self.next_fixture(key, &mut state.next_fixture).await?;
            let delay = cadence::sleep_for(now, next, self.settings.active_interval);
            debug!(
                league = key.league,
                season = key.season,
                "Nothing live today; next fixture {:?}, sleeping {:?}",
                next,
                delay
            );
            return Ok(delay);
        }

        let mut observations = self.provider.fetch_live_observations(key).await?;
        self.fill_occurrences(key, &state.fixtures, &mut observations).await;

        let outcome = differ::classify_cycle(key, &state.fixtures, &observations, now);
        let mut events = outcome.events;
        let mut fixtures = outcome.state;
        let mut finals = Vec::new();

        for fixture_id in outcome.vanished {
            match self.final_observation(key, fixture_id).await {
                Some(final_obs) => {
                    events.push(differ::finished_event(key, &final_obs, now));
                    finals.push(final_obs);
                }
                None => {
                    // keep it around so the next cycle retries the re-fetch
                    if let Some(prev) = state.fixtures.remove(&fixture_id) {
                        fixtures.insert(fixture_id, prev);
                    }
                }
            }
        }

        observations.extend(finals);
        self.persist_in_background(observations);
        state.fixtures = fixtures;

        if !events.is_empty() {
            info!(
                league = key.league,
                season = key.season,
                "{} event(s) this cycle: {:?}",
                events.len(),
                events.iter().map(|e| e.kind).collect::<Vec<_>>()
            );
            self.publish(key, token, events);
        }
        Ok(self.settings.active_interval)
    }

    async fn sync_schedule_if_due(&self, key: ResourceKey, state: &mut LoopState) {
        let due = state
            .schedule_synced_at
            .map_or(true, |at| at.elapsed() >= self.settings.schedule_refresh);
        if !due {
            return;
        }
        state.schedule_synced_at = Some(Instant::now());
        if let Err(e) = sync_schedule(self.provider.as_ref(), self.store.as_ref(), key).await {
            warn!(league = key.league, season = key.season, "Schedule sync failed: {:#}", e);
        }
    }

    async fn next_fixture(
        &self,
        key: ResourceKey,
        cached: &mut NextFixture,
    ) -> Result<Option<DateTime<Utc>>> {
        let stale = cached
            .fetched_at
            .map_or(true, |at| at.elapsed() >= self.settings.next_fixture_refresh);
        if stale {
            cached.value = self.store.next_upcoming_fixture_timestamp(key).await?;
            cached.fetched_at = Some(Instant::now());
        }
        Ok(cached.value)
    }

    /// Fetch occurrences for live fixtures the observation did not carry them
    /// for. Only fixtures that are new or whose score or status moved are
    /// fetched; the rest keep the occurrences of their previous snapshot. A
    /// failure leaves that fixture's list empty.
    async fn fill_occurrences(
        &self,
        key: ResourceKey,
        previous: &ResourceState,
        observations: &mut [FixtureObservation],
    ) {
        let mut missing: Vec<&mut FixtureObservation> = Vec::new();
        for obs in observations
            .iter_mut()
            .filter(|o| o.occurrences.is_empty() && o.status.is_in_progress())
        {
            match previous.get(&obs.fixture_id) {
                Some(prev) if !differ::scoreline_moved(prev, obs) => {
                    obs.occurrences = prev.occurrences.clone();
                }
                _ => missing.push(obs),
            }
        }
        if missing.is_empty() {
            return;
        }

        let fetches = missing.into_iter().map(|obs| async move {
            match self.provider.fetch_occurrences(obs.fixture_id).await {
                Ok(occurrences) => obs.occurrences = occurrences,
                Err(e) => warn!(
                    league = key.league,
                    season = key.season,
                    "Occurrences for fixture {} unavailable: {:#}",
                    obs.fixture_id,
                    e
                ),
            }
        });
        join_all(fetches).await;
    }

    async fn final_observation(&self, key: ResourceKey, fixture_id: i64) -> Option<FixtureObservation> {
        let mut obs = match self.provider.fetch_fixture_by_id(fixture_id).await {
            Ok(obs) => obs,
            Err(e) => {
                warn!(
                    league = key.league,
                    season = key.season,
                    "Final state of fixture {} unavailable, retrying next cycle: {:#}",
                    fixture_id,
                    e
                );
                return None;
            }
        };
        if !obs.status.is_terminal() {
            debug!(
                "Fixture {} left the live feed with status {}, reporting as finished",
                fixture_id, obs.status.short
            );
        }
        if obs.occurrences.is_empty() {
            match self.provider.fetch_occurrences(fixture_id).await {
                Ok(occurrences) => obs.occurrences = occurrences,
                Err(e) => warn!("Occurrences for finished fixture {} unavailable: {:#}", fixture_id, e),
            }
        }
        Some(obs)
    }

    fn persist_in_background(&self, observations: Vec<FixtureObservation>) {
        if observations.is_empty() {
            return;
        }
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            for obs in &observations {
                if let Err(e) = store.persist_observation(obs).await {
                    warn!("Failed to persist fixture {}: {:#}", obs.fixture_id, e);
                }
            }
        });
    }

    fn publish(&self, key: ResourceKey, token: &CancellationToken, events: Vec<Event>) {
        {
            let tasks = lock(&self.tasks);
            if token.is_cancelled() {
                return;
            }
            if !tasks.contains_key(&key) {
                error!(league = key.league, season = key.season, "Broadcast without a registered poll loop");
                debug_assert!(false, "broadcast for {} without a registered poll loop", key);
                return;
            }
        }

        let events: Vec<Arc<Event>> = events.into_iter().map(Arc::new).collect();
        let delivered = self.registry.broadcast(key, &events);
        debug!(league = key.league, season = key.season, "{} deliveries", delivered);

        for event in &events {
            if let Some(notification) = notify::describe(event) {
                let notifier = Arc::clone(&self.notifier);
                tokio::spawn(async move {
                    if let Err(e) = notifier.notify(notification).await {
                        warn!("Notification hand-off failed: {:#}", e);
                    }
                });
            }
        }
    }
}
