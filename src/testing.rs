//! In-memory collaborators for scheduler tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::db::models::{
    FixtureObservation, FixtureStatus, Occurrence, ResourceKey, StandingRow, Team,
};
use crate::db::FixtureStore;
use crate::live_scores::FixtureProvider;
use crate::notify::{Notification, Notifier};

pub fn goal(elapsed: i32, actor: &str) -> Occurrence {
    Occurrence {
        elapsed,
        extra: None,
        kind: "Goal".into(),
        detail: "Normal Goal".into(),
        actor_id: Some(1000 + elapsed as i64),
        actor: Some(actor.into()),
        assist: None,
        team_id: Some(1),
        team: Some("Home".into()),
        comments: None,
    }
}

pub fn fixture(
    id: i64,
    score: (i32, i32),
    status: &str,
    elapsed: i32,
    occurrences: Vec<Occurrence>,
) -> FixtureObservation {
    FixtureObservation {
        fixture_id: id,
        key: ResourceKey::new(39, 2024),
        kickoff: Utc::now(),
        venue: None,
        round: None,
        home: Team { id: 1, name: "Home".into(), logo: None },
        away: Team { id: 2, name: "Away".into(), logo: None },
        home_score: Some(score.0),
        away_score: Some(score.1),
        status: FixtureStatus {
            short: status.into(),
            long: status.into(),
            elapsed: Some(elapsed),
        },
        occurrences,
    }
}

/// Scripted provider: each live fetch pops the next scripted cycle; once the
/// script runs out the last successful cycle repeats.
#[derive(Default)]
pub struct FakeProvider {
    script: Mutex<VecDeque<Result<Vec<FixtureObservation>, String>>>,
    last: Mutex<Vec<FixtureObservation>>,
    finals: Mutex<HashMap<i64, FixtureObservation>>,
    occurrences: Mutex<HashMap<i64, Vec<Occurrence>>>,
    standings: Mutex<Vec<StandingRow>>,
    occurrences_fail: AtomicBool,
    live_calls: AtomicUsize,
    by_id_calls: AtomicUsize,
    occurrence_calls: AtomicUsize,
    season_calls: AtomicUsize,
    standings_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn push_cycle(&self, observations: Vec<FixtureObservation>) {
        self.script.lock().unwrap().push_back(Ok(observations));
    }

    pub fn push_failure(&self, message: &str) {
        self.script.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn set_final(&self, obs: FixtureObservation) {
        self.finals.lock().unwrap().insert(obs.fixture_id, obs);
    }

    /// Answer for the events endpoint of one fixture.
    pub fn set_occurrences(&self, fixture_id: i64, occurrences: Vec<Occurrence>) {
        self.occurrences.lock().unwrap().insert(fixture_id, occurrences);
    }

    pub fn set_standings(&self, rows: Vec<StandingRow>) {
        *self.standings.lock().unwrap() = rows;
    }

    pub fn fail_occurrences(&self) {
        self.occurrences_fail.store(true, Ordering::SeqCst);
    }

    pub fn live_calls(&self) -> usize {
        self.live_calls.load(Ordering::SeqCst)
    }

    pub fn by_id_calls(&self) -> usize {
        self.by_id_calls.load(Ordering::SeqCst)
    }

    pub fn occurrence_calls(&self) -> usize {
        self.occurrence_calls.load(Ordering::SeqCst)
    }

    pub fn season_calls(&self) -> usize {
        self.season_calls.load(Ordering::SeqCst)
    }

    pub fn standings_calls(&self) -> usize {
        self.standings_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FixtureProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_live_observations(&self, _key: ResourceKey) -> Result<Vec<FixtureObservation>> {
        self.live_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(observations)) => {
                *self.last.lock().unwrap() = observations.clone();
                Ok(observations)
            }
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }

    async fn fetch_fixture_by_id(&self, fixture_id: i64) -> Result<FixtureObservation> {
        self.by_id_calls.fetch_add(1, Ordering::SeqCst);
        self.finals
            .lock()
            .unwrap()
            .get(&fixture_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("fixture {} not found", fixture_id))
    }

    async fn fetch_occurrences(&self, fixture_id: i64) -> Result<Vec<Occurrence>> {
        self.occurrence_calls.fetch_add(1, Ordering::SeqCst);
        if self.occurrences_fail.load(Ordering::SeqCst) {
            anyhow::bail!("events endpoint unavailable");
        }
        Ok(self
            .occurrences
            .lock()
            .unwrap()
            .get(&fixture_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_season_fixtures(&self, _key: ResourceKey) -> Result<Vec<FixtureObservation>> {
        self.season_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![])
    }

    async fn fetch_standings(&self, _key: ResourceKey) -> Result<Vec<StandingRow>> {
        self.standings_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.standings.lock().unwrap().clone())
    }
}

/// Store with fixed answers for the "today" questions.
pub struct FakeStore {
    unfinished_today: AtomicBool,
    in_progress: AtomicBool,
    next_fixture: Mutex<Option<DateTime<Utc>>>,
    last_kickoff: Mutex<Option<DateTime<Utc>>>,
    persisted: Mutex<Vec<FixtureObservation>>,
    next_fixture_calls: AtomicUsize,
}

impl FakeStore {
    fn new(unfinished_today: bool, next_fixture: Option<DateTime<Utc>>) -> Self {
        FakeStore {
            unfinished_today: AtomicBool::new(unfinished_today),
            in_progress: AtomicBool::new(unfinished_today),
            next_fixture: Mutex::new(next_fixture),
            last_kickoff: Mutex::new(None),
            persisted: Mutex::new(Vec::new()),
            next_fixture_calls: AtomicUsize::new(0),
        }
    }

    /// Fixtures live right now.
    pub fn live_today() -> Self {
        Self::new(true, None)
    }

    /// Nothing today; `next_fixture` is the next kickoff, if any.
    pub fn idle(next_fixture: Option<DateTime<Utc>>) -> Self {
        Self::new(false, next_fixture)
    }

    pub fn set_today(&self, unfinished: bool, in_progress: bool) {
        self.unfinished_today.store(unfinished, Ordering::SeqCst);
        self.in_progress.store(in_progress, Ordering::SeqCst);
    }

    pub fn set_last_kickoff(&self, kickoff: Option<DateTime<Utc>>) {
        *self.last_kickoff.lock().unwrap() = kickoff;
    }

    pub fn persisted(&self) -> Vec<FixtureObservation> {
        self.persisted.lock().unwrap().clone()
    }

    pub fn next_fixture_calls(&self) -> usize {
        self.next_fixture_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FixtureStore for FakeStore {
    async fn has_unfinished_fixtures_today(&self, _key: ResourceKey) -> Result<bool> {
        Ok(self.unfinished_today.load(Ordering::SeqCst))
    }

    async fn next_upcoming_fixture_timestamp(
        &self,
        _key: ResourceKey,
    ) -> Result<Option<DateTime<Utc>>> {
        self.next_fixture_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.next_fixture.lock().unwrap())
    }

    async fn has_fixtures_underway(&self, _key: ResourceKey) -> Result<bool> {
        Ok(self.in_progress.load(Ordering::SeqCst))
    }

    async fn last_kickoff_of_match_day(&self, _key: ResourceKey) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.last_kickoff.lock().unwrap())
    }

    async fn persist_observation(&self, obs: &FixtureObservation) -> Result<()> {
        self.persisted.lock().unwrap().push(obs.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.received.lock().unwrap().push(notification);
        Ok(())
    }
}
