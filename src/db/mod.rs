use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

/// Durable fixture history consumed by the schedulers.
///
/// "Today" always means the current UTC calendar day.
#[async_trait]
pub trait FixtureStore: Send + Sync {
    /// Is any fixture of `key` scheduled today and not yet in a terminal
    /// status, or still in play from an earlier kickoff (matches running past
    /// midnight)?
    async fn has_unfinished_fixtures_today(&self, key: ResourceKey) -> Result<bool>;

    /// Kickoff of the next fixture that has not started yet.
    async fn next_upcoming_fixture_timestamp(
        &self,
        key: ResourceKey,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Has any fixture of `key` kicked off within the estimated match length
    /// without reaching a terminal status? Kickoff time decides, since stored
    /// statuses may lag the pitch.
    async fn has_fixtures_underway(&self, key: ResourceKey) -> Result<bool>;

    /// Kickoff of the final fixture of the current match day: the UTC day of
    /// the most recent kickoff within the last 24 hours. May lie in the future
    /// when that day still has fixtures to come.
    async fn last_kickoff_of_match_day(&self, key: ResourceKey) -> Result<Option<DateTime<Utc>>>;

    async fn persist_observation(&self, obs: &FixtureObservation) -> Result<()>;
}

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Fixtures ──────────────────────────────────────────────────────────────

    /// Insert or refresh a fixture record
    pub fn upsert_fixture(&self, obs: &FixtureObservation) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO fixtures (
                id, league, season, kickoff, home_team, away_team,
                home_score, away_score, status_short, status_long, elapsed, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(id) DO UPDATE SET
                kickoff=excluded.kickoff,
                home_score=excluded.home_score,
                away_score=excluded.away_score,
                status_short=excluded.status_short,
                status_long=excluded.status_long,
                elapsed=excluded.elapsed,
                updated_at=excluded.updated_at",
            params![
                obs.fixture_id,
                obs.key.league,
                obs.key.season,
                obs.kickoff,
                obs.home.name,
                obs.away.name,
                obs.home_score,
                obs.away_score,
                obs.status.short,
                obs.status.long,
                obs.status.elapsed,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn get_fixture(&self, fixture_id: i64) -> Result<Option<StoredFixture>> {
        let conn = self.lock()?;
        let fixture = conn
            .query_row(
                &format!("SELECT {} FROM fixtures WHERE id=?1", FIXTURE_COLUMNS),
                params![fixture_id],
                map_fixture,
            )
            .optional()?;
        Ok(fixture)
    }

    /// Fixtures of `key` kicking off on the given UTC day, in kickoff order
    pub fn fixtures_for_day(&self, key: ResourceKey, day: NaiveDate) -> Result<Vec<StoredFixture>> {
        let (start, end) = day_bounds(day);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM fixtures
             WHERE league=?1 AND season=?2 AND kickoff >= ?3 AND kickoff < ?4
             ORDER BY kickoff ASC, id ASC",
            FIXTURE_COLUMNS
        ))?;
        let fixtures = stmt
            .query_map(params![key.league, key.season, start, end], map_fixture)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(fixtures)
    }

    pub fn count_unfinished_on(&self, key: ResourceKey, day: NaiveDate) -> Result<i64> {
        let (start, end) = day_bounds(day);
        let conn = self.lock()?;
        let count = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM fixtures
                 WHERE league=?1 AND season=?2 AND kickoff >= ?3 AND kickoff < ?4
                   AND status_short NOT IN ({})",
                TERMINAL_CODES
            ),
            params![key.league, key.season, start, end],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    pub fn next_kickoff_after(
        &self,
        key: ResourceKey,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let next: Option<DateTime<Utc>> = conn.query_row(
            &format!(
                "SELECT MIN(kickoff) FROM fixtures
                 WHERE league=?1 AND season=?2 AND kickoff > ?3
                   AND status_short NOT IN ({})",
                TERMINAL_CODES
            ),
            params![key.league, key.season, after],
            |r| r.get(0),
        )?;
        Ok(next)
    }

    /// Fixtures stored with an in-progress status that kicked off after
    /// `kicked_off_after`.
    pub fn count_in_progress(&self, key: ResourceKey, kicked_off_after: DateTime<Utc>) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM fixtures
                 WHERE league=?1 AND season=?2 AND kickoff > ?3 AND status_short IN ({})",
                IN_PROGRESS_CODES
            ),
            params![key.league, key.season, kicked_off_after],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Non-terminal fixtures with a kickoff in `(from, to]`.
    pub fn count_kicked_off_unfinished(
        &self,
        key: ResourceKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM fixtures
                 WHERE league=?1 AND season=?2 AND kickoff > ?3 AND kickoff <= ?4
                   AND status_short NOT IN ({})",
                TERMINAL_CODES
            ),
            params![key.league, key.season, from, to],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    pub fn latest_kickoff_between(
        &self,
        key: ResourceKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let latest: Option<DateTime<Utc>> = conn.query_row(
            "SELECT MAX(kickoff) FROM fixtures
             WHERE league=?1 AND season=?2 AND kickoff >= ?3 AND kickoff <= ?4",
            params![key.league, key.season, from, to],
            |r| r.get(0),
        )?;
        Ok(latest)
    }

    pub fn unfinished_at(&self, key: ResourceKey, now: DateTime<Utc>) -> Result<bool> {
        if self.count_unfinished_on(key, now.date_naive())? > 0 {
            return Ok(true);
        }
        Ok(self.count_in_progress(key, now - Duration::hours(LIVE_STATUS_HORIZON_HOURS))? > 0)
    }

    pub fn underway_at(&self, key: ResourceKey, now: DateTime<Utc>) -> Result<bool> {
        let from = now - Duration::minutes(ESTIMATED_MATCH_MINUTES);
        Ok(self.count_kicked_off_unfinished(key, from, now)? > 0)
    }

    pub fn match_day_last_kickoff_at(
        &self,
        key: ResourceKey,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        match self.latest_kickoff_between(key, now - Duration::hours(24), now)? {
            Some(recent) => self.last_kickoff_on(key, recent.date_naive()),
            None => Ok(None),
        }
    }

    pub fn last_kickoff_on(&self, key: ResourceKey, day: NaiveDate) -> Result<Option<DateTime<Utc>>> {
        let (start, end) = day_bounds(day);
        let conn = self.lock()?;
        let last: Option<DateTime<Utc>> = conn.query_row(
            "SELECT MAX(kickoff) FROM fixtures
             WHERE league=?1 AND season=?2 AND kickoff >= ?3 AND kickoff < ?4",
            params![key.league, key.season, start, end],
            |r| r.get(0),
        )?;
        Ok(last)
    }
}

#[async_trait]
impl FixtureStore for Database {
    async fn has_unfinished_fixtures_today(&self, key: ResourceKey) -> Result<bool> {
        self.unfinished_at(key, Utc::now())
    }

    async fn next_upcoming_fixture_timestamp(
        &self,
        key: ResourceKey,
    ) -> Result<Option<DateTime<Utc>>> {
        self.next_kickoff_after(key, Utc::now())
    }

    async fn has_fixtures_underway(&self, key: ResourceKey) -> Result<bool> {
        self.underway_at(key, Utc::now())
    }

    async fn last_kickoff_of_match_day(&self, key: ResourceKey) -> Result<Option<DateTime<Utc>>> {
        self.match_day_last_kickoff_at(key, Utc::now())
    }

    async fn persist_observation(&self, obs: &FixtureObservation) -> Result<()> {
        self.upsert_fixture(obs)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

const FIXTURE_COLUMNS: &str = "id, league, season, kickoff, home_team, away_team,
    home_score, away_score, status_short, status_long, elapsed, updated_at";

const TERMINAL_CODES: &str = "'FT','AET','PEN','PST','CANC','ABD','AWD','WO'";

const IN_PROGRESS_CODES: &str = "'1H','HT','2H','ET','BT','P','SUSP','INT','LIVE'";

/// An in-progress status older than this is a stale row, not a live match.
const LIVE_STATUS_HORIZON_HOURS: i64 = 6;

fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

fn map_fixture(row: &rusqlite::Row) -> rusqlite::Result<StoredFixture> {
    Ok(StoredFixture {
        fixture_id: row.get(0)?,
        league: row.get(1)?,
        season: row.get(2)?,
        kickoff: row.get(3)?,
        home_team: row.get(4)?,
        away_team: row.get(5)?,
        home_score: row.get(6)?,
        away_score: row.get(7)?,
        status_short: row.get(8)?,
        status_long: row.get(9)?,
        elapsed: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS fixtures (
    id           INTEGER PRIMARY KEY,
    league       INTEGER NOT NULL,
    season       INTEGER NOT NULL,
    kickoff      TEXT    NOT NULL,
    home_team    TEXT    NOT NULL,
    away_team    TEXT    NOT NULL,
    home_score   INTEGER,
    away_score   INTEGER,
    status_short TEXT    NOT NULL,
    status_long  TEXT    NOT NULL,
    elapsed      INTEGER,
    updated_at   TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fixtures_resource ON fixtures(league, season, kickoff);
"#;
