use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

pub mod markets;
pub mod models;
pub mod tickets;

use crate::markets::Selection;
use crate::stats::{LeagueStatProfile, ResultSource, TeamStatProfile};
use models::*;

/// Provider status codes after which a fixture's result is final.
pub(crate) const TERMINAL_STATUSES: &str = "('FT','AET','PEN','CANC','ABD','AWD','WO')";

/// Thread-safe SQLite handle (single connection with mutex).
///
/// Separate processes share the same file; WAL plus a busy timeout lets
/// overlapping job runs queue on the write lock instead of failing.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Fixture results ──────────────────────────────────────────────────────

    /// Insert or correct a result keyed by fixture id.
    pub fn upsert_result(&self, r: &FixtureResult) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO fixture_results (
                fixture_id, league_id, season, home_team_id, away_team_id,
                kickoff_at, status, goals_home, goals_away, corners_home,
                corners_away, cards_home, cards_away, fouls_home, fouls_away,
                offsides_home, offsides_away, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)
             ON CONFLICT(fixture_id) DO UPDATE SET
                league_id=excluded.league_id,
                season=excluded.season,
                kickoff_at=excluded.kickoff_at,
                status=excluded.status,
                goals_home=COALESCE(excluded.goals_home, goals_home),
                goals_away=COALESCE(excluded.goals_away, goals_away),
                corners_home=COALESCE(excluded.corners_home, corners_home),
                corners_away=COALESCE(excluded.corners_away, corners_away),
                cards_home=COALESCE(excluded.cards_home, cards_home),
                cards_away=COALESCE(excluded.cards_away, cards_away),
                fouls_home=COALESCE(excluded.fouls_home, fouls_home),
                fouls_away=COALESCE(excluded.fouls_away, fouls_away),
                offsides_home=COALESCE(excluded.offsides_home, offsides_home),
                offsides_away=COALESCE(excluded.offsides_away, offsides_away),
                updated_at=excluded.updated_at",
            params![
                r.fixture_id,
                r.league_id,
                r.season,
                r.home_team_id,
                r.away_team_id,
                r.kickoff_at,
                r.status,
                r.goals_home,
                r.goals_away,
                r.corners_home,
                r.corners_away,
                r.cards_home,
                r.cards_away,
                r.fouls_home,
                r.fouls_away,
                r.offsides_home,
                r.offsides_away,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn get_result(&self, fixture_id: i64) -> Result<Option<FixtureResult>> {
        let conn = self.conn()?;
        let r = conn
            .query_row(
                &format!("{} WHERE fixture_id = ?1", SELECT_RESULT),
                params![fixture_id],
                map_result,
            )
            .optional()?;
        Ok(r)
    }

    /// Finished results that still lack a stat pair and were not asked for
    /// statistics since `checked_before`. Never-checked rows come first,
    /// newest kickoff first within each group.
    pub fn results_missing_stats(
        &self,
        limit: i64,
        checked_before: DateTime<Utc>,
    ) -> Result<Vec<FixtureResult>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE status IN ('FT','AET','PEN')
               AND (corners_home IS NULL OR fouls_home IS NULL OR cards_home IS NULL)
               AND (stats_checked_at IS NULL OR stats_checked_at < ?2)
             ORDER BY stats_checked_at IS NOT NULL, stats_checked_at, kickoff_at DESC
             LIMIT ?1",
            SELECT_RESULT
        ))?;
        let rows = stmt
            .query_map(params![limit, checked_before], map_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Record that the provider was asked for this fixture's statistics.
    pub fn mark_stats_checked(&self, fixture_id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE fixture_results SET stats_checked_at = ?1 WHERE fixture_id = ?2",
            params![at, fixture_id],
        )?;
        Ok(())
    }

    /// True if statistics were requested at or after `since`.
    pub fn stats_checked_since(&self, fixture_id: i64, since: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let checked: Option<Option<DateTime<Utc>>> = conn
            .query_row(
                "SELECT stats_checked_at FROM fixture_results WHERE fixture_id = ?1",
                params![fixture_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(matches!(checked, Some(Some(at)) if at >= since))
    }

    /// Distinct `(team, league)` pairs with a finished match since `since`.
    pub fn teams_with_results(
        &self,
        since: DateTime<Utc>,
        league_whitelist: &[i64],
    ) -> Result<Vec<(i64, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT home_team_id, league_id FROM fixture_results
              WHERE kickoff_at > ?1 AND status IN ('FT','AET','PEN')
             UNION
             SELECT away_team_id, league_id FROM fixture_results
              WHERE kickoff_at > ?1 AND status IN ('FT','AET','PEN')",
        )?;
        let rows = stmt
            .query_map(params![since], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(i64, i64)>>>()?;
        Ok(rows
            .into_iter()
            .filter(|(_, league)| league_whitelist.is_empty() || league_whitelist.contains(league))
            .collect())
    }

    // ── Upcoming fixtures & odds ─────────────────────────────────────────────

    pub fn upsert_upcoming(&self, f: &UpcomingFixture) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO upcoming_fixtures (
                fixture_id, league_id, season, home_team_id, away_team_id, kickoff_at
             ) VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(fixture_id) DO UPDATE SET kickoff_at=excluded.kickoff_at",
            params![
                f.fixture_id,
                f.league_id,
                f.season,
                f.home_team_id,
                f.away_team_id,
                f.kickoff_at,
            ],
        )?;
        Ok(())
    }

    /// Drop a fixture from the upcoming set once it has started or finished.
    pub fn remove_upcoming(&self, fixture_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM upcoming_fixtures WHERE fixture_id = ?1",
            params![fixture_id],
        )?;
        Ok(())
    }

    pub fn list_upcoming(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        league_whitelist: &[i64],
    ) -> Result<Vec<UpcomingFixture>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT fixture_id, league_id, season, home_team_id, away_team_id, kickoff_at
               FROM upcoming_fixtures
              WHERE kickoff_at > ?1 AND kickoff_at <= ?2
              ORDER BY kickoff_at, fixture_id",
        )?;
        let rows = stmt
            .query_map(params![from, to], |row| {
                Ok(UpcomingFixture {
                    fixture_id: row.get(0)?,
                    league_id: row.get(1)?,
                    season: row.get(2)?,
                    home_team_id: row.get(3)?,
                    away_team_id: row.get(4)?,
                    kickoff_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter(|f| league_whitelist.is_empty() || league_whitelist.contains(&f.league_id))
            .collect())
    }

    pub fn upsert_odds(&self, q: &OddsQuote) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO odds_quotes (fixture_id, market, side, line, bookmaker, odds, fetched_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(fixture_id, market, side, line, bookmaker) DO UPDATE SET
                odds=excluded.odds,
                fetched_at=excluded.fetched_at",
            params![
                q.fixture_id,
                q.selection.market.as_str(),
                q.selection.side.as_str(),
                q.selection.line,
                q.bookmaker,
                q.odds,
                q.fetched_at,
            ],
        )?;
        Ok(())
    }

    pub fn odds_for_fixture(&self, fixture_id: i64) -> Result<Vec<OddsQuote>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT market, side, line, bookmaker, odds, fetched_at
               FROM odds_quotes WHERE fixture_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![fixture_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, DateTime<Utc>>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut quotes = Vec::with_capacity(rows.len());
        for (market, side, line, bookmaker, odds, fetched_at) in rows {
            match Selection::parse(&market, &side, line) {
                Ok(selection) => quotes.push(OddsQuote {
                    fixture_id,
                    selection,
                    odds,
                    bookmaker,
                    fetched_at,
                }),
                Err(e) => warn!("Skipping odds row on fixture {}: {}", fixture_id, e),
            }
        }
        Ok(quotes)
    }

    // ── Stats caches ─────────────────────────────────────────────────────────

    pub fn save_team_profile(&self, p: &TeamStatProfile) -> Result<()> {
        let json = serde_json::to_string(p)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO team_stats (team_id, league_id, profile, computed_at)
             VALUES (?1,?2,?3,?4)
             ON CONFLICT(team_id, league_id) DO UPDATE SET
                profile=excluded.profile,
                computed_at=excluded.computed_at",
            params![p.team_id, p.league_id.unwrap_or(0), json, p.computed_at],
        )?;
        Ok(())
    }

    pub fn load_team_profile(
        &self,
        team_id: i64,
        league_id: Option<i64>,
    ) -> Result<Option<TeamStatProfile>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT profile FROM team_stats WHERE team_id = ?1 AND league_id = ?2",
                params![team_id, league_id.unwrap_or(0)],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(Into::into))
            .transpose()
    }

    pub fn team_profile_computed_at(
        &self,
        team_id: i64,
        league_id: Option<i64>,
    ) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let at = conn
            .query_row(
                "SELECT computed_at FROM team_stats WHERE team_id = ?1 AND league_id = ?2",
                params![team_id, league_id.unwrap_or(0)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(at)
    }

    pub fn save_league_profile(&self, p: &LeagueStatProfile) -> Result<()> {
        let json = serde_json::to_string(p)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO league_stats (league_id, profile, computed_at) VALUES (?1,?2,?3)
             ON CONFLICT(league_id) DO UPDATE SET
                profile=excluded.profile,
                computed_at=excluded.computed_at",
            params![p.league_id, json, p.computed_at],
        )?;
        Ok(())
    }

    pub fn load_league_profile(&self, league_id: i64) -> Result<Option<LeagueStatProfile>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT profile FROM league_stats WHERE league_id = ?1",
                params![league_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(Into::into))
            .transpose()
    }

    // ── Performance weights ──────────────────────────────────────────────────

    /// Replace the whole weight table with a fresh computation.
    pub fn replace_performance_weights(&self, weights: &[PerformanceWeight]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM performance_weights", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO performance_weights (
                    market, side, line, league_id, wins, losses, pushes, sample_size,
                    win_rate, roi, bayes_rate, weight, computed_at
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            )?;
            for w in weights {
                stmt.execute(params![
                    w.market,
                    w.side,
                    w.line,
                    w.league_id.unwrap_or(0),
                    w.wins,
                    w.losses,
                    w.pushes,
                    w.sample_size,
                    w.win_rate,
                    w.roi,
                    w.bayes_rate,
                    w.weight,
                    w.computed_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_performance_weights(&self) -> Result<Vec<PerformanceWeight>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT market, side, line, league_id, wins, losses, pushes, sample_size,
                    win_rate, roi, bayes_rate, weight, computed_at
               FROM performance_weights ORDER BY market, side, line, league_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let league: i64 = row.get(3)?;
                Ok(PerformanceWeight {
                    market: row.get(0)?,
                    side: row.get(1)?,
                    line: row.get(2)?,
                    league_id: if league == 0 { None } else { Some(league) },
                    wins: row.get(4)?,
                    losses: row.get(5)?,
                    pushes: row.get(6)?,
                    sample_size: row.get(7)?,
                    win_rate: row.get(8)?,
                    roi: row.get(9)?,
                    bayes_rate: row.get(10)?,
                    weight: row.get(11)?,
                    computed_at: row.get(12)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Job bookkeeping ──────────────────────────────────────────────────────

    /// Take the named job lock unless another live owner holds it.
    pub fn try_acquire_job_lock(
        &self,
        job: &str,
        owner: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT INTO job_locks (job, owner, acquired_at, expires_at) VALUES (?1,?2,?3,?4)
             ON CONFLICT(job) DO UPDATE SET
                owner=excluded.owner,
                acquired_at=excluded.acquired_at,
                expires_at=excluded.expires_at
             WHERE job_locks.expires_at <= excluded.acquired_at",
            params![job, owner, now, now + ttl],
        )?;
        Ok(changed == 1)
    }

    pub fn release_job_lock(&self, job: &str, owner: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM job_locks WHERE job = ?1 AND owner = ?2",
            params![job, owner],
        )?;
        Ok(())
    }

    pub fn get_cursor(&self, job: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let cursor = conn
            .query_row(
                "SELECT cursor FROM job_cursors WHERE job = ?1",
                params![job],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor)
    }

    pub fn set_cursor(&self, job: &str, cursor: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        match cursor {
            Some(c) => conn.execute(
                "INSERT INTO job_cursors (job, cursor, updated_at) VALUES (?1,?2,?3)
                 ON CONFLICT(job) DO UPDATE SET cursor=excluded.cursor, updated_at=excluded.updated_at",
                params![job, c, Utc::now()],
            )?,
            None => conn.execute("DELETE FROM job_cursors WHERE job = ?1", params![job])?,
        };
        Ok(())
    }

    /// Append one audit row for a job invocation.
    pub fn insert_job_run(&self, run: &JobRun) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO job_runs (
                job, status, window_start, window_end, scanned, succeeded, failed,
                error_text, cursor, duration_ms, started_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                run.job,
                run.status,
                run.window_start,
                run.window_end,
                run.scanned,
                run.succeeded,
                run.failed,
                run.error_text,
                run.cursor,
                run.duration_ms,
                run.started_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_job_runs(&self, limit: i64) -> Result<Vec<JobRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job, status, window_start, window_end, scanned, succeeded, failed,
                    error_text, cursor, duration_ms, started_at
               FROM job_runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(JobRun {
                    id: row.get(0)?,
                    job: row.get(1)?,
                    status: row.get(2)?,
                    window_start: row.get(3)?,
                    window_end: row.get(4)?,
                    scanned: row.get(5)?,
                    succeeded: row.get(6)?,
                    failed: row.get(7)?,
                    error_text: row.get(8)?,
                    cursor: row.get(9)?,
                    duration_ms: row.get(10)?,
                    started_at: row.get(11)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl ResultSource for Database {
    fn team_results(
        &self,
        team_id: i64,
        league_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<Vec<FixtureResult>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE (home_team_id = ?1 OR away_team_id = ?1)
               AND (?2 IS NULL OR league_id = ?2)
               AND kickoff_at > ?3
             ORDER BY kickoff_at DESC",
            SELECT_RESULT
        ))?;
        let rows = stmt
            .query_map(params![team_id, league_id, since], map_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn league_results(&self, league_id: i64, since: DateTime<Utc>) -> Result<Vec<FixtureResult>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE league_id = ?1 AND kickoff_at > ?2 ORDER BY kickoff_at DESC",
            SELECT_RESULT
        ))?;
        let rows = stmt
            .query_map(params![league_id, since], map_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

const SELECT_RESULT: &str = "SELECT fixture_id, league_id, season, home_team_id, away_team_id,
        kickoff_at, status, goals_home, goals_away, corners_home, corners_away,
        cards_home, cards_away, fouls_home, fouls_away, offsides_home, offsides_away
   FROM fixture_results";

fn map_result(row: &rusqlite::Row) -> rusqlite::Result<FixtureResult> {
    Ok(FixtureResult {
        fixture_id: row.get(0)?,
        league_id: row.get(1)?,
        season: row.get(2)?,
        home_team_id: row.get(3)?,
        away_team_id: row.get(4)?,
        kickoff_at: row.get(5)?,
        status: row.get(6)?,
        goals_home: row.get(7)?,
        goals_away: row.get(8)?,
        corners_home: row.get(9)?,
        corners_away: row.get(10)?,
        cards_home: row.get(11)?,
        cards_away: row.get(12)?,
        fouls_home: row.get(13)?,
        fouls_away: row.get(14)?,
        offsides_home: row.get(15)?,
        offsides_away: row.get(16)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS fixture_results (
    fixture_id    INTEGER PRIMARY KEY,
    league_id     INTEGER NOT NULL,
    season        INTEGER,
    home_team_id  INTEGER NOT NULL,
    away_team_id  INTEGER NOT NULL,
    kickoff_at    TEXT    NOT NULL,
    status        TEXT    NOT NULL,
    goals_home    INTEGER,
    goals_away    INTEGER,
    corners_home  INTEGER,
    corners_away  INTEGER,
    cards_home    INTEGER,
    cards_away    INTEGER,
    fouls_home    INTEGER,
    fouls_away    INTEGER,
    offsides_home INTEGER,
    offsides_away INTEGER,
    stats_checked_at TEXT,
    updated_at    TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS upcoming_fixtures (
    fixture_id   INTEGER PRIMARY KEY,
    league_id    INTEGER NOT NULL,
    season       INTEGER,
    home_team_id INTEGER NOT NULL,
    away_team_id INTEGER NOT NULL,
    kickoff_at   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS odds_quotes (
    fixture_id INTEGER NOT NULL,
    market     TEXT    NOT NULL,
    side       TEXT    NOT NULL,
    line       REAL    NOT NULL,
    bookmaker  TEXT    NOT NULL,
    odds       REAL    NOT NULL,
    fetched_at TEXT    NOT NULL,
    PRIMARY KEY (fixture_id, market, side, line, bookmaker)
);

CREATE TABLE IF NOT EXISTS team_stats (
    team_id     INTEGER NOT NULL,
    league_id   INTEGER NOT NULL DEFAULT 0,
    profile     TEXT    NOT NULL,
    computed_at TEXT    NOT NULL,
    PRIMARY KEY (team_id, league_id)
);

CREATE TABLE IF NOT EXISTS league_stats (
    league_id   INTEGER PRIMARY KEY,
    profile     TEXT    NOT NULL,
    computed_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS tickets (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    status       TEXT    NOT NULL DEFAULT 'pending',
    content_hash TEXT    NOT NULL,
    seed         TEXT    NOT NULL,
    total_odds   REAL    NOT NULL,
    created_at   TEXT    NOT NULL,
    settled_at   TEXT
);

CREATE TABLE IF NOT EXISTS ticket_legs (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_id         INTEGER NOT NULL,
    position          INTEGER NOT NULL,
    fixture_id        INTEGER NOT NULL,
    league_id         INTEGER NOT NULL,
    market            TEXT    NOT NULL,
    side              TEXT    NOT NULL,
    line              REAL    NOT NULL,
    odds              REAL    NOT NULL,
    model_probability REAL    NOT NULL,
    status            TEXT    NOT NULL DEFAULT 'pending',
    actual_value      REAL,
    settled_at        TEXT,
    claimed_by        TEXT,
    claimed_at        TEXT,
    last_attempt_at   TEXT,
    diagnostic        TEXT,
    UNIQUE (ticket_id, fixture_id),
    FOREIGN KEY (ticket_id) REFERENCES tickets(id)
);

CREATE TABLE IF NOT EXISTS prediction_markets (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    question        TEXT    NOT NULL,
    status          TEXT    NOT NULL DEFAULT 'open',
    closes_at       TEXT    NOT NULL,
    winning_outcome TEXT,
    resolved_at     TEXT,
    yes_pool        REAL    NOT NULL DEFAULT 0,
    no_pool         REAL    NOT NULL DEFAULT 0,
    fixture_id      INTEGER,
    market          TEXT,
    side            TEXT,
    line            REAL,
    created_at      TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS market_positions (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id        INTEGER NOT NULL,
    user_id          TEXT    NOT NULL,
    outcome          TEXT    NOT NULL,
    stake            REAL    NOT NULL,
    fee              REAL    NOT NULL,
    potential_payout REAL    NOT NULL,
    status           TEXT    NOT NULL DEFAULT 'pending',
    payout           REAL,
    placed_at        TEXT    NOT NULL,
    settled_at       TEXT,
    FOREIGN KEY (market_id) REFERENCES prediction_markets(id)
);

CREATE TABLE IF NOT EXISTS accounts (
    user_id    TEXT PRIMARY KEY,
    balance    REAL NOT NULL DEFAULT 0 CHECK (balance >= 0),
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS performance_weights (
    market      TEXT    NOT NULL,
    side        TEXT    NOT NULL,
    line        REAL    NOT NULL,
    league_id   INTEGER NOT NULL DEFAULT 0,
    wins        INTEGER NOT NULL,
    losses      INTEGER NOT NULL,
    pushes      INTEGER NOT NULL,
    sample_size INTEGER NOT NULL,
    win_rate    REAL    NOT NULL,
    roi         REAL    NOT NULL,
    bayes_rate  REAL    NOT NULL,
    weight      REAL    NOT NULL,
    computed_at TEXT    NOT NULL,
    PRIMARY KEY (market, side, line, league_id)
);

CREATE TABLE IF NOT EXISTS job_runs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    job          TEXT    NOT NULL,
    status       TEXT    NOT NULL,
    window_start TEXT,
    window_end   TEXT,
    scanned      INTEGER NOT NULL,
    succeeded    INTEGER NOT NULL,
    failed       INTEGER NOT NULL,
    error_text   TEXT,
    cursor       TEXT,
    duration_ms  INTEGER NOT NULL,
    started_at   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS job_locks (
    job         TEXT PRIMARY KEY,
    owner       TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS job_cursors (
    job        TEXT PRIMARY KEY,
    cursor     TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_league_kickoff ON fixture_results(league_id, kickoff_at);
CREATE INDEX IF NOT EXISTS idx_results_home ON fixture_results(home_team_id, kickoff_at);
CREATE INDEX IF NOT EXISTS idx_results_away ON fixture_results(away_team_id, kickoff_at);
CREATE INDEX IF NOT EXISTS idx_legs_status_fixture ON ticket_legs(status, fixture_id);
CREATE INDEX IF NOT EXISTS idx_legs_ticket ON ticket_legs(ticket_id);
CREATE INDEX IF NOT EXISTS idx_positions_market ON market_positions(market_id, status);
"#;
