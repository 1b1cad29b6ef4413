use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Budget, JobContext, JobOutcome};
use crate::config::JobOptions;
use crate::db::models::{FixtureResult, FixtureState, UpcomingFixture};
use crate::feed::api::season_for;
use crate::feed::{with_retry, ResultsProvider, RetryPolicy};

const JOB: &str = "ingest";
/// Stored results re-checked for statistics per run.
const BACKFILL_LIMIT: i64 = 25;
/// A result whose statistics were asked for within this window is not asked again.
const STATS_RECHECK_HOURS: i64 = 24;

/// One unit of ingestion work: a league on a calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WorkItem {
    pub league_id: i64,
    pub date: NaiveDate,
}

impl WorkItem {
    pub fn cursor(&self) -> String {
        format!("{}:{}", self.league_id, self.date.format("%Y-%m-%d"))
    }

    pub fn parse_cursor(s: &str) -> Option<WorkItem> {
        let (league, date) = s.split_once(':')?;
        Some(WorkItem {
            league_id: league.parse().ok()?,
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?,
        })
    }
}

/// Every league × day in `[from, to]`, ordered, skipping what a previous
/// truncated run already finished.
pub fn plan(
    leagues: &[i64],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    resume_after: Option<WorkItem>,
) -> Vec<WorkItem> {
    let mut items = Vec::new();
    for &league_id in leagues {
        let mut date = from.date_naive();
        while date <= to.date_naive() {
            items.push(WorkItem { league_id, date });
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
    }
    items.sort();
    items.dedup();
    if let Some(after) = resume_after {
        if items.contains(&after) {
            items.retain(|i| *i > after);
        }
    }
    items
}

fn upcoming_from(r: &FixtureResult) -> UpcomingFixture {
    UpcomingFixture {
        fixture_id: r.fixture_id,
        league_id: r.league_id,
        season: r.season,
        home_team_id: r.home_team_id,
        away_team_id: r.away_team_id,
        kickoff_at: r.kickoff_at,
    }
}

fn needs_statistics(stored: Option<&FixtureResult>) -> bool {
    match stored {
        Some(r) => r.corners_home.is_none() || r.fouls_home.is_none() || r.cards_home.is_none(),
        None => true,
    }
}

struct Ingestor<'a> {
    ctx: &'a JobContext,
    provider: &'a dyn ResultsProvider,
    retry: RetryPolicy,
    delay: Duration,
    out: JobOutcome,
}

impl Ingestor<'_> {
    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Returns false when the budget ran out part-way through the item.
    async fn process(&mut self, item: WorkItem, budget: &mut Budget, now: DateTime<Utc>) -> Result<bool> {
        if !budget.take_call() {
            return Ok(false);
        }
        let provider = self.provider;
        let season = season_for(item.date);
        let fixtures = with_retry(&self.retry, "fixtures", || {
            provider.fixtures(item.league_id, season, item.date)
        })
        .await;
        self.pause().await;
        let fixtures = match fixtures {
            Ok(f) => f,
            Err(e) => {
                warn!("Fixtures for league {} on {} failed: {}", item.league_id, item.date, e);
                self.out.record_error(format!("{}: {}", item.cursor(), e));
                return Ok(true);
            }
        };

        for mut fixture in fixtures {
            self.out.scanned += 1;
            match fixture.state() {
                FixtureState::Finished => {
                    let stored = self.ctx.db.get_result(fixture.fixture_id)?;
                    let recheck_before = now - chrono::Duration::hours(STATS_RECHECK_HOURS);
                    let mut asked = false;
                    if needs_statistics(stored.as_ref())
                        && !self.ctx.db.stats_checked_since(fixture.fixture_id, recheck_before)?
                    {
                        if !budget.take_call() {
                            self.ctx.db.upsert_result(&fixture)?;
                            self.ctx.db.remove_upcoming(fixture.fixture_id)?;
                            return Ok(false);
                        }
                        let (id, home) = (fixture.fixture_id, fixture.home_team_id);
                        match with_retry(&self.retry, "statistics", || provider.statistics(id, home)).await {
                            Ok(stats) => stats.apply(&mut fixture),
                            Err(e) => self.out.record_error(format!("statistics {}: {}", id, e)),
                        }
                        self.pause().await;
                        asked = true;
                    }
                    self.ctx.db.upsert_result(&fixture)?;
                    if asked {
                        self.ctx.db.mark_stats_checked(fixture.fixture_id, now)?;
                    }
                    self.ctx.db.remove_upcoming(fixture.fixture_id)?;
                    self.out.succeeded += 1;
                }
                FixtureState::Cancelled => {
                    self.ctx.db.upsert_result(&fixture)?;
                    self.ctx.db.remove_upcoming(fixture.fixture_id)?;
                    self.out.succeeded += 1;
                }
                FixtureState::Scheduled if fixture.kickoff_at > now => {
                    self.ctx.db.upsert_upcoming(&upcoming_from(&fixture))?;
                    if !budget.take_call() {
                        return Ok(false);
                    }
                    let id = fixture.fixture_id;
                    match with_retry(&self.retry, "odds", || provider.odds(id)).await {
                        Ok(quotes) => {
                            for q in &quotes {
                                self.ctx.db.upsert_odds(q)?;
                            }
                            debug!("Stored {} quotes for fixture {}", quotes.len(), id);
                        }
                        Err(e) => self.out.record_error(format!("odds {}: {}", id, e)),
                    }
                    self.pause().await;
                    self.out.succeeded += 1;
                }
                _ => {
                    debug!("Fixture {} in status {}, nothing to store", fixture.fixture_id, fixture.status);
                }
            }
        }
        Ok(true)
    }

    /// Fetch statistics for stored results that still lack them, while calls
    /// remain. Each attempt is stamped so a provider that never reports a
    /// field is not asked again until the recheck window passes.
    async fn backfill(&mut self, budget: &mut Budget, now: DateTime<Utc>) -> Result<()> {
        let provider = self.provider;
        let recheck_before = now - chrono::Duration::hours(STATS_RECHECK_HOURS);
        for mut stored in self.ctx.db.results_missing_stats(BACKFILL_LIMIT, recheck_before)? {
            if !budget.take_call() {
                break;
            }
            let (id, home) = (stored.fixture_id, stored.home_team_id);
            match with_retry(&self.retry, "statistics", || provider.statistics(id, home)).await {
                Ok(stats) if !stats.is_empty() => {
                    stats.apply(&mut stored);
                    self.ctx.db.upsert_result(&stored)?;
                    self.out.succeeded += 1;
                }
                Ok(_) => debug!("No statistics yet for fixture {}", id),
                Err(e) => self.out.record_error(format!("statistics {}: {}", id, e)),
            }
            self.ctx.db.mark_stats_checked(id, now)?;
            self.pause().await;
        }
        Ok(())
    }
}

pub async fn run(
    ctx: &JobContext,
    opts: &JobOptions,
    budget: &mut Budget,
    now: DateTime<Utc>,
) -> Result<JobOutcome> {
    let provider = ctx
        .provider
        .as_deref()
        .ok_or_else(|| anyhow!("no sports data provider configured"))?;
    let leagues: Vec<i64> = if opts.league_whitelist.is_empty() {
        ctx.config.leagues.clone()
    } else {
        opts.league_whitelist.clone()
    };
    let window = chrono::Duration::hours(opts.window_hours);
    let (from, to) = (now - window, now + window);
    let resume = ctx.db.get_cursor(JOB)?.as_deref().and_then(WorkItem::parse_cursor);
    let items = plan(&leagues, from, to, resume);
    info!(
        "Ingesting {} league-days from {} ({} leagues)",
        items.len(),
        provider.name(),
        leagues.len()
    );

    let mut ing = Ingestor {
        ctx,
        provider,
        retry: ctx.config.retry_policy(),
        delay: Duration::from_millis(ctx.config.api_call_delay_ms),
        out: JobOutcome {
            window: Some((from, to)),
            ..Default::default()
        },
    };

    let mut last_done: Option<WorkItem> = None;
    for item in items {
        if !ing.process(item, budget, now).await? {
            ing.out.truncated = true;
            break;
        }
        last_done = Some(item);
    }

    if ing.out.truncated {
        // Resume after the last fully processed item
        let cursor = last_done.map(|i| i.cursor());
        if let Some(c) = &cursor {
            ctx.db.set_cursor(JOB, Some(c))?;
        }
        ing.out.cursor = cursor;
        info!("Ingest stopped at budget after {} API calls", budget.api_calls());
    } else {
        ctx.db.set_cursor(JOB, None)?;
        ing.backfill(budget, now).await?;
    }
    Ok(ing.out)
}
