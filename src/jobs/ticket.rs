use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{JobContext, JobOutcome};
use crate::calibration::WeightBook;
use crate::config::JobOptions;
use crate::db::models::{LegStatus, Ticket, TicketLeg, TicketStatus};
use crate::error::EngineError;
use crate::model::{generate_candidates, CandidateSelection, FixtureContext};
use crate::selection::{build_distinct_ticket, BuiltTicket, TicketRequest};
use crate::stats::{LeagueStatProfile, TeamStatProfile};

/// League weight rows need this many decided legs before they override global.
const MIN_LEAGUE_SAMPLE: u32 = 20;
const RESHUFFLE_ATTEMPTS: u32 = 5;
const RECENT_TICKET_DAYS: i64 = 7;

/// Score every upcoming fixture in the window against its stored odds.
pub fn collect_candidates(
    ctx: &JobContext,
    opts: &JobOptions,
    now: DateTime<Utc>,
) -> Result<(Vec<CandidateSelection>, usize)> {
    let until = now + chrono::Duration::hours(opts.window_hours);
    let fixtures = ctx.db.list_upcoming(now, until, &opts.league_whitelist)?;
    let weights = WeightBook::new(&ctx.db.load_performance_weights()?, MIN_LEAGUE_SAMPLE);
    let filter = ctx.config.candidate_filter();
    let adj = ctx.config.adjustments();

    let mut candidates = Vec::new();
    for fixture in &fixtures {
        let league_id = Some(fixture.league_id);
        let home = ctx
            .db
            .load_team_profile(fixture.home_team_id, league_id)?
            .unwrap_or_else(|| TeamStatProfile::empty(fixture.home_team_id, league_id, now));
        let away = ctx
            .db
            .load_team_profile(fixture.away_team_id, league_id)?
            .unwrap_or_else(|| TeamStatProfile::empty(fixture.away_team_id, league_id, now));
        let league = ctx
            .db
            .load_league_profile(fixture.league_id)?
            .unwrap_or_else(|| LeagueStatProfile::empty(fixture.league_id, now));
        let quotes = ctx.db.odds_for_fixture(fixture.fixture_id)?;
        let fx = FixtureContext {
            fixture,
            home: &home,
            away: &away,
            league: &league,
        };
        candidates.extend(
            generate_candidates(&fx, &quotes, &weights, adj, &filter)
                .into_iter()
                .filter(|c| c.is_current(now)),
        );
    }
    Ok((candidates, fixtures.len()))
}

/// Best-edge candidate for each requested locked fixture, in request order.
pub fn resolve_locked(
    candidates: &[CandidateSelection],
    fixture_ids: &[i64],
) -> Result<Vec<CandidateSelection>, EngineError> {
    fixture_ids
        .iter()
        .map(|&id| {
            candidates
                .iter()
                .filter(|c| c.fixture_id == id)
                .max_by(|a, b| a.edge.total_cmp(&b.edge))
                .cloned()
                .ok_or_else(|| {
                    EngineError::InvalidOptions(format!("no candidate for locked fixture {}", id))
                })
        })
        .collect()
}

fn to_ticket(built: &BuiltTicket, now: DateTime<Utc>) -> Ticket {
    let legs = built
        .legs
        .iter()
        .enumerate()
        .map(|(i, c)| TicketLeg {
            id: None,
            ticket_id: None,
            position: i as i32,
            fixture_id: c.fixture_id,
            league_id: c.league_id,
            market: c.selection.market.as_str().to_string(),
            side: c.selection.side.as_str().to_string(),
            line: c.selection.line,
            odds: c.odds,
            model_probability: c.model_probability,
            status: LegStatus::Pending,
            actual_value: None,
            settled_at: None,
        })
        .collect();
    Ticket {
        id: None,
        status: TicketStatus::Pending,
        content_hash: built.content_hash.clone(),
        seed: built.seed,
        total_odds: built.total_odds(),
        created_at: now,
        settled_at: None,
        legs,
    }
}

pub fn run(ctx: &JobContext, opts: &JobOptions, now: DateTime<Utc>) -> Result<JobOutcome> {
    let (candidates, fixtures) = collect_candidates(ctx, opts, now)?;
    if candidates.is_empty() {
        warn!("No candidates across {} upcoming fixtures", fixtures);
    }
    let locked = resolve_locked(&candidates, &opts.locked_fixture_ids)?;
    let req = TicketRequest {
        target_leg_count: opts.target_legs,
        min_odds: ctx.config.min_odds,
        max_odds: ctx.config.max_odds,
        seed: opts.seed,
    };
    let recent = ctx
        .db
        .recent_ticket_hashes(now - chrono::Duration::days(RECENT_TICKET_DAYS))?;
    let built = build_distinct_ticket(&candidates, &locked, &req, &recent, RESHUFFLE_ATTEMPTS)?;

    let ticket = to_ticket(&built, now);
    let id = ctx.db.insert_ticket(&ticket)?;
    info!(
        "Built ticket {} with {} legs @ {:.2} (seed {}, {} candidates)",
        id,
        ticket.legs.len(),
        ticket.total_odds,
        built.seed,
        candidates.len()
    );
    Ok(JobOutcome {
        scanned: candidates.len() as i64,
        succeeded: ticket.legs.len() as i64,
        window: Some((now, now + chrono::Duration::hours(opts.window_hours))),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{OddsQuote, UpcomingFixture};
    use crate::db::tests::memory_db;
    use crate::jobs::tests::context;
    use crate::markets::{MarketKind, Selection, Side};

    fn seed_fixtures(ctx: &JobContext, n: i64, now: DateTime<Utc>) {
        for i in 0..n {
            let fixture_id = 500 + i;
            ctx.db
                .upsert_upcoming(&UpcomingFixture {
                    fixture_id,
                    league_id: 39,
                    season: Some(2025),
                    home_team_id: 10 + i,
                    away_team_id: 50 + i,
                    kickoff_at: now + chrono::Duration::hours(3 + i),
                })
                .unwrap();
            for (market, side, line, odds) in [
                (MarketKind::TotalGoals, Side::Over, 1.5, 1.40),
                (MarketKind::BothTeamsScore, Side::Yes, 0.0, 2.0),
                (MarketKind::TotalGoals, Side::Under, 3.5, 1.45),
            ] {
                ctx.db
                    .upsert_odds(&OddsQuote {
                        fixture_id,
                        selection: Selection::new(market, side, line).unwrap(),
                        odds,
                        bookmaker: "book".into(),
                        fetched_at: now,
                    })
                    .unwrap();
            }
        }
    }

    fn wide_open() -> JobOptions {
        JobOptions { seed: Some(42), ..Default::default() }
    }

    #[test]
    fn builds_and_stores_a_ticket() {
        let db = memory_db();
        let mut ctx = context(db);
        let mut cfg = (*ctx.config).clone();
        cfg.min_edge = -1.0;
        ctx.config = std::sync::Arc::new(cfg);
        let now = Utc::now();
        seed_fixtures(&ctx, 6, now);

        let out = run(&ctx, &wide_open(), now).unwrap();
        assert_eq!(out.succeeded, 4);
        let tickets = ctx.db.list_tickets(5).unwrap();
        assert_eq!(tickets.len(), 1);
        let stored = ctx.db.get_ticket(tickets[0].id.unwrap()).unwrap().unwrap();
        assert_eq!(stored.seed, 42);
        let mut fixtures: Vec<i64> = stored.legs.iter().map(|l| l.fixture_id).collect();
        fixtures.sort();
        fixtures.dedup();
        assert_eq!(fixtures.len(), 4);

        // Same seed again reshuffles away from the stored ticket
        run(&ctx, &wide_open(), now).unwrap();
        let tickets = ctx.db.list_tickets(5).unwrap();
        assert_ne!(tickets[0].content_hash, tickets[1].content_hash);
    }

    #[test]
    fn locked_fixture_is_always_included() {
        let mut ctx = context(memory_db());
        let mut cfg = (*ctx.config).clone();
        cfg.min_edge = -1.0;
        ctx.config = std::sync::Arc::new(cfg);
        let now = Utc::now();
        seed_fixtures(&ctx, 6, now);
        let opts = JobOptions { locked_fixture_ids: vec![503], ..wide_open() };
        run(&ctx, &opts, now).unwrap();
        let id = ctx.db.list_tickets(1).unwrap()[0].id.unwrap();
        let stored = ctx.db.get_ticket(id).unwrap().unwrap();
        assert_eq!(stored.legs[0].fixture_id, 503);
    }

    #[test]
    fn too_few_fixtures_is_an_error() {
        let mut ctx = context(memory_db());
        let mut cfg = (*ctx.config).clone();
        cfg.min_edge = -1.0;
        ctx.config = std::sync::Arc::new(cfg);
        let now = Utc::now();
        seed_fixtures(&ctx, 2, now);
        let err = run(&ctx, &wide_open(), now).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InsufficientCandidates { available: 2, required: 4 })
        ));
        assert!(ctx.db.list_tickets(1).unwrap().is_empty());

        let missing = JobOptions { locked_fixture_ids: vec![999], ..wide_open() };
        assert!(run(&ctx, &missing, now).is_err());
    }
}
