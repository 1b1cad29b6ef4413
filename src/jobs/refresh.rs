use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::{Budget, JobContext, JobOutcome};
use crate::config::JobOptions;
use crate::stats::{aggregate_league, aggregate_teams, is_stale, window_start, ResultSource};

/// Recompute league and team profiles whose cache is stale (or all, with `force`).
pub fn run(
    ctx: &JobContext,
    opts: &JobOptions,
    budget: &Budget,
    now: DateTime<Utc>,
) -> Result<JobOutcome> {
    let cfg = ctx.config.aggregation();
    let max_age = chrono::Duration::hours(ctx.config.stats_max_age_hours);
    let since = window_start(now, cfg.window_months);
    let mut out = JobOutcome {
        window: Some((since, now)),
        ..Default::default()
    };

    let pairs = ctx.db.teams_with_results(since, &opts.league_whitelist)?;
    let leagues: BTreeSet<i64> = pairs.iter().map(|&(_, league)| league).collect();

    for league_id in leagues {
        if budget.out_of_time() {
            out.truncated = true;
            return Ok(out);
        }
        out.scanned += 1;
        if !opts.force {
            if let Some(p) = ctx.db.load_league_profile(league_id)? {
                if !is_stale(p.computed_at, now, max_age) {
                    debug!("League {} profile fresh, skipping", league_id);
                    continue;
                }
            }
        }
        match ctx.db.league_results(league_id, since) {
            Ok(results) => {
                ctx.db.save_league_profile(&aggregate_league(league_id, &results, &cfg, now))?;
                out.succeeded += 1;
            }
            Err(e) => {
                warn!("League {} results unavailable: {:#}", league_id, e);
                out.record_error(format!("league {}: {:#}", league_id, e));
            }
        }
    }

    let mut due = Vec::new();
    for &(team_id, league_id) in &pairs {
        out.scanned += 1;
        let fresh = match ctx.db.team_profile_computed_at(team_id, Some(league_id))? {
            Some(at) => !is_stale(at, now, max_age),
            None => false,
        };
        if opts.force || !fresh {
            due.push((team_id, Some(league_id)));
        }
    }

    for chunk in due.chunks(opts.batch_size.max(1) as usize) {
        if budget.out_of_time() {
            out.truncated = true;
            break;
        }
        let batch = aggregate_teams(&ctx.db, chunk, &cfg, now);
        for profile in &batch.profiles {
            ctx.db.save_team_profile(profile)?;
            out.succeeded += 1;
        }
        for (team_id, e) in batch.errors {
            out.record_error(format!("team {}: {}", team_id, e));
        }
    }

    info!(
        "Stats refresh: {} teams due of {}, {} profiles written",
        due.len(),
        pairs.len(),
        out.succeeded
    );
    Ok(out)
}
