use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

use super::{Budget, JobContext, JobOutcome};
use crate::config::JobOptions;
use crate::settlement::{run_settlement, SettlementConfig};

/// Settle batches until nothing is claimable or time runs out.
pub fn run_settle(
    ctx: &JobContext,
    opts: &JobOptions,
    budget: &Budget,
    token: &str,
    now: DateTime<Utc>,
) -> Result<JobOutcome> {
    let cfg = SettlementConfig {
        batch_size: opts.batch_size,
        claim_ttl: chrono::Duration::seconds(ctx.config.job_lock_ttl_secs),
    };
    let mut out = JobOutcome::default();
    loop {
        let summary = run_settlement(&ctx.db, token, &cfg, now)?;
        out.scanned += summary.scanned as i64;
        out.succeeded += (summary.settled + summary.positions_settled) as i64;
        for e in &summary.errors {
            out.record_error(e);
        }
        // Unscorable legs are released back to pending; they are not failures.
        let full_batch = summary.scanned as i64 >= cfg.batch_size;
        let progressed = summary.settled > 0;
        if !full_batch || !progressed {
            break;
        }
        if budget.out_of_time() {
            out.truncated = true;
            break;
        }
    }
    info!(
        "Settled {} of {} claimed legs, {} still pending",
        out.succeeded,
        out.scanned,
        ctx.db.pending_leg_count()?
    );
    Ok(out)
}

pub fn run_close_markets(ctx: &JobContext, now: DateTime<Utc>) -> Result<JobOutcome> {
    let closed = ctx.db.close_expired_markets(now)?;
    if closed > 0 {
        info!("Closed {} expired markets", closed);
    }
    Ok(JobOutcome {
        scanned: closed as i64,
        succeeded: closed as i64,
        ..Default::default()
    })
}
