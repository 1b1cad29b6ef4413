use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

use super::{JobContext, JobOutcome};
use crate::calibration::recalibrate;
use crate::config::JobOptions;

/// Recompute every performance weight from the lookback window.
pub fn run(ctx: &JobContext, opts: &JobOptions, now: DateTime<Utc>) -> Result<JobOutcome> {
    let since = now - chrono::Duration::days(opts.lookback_days);
    let legs = ctx.db.settled_legs_since(since)?;
    let weights = recalibrate(&legs, now);
    ctx.db.replace_performance_weights(&weights)?;
    info!("Calibrated {} weight keys from {} settled legs", weights.len(), legs.len());
    Ok(JobOutcome {
        scanned: legs.len() as i64,
        succeeded: weights.len() as i64,
        window: Some((since, now)),
        ..Default::default()
    })
}
