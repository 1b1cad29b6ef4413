//! Scheduled / on-demand jobs.
//!
//! Every invocation takes a named lock (a concurrent run of the same job is
//! reported as `skipped`), works within a wall-clock and API-call budget,
//! and appends one audit row to `job_runs`.
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub mod calibrate;
pub mod ingest;
pub mod refresh;
pub mod settle;
pub mod ticket;

use crate::config::{Config, JobOptions};
use crate::db::models::JobRun;
use crate::db::Database;
use crate::feed::ResultsProvider;

/// Errors kept in the report and audit row.
const MAX_REPORTED_ERRORS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobName {
    Ingest,
    RefreshStats,
    BuildTicket,
    Settle,
    Calibrate,
    CloseMarkets,
}

impl JobName {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobName::Ingest => "ingest",
            JobName::RefreshStats => "refresh-stats",
            JobName::BuildTicket => "build-ticket",
            JobName::Settle => "settle",
            JobName::Calibrate => "calibrate",
            JobName::CloseMarkets => "close-markets",
        }
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "ingest" => Ok(JobName::Ingest),
            "refresh-stats" => Ok(JobName::RefreshStats),
            "build-ticket" => Ok(JobName::BuildTicket),
            "settle" => Ok(JobName::Settle),
            "calibrate" => Ok(JobName::Calibrate),
            "close-markets" => Ok(JobName::CloseMarkets),
            other => Err(format!("unknown job '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ok,
    /// Some items failed or the budget ran out before the work did
    Partial,
    /// Another run holds the lock
    Skipped,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ok => "ok",
            JobStatus::Partial => "partial",
            JobStatus::Skipped => "skipped",
            JobStatus::Failed => "failed",
        }
    }
}

/// Wall-clock deadline plus a cap on provider calls.
#[derive(Debug)]
pub struct Budget {
    deadline: Instant,
    max_api_calls: u32,
    api_calls: u32,
}

impl Budget {
    pub fn new(max_runtime: Duration, max_api_calls: u32) -> Self {
        Budget {
            deadline: Instant::now() + max_runtime,
            max_api_calls,
            api_calls: 0,
        }
    }

    pub fn out_of_time(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn api_calls(&self) -> u32 {
        self.api_calls
    }

    /// Reserve one provider call. False once time or calls are used up.
    pub fn take_call(&mut self) -> bool {
        if self.out_of_time() || self.api_calls >= self.max_api_calls {
            return false;
        }
        self.api_calls += 1;
        true
    }
}

/// What a job body reports back to the runner.
#[derive(Debug, Default)]
pub struct JobOutcome {
    pub scanned: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub errors: Vec<String>,
    /// Where a truncated run should resume
    pub cursor: Option<String>,
    /// True if the budget ended the run early
    pub truncated: bool,
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl JobOutcome {
    pub fn record_error(&mut self, e: impl fmt::Display) {
        self.failed += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(e.to_string());
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job: JobName,
    pub status: JobStatus,
    pub scanned: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub errors: Vec<String>,
    pub cursor: Option<String>,
    pub duration_ms: i64,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

/// Everything a job needs.
#[derive(Clone)]
pub struct JobContext {
    pub db: Database,
    pub config: Arc<Config>,
    pub provider: Option<Arc<dyn ResultsProvider>>,
}

fn run_token(job: JobName) -> String {
    format!(
        "{}-{}-{:08x}",
        job,
        std::process::id(),
        rand::random::<u32>()
    )
}

/// Run one job under its lock and record the audit row.
pub async fn run_job(ctx: &JobContext, job: JobName, opts: &JobOptions) -> Result<RunReport> {
    let started_at = Utc::now();
    let clock = Instant::now();
    let token = run_token(job);
    let ttl = chrono::Duration::seconds(ctx.config.job_lock_ttl_secs);

    if !ctx.db.try_acquire_job_lock(job.as_str(), &token, started_at, ttl)? {
        info!("Job {} already running elsewhere, skipping", job);
        let report = RunReport {
            job,
            status: JobStatus::Skipped,
            scanned: 0,
            succeeded: 0,
            failed: 0,
            errors: Vec::new(),
            cursor: None,
            duration_ms: clock.elapsed().as_millis() as i64,
            window_start: None,
            window_end: None,
        };
        audit(&ctx.db, &report, started_at);
        return Ok(report);
    }

    let mut budget = Budget::new(
        Duration::from_secs(ctx.config.max_runtime_secs),
        opts.max_api_calls,
    );
    info!("Job {} started ({})", job, token);
    let result = match job {
        JobName::Ingest => ingest::run(ctx, opts, &mut budget, started_at).await,
        JobName::RefreshStats => refresh::run(ctx, opts, &budget, started_at),
        JobName::BuildTicket => ticket::run(ctx, opts, started_at),
        JobName::Settle => settle::run_settle(ctx, opts, &budget, &token, started_at),
        JobName::Calibrate => calibrate::run(ctx, opts, started_at),
        JobName::CloseMarkets => settle::run_close_markets(ctx, started_at),
    };

    if let Err(e) = ctx.db.release_job_lock(job.as_str(), &token) {
        warn!("Failed to release lock for {}: {:#}", job, e);
    }

    let duration_ms = clock.elapsed().as_millis() as i64;
    let report = match result {
        Ok(out) => {
            let status = if out.failed > 0 || out.truncated {
                JobStatus::Partial
            } else {
                JobStatus::Ok
            };
            RunReport {
                job,
                status,
                scanned: out.scanned,
                succeeded: out.succeeded,
                failed: out.failed,
                errors: out.errors,
                cursor: out.cursor,
                duration_ms,
                window_start: out.window.map(|w| w.0),
                window_end: out.window.map(|w| w.1),
            }
        }
        Err(e) => {
            error!("Job {} failed: {:#}", job, e);
            RunReport {
                job,
                status: JobStatus::Failed,
                scanned: 0,
                succeeded: 0,
                failed: 1,
                errors: vec![format!("{:#}", e)],
                cursor: None,
                duration_ms,
                window_start: None,
                window_end: None,
            }
        }
    };
    info!(
        "Job {} {}: scanned={} ok={} failed={} in {}ms",
        job,
        report.status.as_str(),
        report.scanned,
        report.succeeded,
        report.failed,
        report.duration_ms
    );
    audit(&ctx.db, &report, started_at);
    Ok(report)
}

fn audit(db: &Database, report: &RunReport, started_at: DateTime<Utc>) {
    let row = JobRun {
        id: None,
        job: report.job.as_str().to_string(),
        status: report.status.as_str().to_string(),
        window_start: report.window_start,
        window_end: report.window_end,
        scanned: report.scanned,
        succeeded: report.succeeded,
        failed: report.failed,
        error_text: if report.errors.is_empty() {
            None
        } else {
            Some(report.errors.join("; "))
        },
        cursor: report.cursor.clone(),
        duration_ms: report.duration_ms,
        started_at,
    };
    if let Err(e) = db.insert_job_run(&row) {
        error!("Failed to record job run for {}: {:#}", report.job, e);
    }
}
