use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EngineError;
use crate::feed::RetryPolicy;
use crate::markets::{BinaryOutcome, MarketKind, Side};
use crate::model::{Adjustments, CandidateFilter};
use crate::stats::AggregationConfig;

/// Football stats, probability and ticket settlement engine
#[derive(Parser, Debug, Clone)]
#[command(name = "matchday-engine", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "matchday.db", global = true)]
    pub database_path: String,

    /// Ops API listen address
    #[arg(long, env = "DASHBOARD_ADDR", default_value = "0.0.0.0:8080")]
    pub dashboard_addr: String,

    /// Sports data API base URL
    #[arg(
        long,
        env = "SPORTS_API_URL",
        default_value = "https://v3.football.api-sports.io"
    )]
    pub sports_api_url: String,

    /// Sports data API key (required for ingest)
    #[arg(long, env = "SPORTS_API_KEY")]
    pub sports_api_key: Option<String>,

    /// Shared secret for on-demand job triggers
    #[arg(long, env = "CRON_KEY")]
    pub cron_key: Option<String>,

    /// Comma-separated league ids to ingest
    #[arg(long, env = "LEAGUES", value_delimiter = ',', default_value = "39,140,135,78,61")]
    pub leagues: Vec<i64>,

    /// Aggregation window in months
    #[arg(long, env = "WINDOW_MONTHS", default_value = "12")]
    pub window_months: u32,

    /// Most recent matches per team profile
    #[arg(long, env = "MAX_SAMPLE", default_value = "10")]
    pub max_sample: usize,

    /// Most recent matches per league profile
    #[arg(long, env = "LEAGUE_MAX_SAMPLE", default_value = "400")]
    pub league_max_sample: usize,

    #[arg(long, env = "HOME_ADJUSTMENT", default_value = "1.05")]
    pub home_adjustment: f64,

    #[arg(long, env = "AWAY_ADJUSTMENT", default_value = "0.95")]
    pub away_adjustment: f64,

    /// Lowest decimal odds a leg may carry
    #[arg(long, env = "MIN_ODDS", default_value = "1.25")]
    pub min_odds: f64,

    /// Highest decimal odds a leg may carry
    #[arg(long, env = "MAX_ODDS", default_value = "3.5")]
    pub max_odds: f64,

    /// Minimum model edge for a candidate (e.g. 0.02 = 2 points)
    #[arg(long, env = "MIN_EDGE", default_value = "0.0")]
    pub min_edge: f64,

    /// Fee taken from every prediction-market stake
    #[arg(long, env = "POSITION_FEE_RATE", default_value = "0.02")]
    pub position_fee_rate: f64,

    /// Pause between consecutive provider calls
    #[arg(long, env = "API_CALL_DELAY_MS", default_value = "250")]
    pub api_call_delay_ms: u64,

    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "4")]
    pub retry_max_attempts: u32,

    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "500")]
    pub retry_base_delay_ms: u64,

    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "8000")]
    pub retry_max_delay_ms: u64,

    /// Cached profiles younger than this are not recomputed
    #[arg(long, env = "STATS_MAX_AGE_HOURS", default_value = "12")]
    pub stats_max_age_hours: i64,

    /// A job lock older than this is considered abandoned
    #[arg(long, env = "JOB_LOCK_TTL_SECS", default_value = "900")]
    pub job_lock_ttl_secs: i64,

    /// Wall-clock budget for one job invocation
    #[arg(long, env = "MAX_RUNTIME_SECS", default_value = "50")]
    pub max_runtime_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the ops API
    Serve,
    /// Pull fixtures, results, statistics and odds from the provider
    Ingest(JobArgs),
    /// Recompute team and league stat profiles
    RefreshStats(JobArgs),
    /// Generate candidates and build one ticket
    BuildTicket(JobArgs),
    /// Settle legs, tickets and fixture-linked markets
    Settle(JobArgs),
    /// Recompute performance weights from settled legs
    Calibrate(JobArgs),
    /// Close markets past their close time
    CloseMarkets(JobArgs),
    /// Open a prediction market, optionally linked to a fixture selection
    CreateMarket {
        #[arg(long)]
        question: String,
        /// RFC 3339, e.g. 2026-03-01T15:00:00Z
        #[arg(long)]
        closes_at: DateTime<Utc>,
        #[arg(long, default_value_t = 0.0)]
        seed_liquidity: f64,
        #[arg(long, requires_all = ["market", "side"])]
        fixture_id: Option<i64>,
        #[arg(long)]
        market: Option<MarketKind>,
        #[arg(long)]
        side: Option<Side>,
        /// Omit for btts and 1x2
        #[arg(long)]
        line: Option<f64>,
    },
    /// Stop taking positions on a market
    CloseMarket {
        #[arg(long)]
        market_id: i64,
    },
    /// Resolve a prediction market (yes, no or void)
    ResolveMarket {
        #[arg(long)]
        market_id: i64,
        #[arg(long)]
        outcome: String,
    },
    /// Take a position in a prediction market
    PlaceBet {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        market_id: i64,
        #[arg(long)]
        outcome: BinaryOutcome,
        #[arg(long)]
        stake: f64,
    },
    /// Credit a user's account
    Deposit {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        amount: f64,
    },
    /// Print a user's balance
    Balance {
        #[arg(long)]
        user_id: String,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct JobArgs {
    /// JSON job options, e.g. '{"force":true}'
    #[arg(long, default_value = "{}")]
    pub options: String,
}

impl JobArgs {
    pub fn parse_options(&self) -> Result<JobOptions, EngineError> {
        JobOptions::from_json(&self.options)
    }
}

/// Longest look-back/ahead a trigger may ask for.
pub const MAX_WINDOW_HOURS: i64 = 24 * 366;
pub const MAX_LOOKBACK_DAYS: i64 = 3650;

/// Trigger options shared by every job. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Ingestion looks this far back and ahead; ticket building looks ahead
    pub window_hours: i64,
    /// Recompute even if cached stats are fresh
    pub force: bool,
    pub batch_size: i64,
    pub league_whitelist: Vec<i64>,
    pub max_api_calls: u32,
    /// Settled-leg history used by calibration
    pub lookback_days: i64,
    pub target_legs: usize,
    pub seed: Option<u64>,
    pub locked_fixture_ids: Vec<i64>,
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions {
            window_hours: 48,
            force: false,
            batch_size: 200,
            league_whitelist: Vec::new(),
            max_api_calls: 100,
            lookback_days: 90,
            target_legs: 4,
            seed: None,
            locked_fixture_ids: Vec::new(),
        }
    }
}

impl JobOptions {
    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        let raw = raw.trim();
        let opts: JobOptions = if raw.is_empty() {
            JobOptions::default()
        } else {
            serde_json::from_str(raw).map_err(|e| EngineError::InvalidOptions(e.to_string()))?
        };
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(1..=MAX_WINDOW_HOURS).contains(&self.window_hours) {
            return Err(EngineError::InvalidOptions(format!(
                "window_hours must be in 1..={}",
                MAX_WINDOW_HOURS
            )));
        }
        if self.batch_size <= 0 {
            return Err(EngineError::InvalidOptions("batch_size must be positive".into()));
        }
        if !(1..=MAX_LOOKBACK_DAYS).contains(&self.lookback_days) {
            return Err(EngineError::InvalidOptions(format!(
                "lookback_days must be in 1..={}",
                MAX_LOOKBACK_DAYS
            )));
        }
        if self.target_legs == 0 {
            return Err(EngineError::InvalidOptions("target_legs must be at least 1".into()));
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_odds <= 1.0 || self.max_odds < self.min_odds {
            anyhow::bail!("odds range must satisfy 1.0 < min_odds <= max_odds");
        }
        if !(0.0..1.0).contains(&self.position_fee_rate) {
            anyhow::bail!("position_fee_rate must be in [0.0, 1.0)");
        }
        if self.home_adjustment <= 0.0 || self.away_adjustment <= 0.0 {
            anyhow::bail!("venue adjustments must be positive");
        }
        if self.window_months == 0 || self.max_sample == 0 || self.league_max_sample == 0 {
            anyhow::bail!("window_months, max_sample and league_max_sample must be positive");
        }
        if self.retry_max_attempts == 0 {
            anyhow::bail!("retry_max_attempts must be at least 1");
        }
        if self.job_lock_ttl_secs <= 0 || self.max_runtime_secs == 0 {
            anyhow::bail!("job_lock_ttl_secs and max_runtime_secs must be positive");
        }
        if matches!(self.command, Command::Ingest(_)) && self.sports_api_key.is_none() {
            anyhow::bail!("SPORTS_API_KEY is required for ingest");
        }
        Ok(())
    }

    pub fn aggregation(&self) -> AggregationConfig {
        AggregationConfig {
            window_months: self.window_months,
            max_sample: self.max_sample,
            league_max_sample: self.league_max_sample,
            ..Default::default()
        }
    }

    pub fn adjustments(&self) -> Adjustments {
        Adjustments {
            home: self.home_adjustment,
            away: self.away_adjustment,
        }
    }

    pub fn candidate_filter(&self) -> CandidateFilter {
        CandidateFilter {
            min_odds: self.min_odds,
            max_odds: self.max_odds,
            min_edge: self.min_edge,
            ..Default::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            ..Default::default()
        }
    }
}
