use anyhow::{bail, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

mod calibration;
mod config;
mod dashboard;
mod db;
mod error;
mod feed;
mod jobs;
mod markets;
mod model;
mod selection;
mod settlement;
mod stats;

use config::{Command, Config, JobArgs};
use dashboard::AppState;
use db::Database;
use feed::{ApiFootball, ResultsProvider};
use jobs::{run_job, JobContext, JobName, JobStatus};
use markets::{BinaryOutcome, Selection};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let provider: Option<Arc<dyn ResultsProvider>> = match &config.sports_api_key {
        Some(key) if !key.is_empty() => {
            Some(Arc::new(ApiFootball::new(&config.sports_api_url, key)?))
        }
        _ => {
            warn!("SPORTS_API_KEY not set, ingestion is unavailable");
            None
        }
    };

    let command = config.command.clone();
    let ctx = JobContext {
        db: db.clone(),
        config: Arc::new(config),
        provider,
    };

    match command {
        Command::Serve => serve(ctx).await,
        Command::Ingest(args) => trigger(&ctx, JobName::Ingest, &args).await,
        Command::RefreshStats(args) => trigger(&ctx, JobName::RefreshStats, &args).await,
        Command::BuildTicket(args) => trigger(&ctx, JobName::BuildTicket, &args).await,
        Command::Settle(args) => trigger(&ctx, JobName::Settle, &args).await,
        Command::Calibrate(args) => trigger(&ctx, JobName::Calibrate, &args).await,
        Command::CloseMarkets(args) => trigger(&ctx, JobName::CloseMarkets, &args).await,
        Command::CreateMarket {
            question,
            closes_at,
            seed_liquidity,
            fixture_id,
            market,
            side,
            line,
        } => {
            let link = match (fixture_id, market, side) {
                (Some(id), Some(market), Some(side)) => {
                    let sel = Selection::new(market, side, line.unwrap_or(0.0))
                        .map_err(anyhow::Error::msg)?;
                    Some((id, sel))
                }
                _ => None,
            };
            let id = db.create_market(&question, closes_at, seed_liquidity, link)?;
            info!("Opened market {} closing at {}", id, closes_at);
            println!("{}", id);
            Ok(())
        }
        Command::CloseMarket { market_id } => {
            db.close_market(market_id)?;
            info!("Closed market {}", market_id);
            Ok(())
        }
        Command::ResolveMarket { market_id, outcome } => {
            let outcome = parse_resolution(&outcome)?;
            let summary = db.resolve_market(market_id, outcome, chrono::Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::PlaceBet {
            user_id,
            market_id,
            outcome,
            stake,
        } => {
            let position = db.place_bet(
                &user_id,
                market_id,
                outcome,
                stake,
                ctx.config.position_fee_rate,
                chrono::Utc::now(),
            )?;
            println!("{}", serde_json::to_string_pretty(&position)?);
            Ok(())
        }
        Command::Deposit { user_id, amount } => {
            db.deposit(&user_id, amount)?;
            println!("{:.2}", db.balance(&user_id)?);
            Ok(())
        }
        Command::Balance { user_id } => {
            println!("{:.2}", db.balance(&user_id)?);
            Ok(())
        }
    }
}

async fn serve(ctx: JobContext) -> Result<()> {
    let addr: SocketAddr = ctx.config.dashboard_addr.parse()?;
    let state = AppState {
        cron_key: ctx.config.cron_key.clone(),
        jobs: ctx,
    };
    if state.cron_key.is_none() {
        warn!("CRON_KEY not set, job triggers over HTTP are disabled");
    }
    let app = dashboard::router(state);
    info!("Ops API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn trigger(ctx: &JobContext, job: JobName, args: &JobArgs) -> Result<()> {
    let opts = args.parse_options()?;
    let report = run_job(ctx, job, &opts).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.status == JobStatus::Failed {
        error!("Job {} failed", job);
        bail!("job {} failed", job);
    }
    Ok(())
}

/// `yes`, `no`, or `void` for a refund.
fn parse_resolution(raw: &str) -> Result<Option<BinaryOutcome>> {
    if raw.trim().eq_ignore_ascii_case("void") {
        return Ok(None);
    }
    match raw.parse::<BinaryOutcome>() {
        Ok(o) => Ok(Some(o)),
        Err(e) => bail!("{} (expected yes, no or void)", e),
    }
}
