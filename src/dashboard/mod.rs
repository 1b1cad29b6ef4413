use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::config::JobOptions;
use crate::db::models::{MarketPosition, PredictionMarket};
use crate::error::EngineError;
use crate::jobs::{run_job, JobContext, JobName, JobStatus};

pub const CRON_KEY_HEADER: &str = "x-cron-key";

#[derive(Clone)]
pub struct AppState {
    pub jobs: JobContext,
    /// Triggers are refused entirely when unset
    pub cron_key: Option<String>,
}

/// Build the Axum router for the ops API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/tickets", get(tickets_handler))
        .route("/api/tickets/:id", get(ticket_handler))
        .route("/api/weights", get(weights_handler))
        .route("/api/job-runs", get(job_runs_handler))
        .route("/api/markets", get(markets_handler))
        .route("/api/markets/:id", get(market_handler))
        .route("/jobs/:name", post(trigger_job_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

impl ListQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn index_handler() -> impl IntoResponse {
    Html(INDEX_HTML)
}

/// GET /api/tickets?limit=50
async fn tickets_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state.jobs.db.list_tickets(q.limit()).map(Json).map_err(internal)
}

/// GET /api/tickets/:id
async fn ticket_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match state.jobs.db.get_ticket(id).map_err(internal)? {
        Some(t) => Ok(Json(t)),
        None => Err((StatusCode::NOT_FOUND, format!("ticket {} not found", id))),
    }
}

/// GET /api/weights
async fn weights_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state.jobs.db.load_performance_weights().map(Json).map_err(internal)
}

/// GET /api/job-runs?limit=50
async fn job_runs_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state.jobs.db.list_job_runs(q.limit()).map(Json).map_err(internal)
}

/// GET /api/markets?limit=50
async fn markets_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state.jobs.db.list_markets(q.limit()).map(Json).map_err(internal)
}

#[derive(Serialize)]
struct MarketDetail {
    market: PredictionMarket,
    positions: Vec<MarketPosition>,
}

/// GET /api/markets/:id
async fn market_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let db = &state.jobs.db;
    let Some(market) = db.get_market(id).map_err(internal)? else {
        return Err((StatusCode::NOT_FOUND, format!("market {} not found", id)));
    };
    let positions = db.positions_for_market(id).map_err(internal)?;
    Ok(Json(MarketDetail { market, positions }))
}

fn authorize(expected: Option<&str>, headers: &HeaderMap) -> Result<(), EngineError> {
    let given = headers.get(CRON_KEY_HEADER).and_then(|v| v.to_str().ok());
    match (expected, given) {
        (Some(want), Some(got)) if !want.is_empty() && want == got => Ok(()),
        _ => Err(EngineError::Unauthorized),
    }
}

/// POST /jobs/:name with optional JSON options body
async fn trigger_job_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(e) = authorize(state.cron_key.as_deref(), &headers) {
        warn!("Rejected trigger for job '{}'", name);
        return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
    }
    let job: JobName = match name.parse() {
        Ok(j) => j,
        Err(e) => return (StatusCode::NOT_FOUND, e).into_response(),
    };
    let opts = match JobOptions::from_json(&body) {
        Ok(o) => o,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    match run_job(&state.jobs, job, &opts).await {
        Ok(report) => {
            let code = if report.status == JobStatus::Failed {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            (code, Json(report)).into_response()
        }
        Err(e) => internal(e).into_response(),
    }
}

/// Minimal read-only overview page.
const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Matchday Engine</title>
<style>
  body { background: #0f1117; color: #e0e0e0; font-family: system-ui, sans-serif; padding: 1.5rem; }
  h2 { font-size: 1rem; color: #8888aa; text-transform: uppercase; margin-top: 2rem; }
  table { border-collapse: collapse; width: 100%; font-size: .85rem; }
  th, td { text-align: left; padding: .35rem .6rem; border-bottom: 1px solid #2a2d3a; }
  .won { color: #00c896; } .lost { color: #ff4f6a; } .partial, .skipped { color: #e0b341; }
</style>
</head>
<body>
<h1>Matchday Engine</h1>
<h2>Tickets</h2>
<table id="tickets"><thead><tr><th>#</th><th>Status</th><th>Odds</th><th>Created</th></tr></thead><tbody></tbody></table>
<h2>Job runs</h2>
<table id="runs"><thead><tr><th>Job</th><th>Status</th><th>Scanned</th><th>OK</th><th>Failed</th><th>ms</th><th>Started</th></tr></thead><tbody></tbody></table>
<script>
function rows(id, items, cells) {
  const body = document.querySelector('#' + id + ' tbody');
  body.replaceChildren(...items.map(i => {
    const tr = document.createElement('tr');
    for (const c of cells(i)) {
      const td = document.createElement('td');
      if (Array.isArray(c)) {
        td.textContent = c[0];
        td.className = String(c[1]);
      } else {
        td.textContent = c == null ? '' : String(c);
      }
      tr.appendChild(td);
    }
    return tr;
  }));
}
async function load() {
  const tickets = await (await fetch('/api/tickets?limit=25')).json();
  rows('tickets', tickets, t => [t.id, [t.status, t.status], t.total_odds.toFixed(2), t.created_at]);
  const runs = await (await fetch('/api/job-runs?limit=25')).json();
  rows('runs', runs, r => [r.job, [r.status, r.status],
    r.scanned, r.succeeded, r.failed, r.duration_ms, r.started_at]);
}
load();
setInterval(load, 30000);
</script>
</body>
</html>
"#;
