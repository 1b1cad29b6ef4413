use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::edge::{edge, expected_value};
use super::probability::{estimate, Adjustments, DataQuality};
use crate::calibration::WeightBook;
use crate::db::models::{OddsQuote, UpcomingFixture};
use crate::markets::Selection;
use crate::stats::{LeagueStatProfile, TeamStatProfile};

/// Filters applied when turning quotes into candidates.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    pub min_odds: f64,
    pub max_odds: f64,
    pub min_edge: f64,
    pub min_quality: DataQuality,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        CandidateFilter {
            min_odds: 1.25,
            max_odds: 3.5,
            min_edge: 0.0,
            min_quality: DataQuality::Low,
        }
    }
}

/// A scored, not-yet-chosen betting opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSelection {
    pub fixture_id: i64,
    pub league_id: i64,
    pub kickoff_at: DateTime<Utc>,
    pub selection: Selection,
    pub odds: f64,
    pub model_probability: f64,
    pub edge: f64,
    pub quality: DataQuality,
    /// Calibrated multiplier from settled history (1.0 when unknown)
    pub performance_weight: f64,
    /// Inputs the estimate was computed from
    pub combined_snapshot: serde_json::Value,
}

impl CandidateSelection {
    /// Only candidates on fixtures that have not kicked off are usable.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.kickoff_at > now
    }
}

/// Team and league context for one upcoming fixture.
pub struct FixtureContext<'a> {
    pub fixture: &'a UpcomingFixture,
    pub home: &'a TeamStatProfile,
    pub away: &'a TeamStatProfile,
    pub league: &'a LeagueStatProfile,
}

/// Score every quoted selection of a fixture, keeping the best price per
/// selection and dropping those outside the filter.
pub fn generate_candidates(
    ctx: &FixtureContext<'_>,
    quotes: &[OddsQuote],
    weights: &WeightBook,
    adj: Adjustments,
    filter: &CandidateFilter,
) -> Vec<CandidateSelection> {
    let mut best: HashMap<String, &OddsQuote> = HashMap::new();
    for q in quotes.iter().filter(|q| q.fixture_id == ctx.fixture.fixture_id) {
        let key = q.selection.canonical();
        match best.get(&key) {
            Some(existing) if existing.odds >= q.odds => {}
            _ => {
                best.insert(key, q);
            }
        }
    }

    let mut out: Vec<CandidateSelection> = best
        .into_values()
        .filter(|q| q.odds >= filter.min_odds && q.odds <= filter.max_odds)
        .filter_map(|q| {
            let est = estimate(&q.selection, ctx.home, ctx.away, ctx.league, adj);
            let e = edge(est.probability, q.odds);
            if e < filter.min_edge || est.quality < filter.min_quality {
                return None;
            }
            let metric = q.selection.market.metric();
            Some(CandidateSelection {
                fixture_id: ctx.fixture.fixture_id,
                league_id: ctx.fixture.league_id,
                kickoff_at: ctx.fixture.kickoff_at,
                selection: q.selection,
                odds: q.odds,
                model_probability: est.probability,
                edge: e,
                quality: est.quality,
                performance_weight: weights.weight_for(&q.selection, ctx.fixture.league_id),
                combined_snapshot: serde_json::json!({
                    "lambda_home": est.lambda_home,
                    "lambda_away": est.lambda_away,
                    "expected_total": est.expected_total(),
                    "model_probability": est.model_probability,
                    "empirical_probability": est.empirical_probability,
                    "expected_value": expected_value(est.probability, q.odds),
                    "home_sample": ctx.home.metric(metric).sample,
                    "away_sample": ctx.away.metric(metric).sample,
                    "league_matches": ctx.league.matches_count,
                    "quality": est.quality.as_str(),
                    "bookmaker": q.bookmaker,
                }),
            })
        })
        .collect();
    out.sort_by(|a, b| a.selection.canonical().cmp(&b.selection.canonical()));
    out
}
