use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::markets::Metric;

/// Neutral rate reported when a boolean metric has no qualifying matches.
pub const NEUTRAL_RATE: f64 = 0.5;

/// League totals used when a league has no qualifying matches at all.
pub fn default_league_total(metric: Metric) -> f64 {
    match metric {
        Metric::Goals => 2.6,
        Metric::Corners => 10.0,
        Metric::Cards => 4.2,
        Metric::Fouls => 24.0,
        Metric::Offsides => 4.0,
    }
}

/// Count of matches satisfying a condition out of the qualifying sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    pub hits: u32,
    pub sample: u32,
}

impl RateSample {
    pub fn record(&mut self, hit: bool) {
        self.sample += 1;
        if hit {
            self.hits += 1;
        }
    }

    pub fn rate(&self) -> f64 {
        if self.sample == 0 {
            NEUTRAL_RATE
        } else {
            self.hits as f64 / self.sample as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LineRate {
    pub line: f64,
    pub over: RateSample,
}

/// Per-team rolling averages of one metric, from the team's point of view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricAverages {
    /// Matches where both sides' values were present
    pub sample: u32,
    pub avg_for: f64,
    pub avg_against: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStatProfile {
    pub team_id: i64,
    pub league_id: Option<i64>,
    /// Matches considered after windowing and truncation (<= max_sample)
    pub sample_size: u32,
    pub metrics: BTreeMap<Metric, MetricAverages>,
    pub over_rates: BTreeMap<Metric, Vec<LineRate>>,
    pub btts: RateSample,
    pub wins: RateSample,
    pub draws: RateSample,
    pub losses: RateSample,
    pub computed_at: DateTime<Utc>,
}

impl TeamStatProfile {
    /// Profile of a team with no history.
    pub fn empty(team_id: i64, league_id: Option<i64>, now: DateTime<Utc>) -> Self {
        TeamStatProfile {
            team_id,
            league_id,
            sample_size: 0,
            metrics: BTreeMap::new(),
            over_rates: BTreeMap::new(),
            btts: RateSample::default(),
            wins: RateSample::default(),
            draws: RateSample::default(),
            losses: RateSample::default(),
            computed_at: now,
        }
    }

    pub fn metric(&self, metric: Metric) -> MetricAverages {
        self.metrics.get(&metric).copied().unwrap_or_default()
    }

    pub fn over_rate(&self, metric: Metric, line: f64) -> Option<RateSample> {
        find_line(self.over_rates.get(&metric)?, line)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricTotals {
    pub sample: u32,
    pub avg_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueStatProfile {
    pub league_id: i64,
    pub matches_count: u32,
    pub totals: BTreeMap<Metric, MetricTotals>,
    pub over_rates: BTreeMap<Metric, Vec<LineRate>>,
    pub btts: RateSample,
    pub home_wins: RateSample,
    pub draws: RateSample,
    pub away_wins: RateSample,
    pub computed_at: DateTime<Utc>,
}

impl LeagueStatProfile {
    pub fn empty(league_id: i64, now: DateTime<Utc>) -> Self {
        LeagueStatProfile {
            league_id,
            matches_count: 0,
            totals: BTreeMap::new(),
            over_rates: BTreeMap::new(),
            btts: RateSample::default(),
            home_wins: RateSample::default(),
            draws: RateSample::default(),
            away_wins: RateSample::default(),
            computed_at: now,
        }
    }

    /// Average match total for a metric, falling back to a fixed prior.
    pub fn avg_total(&self, metric: Metric) -> f64 {
        match self.totals.get(&metric) {
            Some(t) if t.sample > 0 && t.avg_total > 0.0 => t.avg_total,
            _ => default_league_total(metric),
        }
    }

    pub fn avg_per_team(&self, metric: Metric) -> f64 {
        self.avg_total(metric) / 2.0
    }

    pub fn over_rate(&self, metric: Metric, line: f64) -> Option<RateSample> {
        find_line(self.over_rates.get(&metric)?, line)
    }
}

fn find_line(rates: &[LineRate], line: f64) -> Option<RateSample> {
    rates
        .iter()
        .find(|r| (r.line - line).abs() < 1e-9)
        .map(|r| r.over)
}
