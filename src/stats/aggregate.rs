//! Rolling per-team and per-league aggregates.
//!
//! Everything here is a pure function of the match list and an injected
//! `now`; the cache tables only store what these functions return.

use anyhow::Result;
use chrono::{DateTime, Duration, Months, Utc};
use std::collections::BTreeMap;
use tracing::warn;

use super::profile::{
    LeagueStatProfile, LineRate, MetricAverages, MetricTotals, RateSample, TeamStatProfile,
};
use crate::db::models::FixtureResult;
use crate::markets::Metric;

#[derive(Debug, Clone)]
pub struct AggregationConfig {
    pub window_months: u32,
    /// Last-N matches per team (typically 5–10)
    pub max_sample: usize,
    pub league_max_sample: usize,
    /// Lines for which empirical over-rates are tracked
    pub over_lines: BTreeMap<Metric, Vec<f64>>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        let mut over_lines = BTreeMap::new();
        over_lines.insert(Metric::Goals, vec![0.5, 1.5, 2.5, 3.5]);
        over_lines.insert(Metric::Corners, vec![8.5, 9.5, 10.5]);
        over_lines.insert(Metric::Cards, vec![3.5, 4.5, 5.5]);
        over_lines.insert(Metric::Fouls, vec![21.5, 23.5, 25.5]);
        AggregationConfig {
            window_months: 12,
            max_sample: 10,
            league_max_sample: 400,
            over_lines,
        }
    }
}

/// Start of the lookback window.
pub fn window_start(now: DateTime<Utc>, window_months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(window_months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn is_stale(computed_at: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> bool {
    now - computed_at > max_age
}

/// Finished matches in `(since, now]`, newest first, truncated to `max`.
fn recent_finished<'a>(
    results: impl Iterator<Item = &'a FixtureResult>,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
    max: usize,
) -> Vec<&'a FixtureResult> {
    let mut matches: Vec<&FixtureResult> = results
        .filter(|r| r.is_finished() && r.kickoff_at > since && r.kickoff_at <= now)
        .collect();
    matches.sort_by(|a, b| {
        b.kickoff_at
            .cmp(&a.kickoff_at)
            .then(b.fixture_id.cmp(&a.fixture_id))
    });
    matches.truncate(max);
    matches
}

fn line_rates(lines: &[f64]) -> Vec<LineRate> {
    lines
        .iter()
        .map(|&line| LineRate { line, over: RateSample::default() })
        .collect()
}

fn record_over_rates(
    over_rates: &mut BTreeMap<Metric, Vec<LineRate>>,
    result: &FixtureResult,
) {
    for (metric, rates) in over_rates.iter_mut() {
        if let Some(total) = result.total(*metric) {
            for rate in rates.iter_mut() {
                rate.over.record(total as f64 > rate.line);
            }
        }
    }
}

/// Aggregate one team's last `max_sample` finished matches inside the window.
///
/// Each metric is averaged over only the matches where both sides' values
/// are present, so per-metric samples can differ.
pub fn aggregate_team(
    team_id: i64,
    league_id: Option<i64>,
    results: &[FixtureResult],
    cfg: &AggregationConfig,
    now: DateTime<Utc>,
) -> TeamStatProfile {
    let since = window_start(now, cfg.window_months);
    let relevant = results
        .iter()
        .filter(|r| r.involves(team_id))
        .filter(|r| league_id.map_or(true, |l| r.league_id == l));
    let matches = recent_finished(relevant, since, now, cfg.max_sample);

    let mut profile = TeamStatProfile::empty(team_id, league_id, now);
    profile.sample_size = matches.len() as u32;
    profile.over_rates = cfg
        .over_lines
        .iter()
        .map(|(m, lines)| (*m, line_rates(lines)))
        .collect();

    let mut sums: BTreeMap<Metric, (u32, f64, f64)> = BTreeMap::new();
    for result in &matches {
        let is_home = result.home_team_id == team_id;
        for metric in Metric::ALL {
            if let Some((h, a)) = result.pair(metric) {
                let (f, ag) = if is_home { (h, a) } else { (a, h) };
                let entry = sums.entry(metric).or_insert((0, 0.0, 0.0));
                entry.0 += 1;
                entry.1 += f as f64;
                entry.2 += ag as f64;
            }
        }
        if let Some((h, a)) = result.pair(Metric::Goals) {
            let (f, ag) = if is_home { (h, a) } else { (a, h) };
            profile.btts.record(h > 0 && a > 0);
            profile.wins.record(f > ag);
            profile.draws.record(f == ag);
            profile.losses.record(f < ag);
        }
        record_over_rates(&mut profile.over_rates, result);
    }

    profile.metrics = sums
        .into_iter()
        .map(|(metric, (n, f, a))| {
            (
                metric,
                MetricAverages {
                    sample: n,
                    avg_for: f / n as f64,
                    avg_against: a / n as f64,
                },
            )
        })
        .collect();
    profile
}

/// Aggregate every finished match of a league inside the window.
pub fn aggregate_league(
    league_id: i64,
    results: &[FixtureResult],
    cfg: &AggregationConfig,
    now: DateTime<Utc>,
) -> LeagueStatProfile {
    let since = window_start(now, cfg.window_months);
    let in_league = results.iter().filter(|r| r.league_id == league_id);
    let matches = recent_finished(in_league, since, now, cfg.league_max_sample);

    let mut profile = LeagueStatProfile::empty(league_id, now);
    profile.matches_count = matches.len() as u32;
    profile.over_rates = cfg
        .over_lines
        .iter()
        .map(|(m, lines)| (*m, line_rates(lines)))
        .collect();

    let mut sums: BTreeMap<Metric, (u32, f64)> = BTreeMap::new();
    for result in &matches {
        for metric in Metric::ALL {
            if let Some(total) = result.total(metric) {
                let entry = sums.entry(metric).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += total as f64;
            }
        }
        if let Some((h, a)) = result.pair(Metric::Goals) {
            profile.btts.record(h > 0 && a > 0);
            profile.home_wins.record(h > a);
            profile.draws.record(h == a);
            profile.away_wins.record(h < a);
        }
        record_over_rates(&mut profile.over_rates, result);
    }

    profile.totals = sums
        .into_iter()
        .map(|(metric, (n, sum))| {
            (metric, MetricTotals { sample: n, avg_total: sum / n as f64 })
        })
        .collect();
    profile
}

/// Read side of the result store the aggregator needs.
pub trait ResultSource {
    fn team_results(
        &self,
        team_id: i64,
        league_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<Vec<FixtureResult>>;

    fn league_results(&self, league_id: i64, since: DateTime<Utc>) -> Result<Vec<FixtureResult>>;
}

/// Profiles computed in one batch plus the teams that could not be read.
#[derive(Debug, Default)]
pub struct AggregationBatch {
    pub profiles: Vec<TeamStatProfile>,
    pub errors: Vec<(i64, String)>,
}

/// Aggregate many teams; a read failure for one team never aborts the rest.
pub fn aggregate_teams(
    source: &dyn ResultSource,
    teams: &[(i64, Option<i64>)],
    cfg: &AggregationConfig,
    now: DateTime<Utc>,
) -> AggregationBatch {
    let since = window_start(now, cfg.window_months);
    let mut batch = AggregationBatch::default();
    for &(team_id, league_id) in teams {
        match source.team_results(team_id, league_id, since) {
            Ok(results) => {
                batch
                    .profiles
                    .push(aggregate_team(team_id, league_id, &results, cfg, now));
            }
            Err(e) => {
                warn!("Stats aggregation failed for team {}: {:#}", team_id, e);
                batch.errors.push((team_id, format!("{:#}", e)));
            }
        }
    }
    batch
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    pub(crate) fn result(
        fixture_id: i64,
        days_ago: i64,
        home: i64,
        away: i64,
        goals: (i32, i32),
        corners: Option<(i32, i32)>,
    ) -> FixtureResult {
        FixtureResult {
            fixture_id,
            league_id: 39,
            season: Some(2025),
            home_team_id: home,
            away_team_id: away,
            kickoff_at: now() - Duration::days(days_ago),
            status: "FT".into(),
            goals_home: Some(goals.0),
            goals_away: Some(goals.1),
            corners_home: corners.map(|c| c.0),
            corners_away: corners.map(|c| c.1),
            cards_home: None,
            cards_away: None,
            fouls_home: None,
            fouls_away: None,
            offsides_home: None,
            offsides_away: None,
        }
    }

    #[test]
    fn truncates_to_most_recent_matches() {
        let results: Vec<_> = (0..15)
            .map(|i| result(i, i + 1, 1, 100 + i, (i as i32 % 3, 1), None))
            .collect();
        let cfg = AggregationConfig { max_sample: 10, ..Default::default() };
        let p = aggregate_team(1, None, &results, &cfg, now());
        assert_eq!(p.sample_size, 10);
        assert_eq!(p.metric(Metric::Goals).sample, 10);
    }

    #[test]
    fn per_metric_samples_are_independent() {
        let mut results = Vec::new();
        for i in 0..10 {
            let corners = if i < 6 { Some((5, 4)) } else { None };
            results.push(result(i, i + 1, 1, 2, (1, 1), corners));
        }
        let p = aggregate_team(1, None, &results, &AggregationConfig::default(), now());
        assert_eq!(p.metric(Metric::Goals).sample, 10);
        assert_eq!(p.metric(Metric::Corners).sample, 6);
        assert_relative_eq!(p.metric(Metric::Corners).avg_for, 5.0, epsilon = 1e-9);
        assert_eq!(p.metric(Metric::Fouls).sample, 0);
    }

    #[test]
    fn away_matches_swap_for_and_against() {
        let results = vec![
            result(1, 1, 1, 2, (3, 0), None),
            result(2, 2, 2, 1, (2, 1), None),
        ];
        let p = aggregate_team(1, None, &results, &AggregationConfig::default(), now());
        let g = p.metric(Metric::Goals);
        assert_relative_eq!(g.avg_for, 2.0, epsilon = 1e-9);
        assert_relative_eq!(g.avg_against, 1.0, epsilon = 1e-9);
        assert_eq!(p.wins.hits, 1);
        assert_eq!(p.losses.hits, 1);
        assert_relative_eq!(p.btts.rate(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn ignores_matches_outside_window_and_unfinished() {
        let mut old = result(1, 500, 1, 2, (4, 4), None);
        old.kickoff_at = now() - Duration::days(500);
        let mut live = result(2, 0, 1, 2, (1, 0), None);
        live.status = "2H".into();
        let recent = result(3, 3, 1, 2, (0, 0), None);
        let p = aggregate_team(1, None, &[old, live, recent], &AggregationConfig::default(), now());
        assert_eq!(p.sample_size, 1);
        assert_relative_eq!(p.btts.rate(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn no_matches_yields_neutral_rates() {
        let p = aggregate_team(7, Some(39), &[], &AggregationConfig::default(), now());
        assert_eq!(p.sample_size, 0);
        assert_relative_eq!(p.btts.rate(), 0.5, epsilon = 1e-9);
        assert_relative_eq!(p.over_rate(Metric::Goals, 2.5).unwrap().rate(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn league_profile_aggregates_all_teams() {
        let results = vec![
            result(1, 1, 1, 2, (2, 1), Some((6, 5))),
            result(2, 2, 3, 4, (0, 0), Some((3, 4))),
            result(3, 3, 5, 6, (1, 3), None),
        ];
        let l = aggregate_league(39, &results, &AggregationConfig::default(), now());
        assert_eq!(l.matches_count, 3);
        assert_relative_eq!(l.avg_total(Metric::Goals), 7.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(l.avg_total(Metric::Corners), 9.0, epsilon = 1e-9);
        let o25 = l.over_rate(Metric::Goals, 2.5).unwrap();
        assert_eq!((o25.hits, o25.sample), (2, 3));
        assert_eq!(l.home_wins.hits, 1);
        assert_eq!(l.draws.hits, 1);
    }

    struct FlakySource;

    impl ResultSource for FlakySource {
        fn team_results(
            &self,
            team_id: i64,
            _league_id: Option<i64>,
            _since: DateTime<Utc>,
        ) -> Result<Vec<FixtureResult>> {
            if team_id == 2 {
                anyhow::bail!("connection reset");
            }
            Ok(vec![result(1, 1, team_id, 99, (1, 0), None)])
        }

        fn league_results(&self, _league_id: i64, _since: DateTime<Utc>) -> Result<Vec<FixtureResult>> {
            Ok(vec![])
        }
    }

    #[test]
    fn one_team_failure_does_not_abort_batch() {
        let batch = aggregate_teams(
            &FlakySource,
            &[(1, None), (2, None), (3, None)],
            &AggregationConfig::default(),
            now(),
        );
        assert_eq!(batch.profiles.len(), 2);
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].0, 2);
    }

    #[test]
    fn staleness_uses_injected_clock() {
        let computed = now() - Duration::hours(13);
        assert!(is_stale(computed, now(), Duration::hours(12)));
        assert!(!is_stale(computed, now(), Duration::hours(24)));
    }
}
