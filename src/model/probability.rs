//! Pre-match market probabilities.
//!
//! Every estimate blends a parametric model with the empirical hit rate of
//! the same market:
//!
//!   p = α · p_model + (1 − α) · p_empirical
//!
//! then clamps to market-specific bounds so no market ever sees certainty.
//!
//! Models:
//! - **Goals / corners totals**: attack × defence decomposition per side,
//!   summed λ, Poisson upper tail.
//! - **BTTS**: independent `1 − e^(−λ)` per side.
//! - **Fouls / cards totals**: linear ratio of expected total to league total.
//! - **Match result**: independent-Poisson score grid.

use serde::{Deserialize, Serialize};

use super::poisson;
use crate::markets::{MarketKind, Metric, Selection, Side};
use crate::stats::{LeagueStatProfile, TeamStatProfile};

/// Sample size at which a team's own rate is trusted unshrunk.
pub const S_REF: u32 = 5;

/// Minimum qualifying sample for a `high` quality tag.
const HIGH_QUALITY_SAMPLE: u32 = 8;

/// Blend a team rate toward the league rate in proportion to sample size.
///
/// `sample >= S_REF` returns the team rate unchanged; `sample == 0` returns
/// the league rate.
pub fn shrink(team_rate: f64, sample: u32, league_rate: f64) -> f64 {
    if sample >= S_REF {
        return team_rate;
    }
    let w = sample as f64 / S_REF as f64;
    league_rate + (team_rate - league_rate) * w
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Low,
    Medium,
    High,
}

impl DataQuality {
    pub fn from_min_sample(sample: u32) -> Self {
        if sample >= HIGH_QUALITY_SAMPLE {
            DataQuality::High
        } else if sample >= S_REF {
            DataQuality::Medium
        } else {
            DataQuality::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataQuality::Low => "low",
            DataQuality::Medium => "medium",
            DataQuality::High => "high",
        }
    }
}

/// Blend constant and clamp bounds of one market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketParams {
    pub alpha: f64,
    pub min_bound: f64,
    pub max_bound: f64,
}

pub fn market_params(market: MarketKind) -> MarketParams {
    let (alpha, min_bound, max_bound) = match market {
        MarketKind::TotalGoals => (0.6, 0.25, 0.85),
        MarketKind::BothTeamsScore => (0.6, 0.25, 0.80),
        MarketKind::TotalCorners => (0.55, 0.25, 0.85),
        MarketKind::TotalCards => (0.5, 0.20, 0.85),
        MarketKind::TotalFouls => (0.5, 0.20, 0.85),
        MarketKind::MatchResult => (0.65, 0.05, 0.90),
    };
    MarketParams { alpha, min_bound, max_bound }
}

/// Multiplicative home/away adjustments applied to expected rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustments {
    pub home: f64,
    pub away: f64,
}

impl Default for Adjustments {
    fn default() -> Self {
        Adjustments { home: 1.05, away: 0.95 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub probability: f64,
    pub model_probability: f64,
    pub empirical_probability: f64,
    pub quality: DataQuality,
    /// Smaller of the two teams' qualifying samples for the market's metric
    pub min_sample: u32,
    pub lambda_home: f64,
    pub lambda_away: f64,
}

impl Estimate {
    pub fn expected_total(&self) -> f64 {
        self.lambda_home + self.lambda_away
    }
}

/// Expected per-side rates of a metric from shrunk attack/defence strengths.
pub fn expected_rates(
    metric: Metric,
    home: &TeamStatProfile,
    away: &TeamStatProfile,
    league: &LeagueStatProfile,
    adj: Adjustments,
) -> (f64, f64) {
    let per_team = league.avg_per_team(metric);
    let h = home.metric(metric);
    let a = away.metric(metric);

    let home_attack = shrink(h.avg_for, h.sample, per_team) / per_team;
    let home_defence = shrink(h.avg_against, h.sample, per_team) / per_team;
    let away_attack = shrink(a.avg_for, a.sample, per_team) / per_team;
    let away_defence = shrink(a.avg_against, a.sample, per_team) / per_team;

    let lambda_home = per_team * (0.5 * home_attack + 0.5 * away_defence) * adj.home;
    let lambda_away = per_team * (0.5 * away_attack + 0.5 * home_defence) * adj.away;
    (lambda_home, lambda_away)
}

/// Linear ratio model for totals that are not Poisson-shaped.
fn linear_over(expected_total: f64, league_total: f64) -> f64 {
    (0.5 + (expected_total / league_total - 1.0) * 0.4).clamp(0.2, 0.9)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Unweighted mean of home, away and league hit rates for `sel`.
///
/// `None` when no source tracks the requested line.
fn empirical(
    sel: &Selection,
    home: &TeamStatProfile,
    away: &TeamStatProfile,
    league: &LeagueStatProfile,
) -> Option<f64> {
    match sel.market {
        MarketKind::BothTeamsScore => {
            let yes = (home.btts.rate() + away.btts.rate() + league.btts.rate()) / 3.0;
            Some(if sel.side == Side::Yes { yes } else { 1.0 - yes })
        }
        MarketKind::MatchResult => Some(match sel.side {
            Side::Home => (home.wins.rate() + away.losses.rate() + league.home_wins.rate()) / 3.0,
            Side::Draw => (home.draws.rate() + away.draws.rate() + league.draws.rate()) / 3.0,
            _ => (home.losses.rate() + away.wins.rate() + league.away_wins.rate()) / 3.0,
        }),
        _ => {
            let metric = sel.market.metric();
            let rates: Vec<f64> = [
                home.over_rate(metric, sel.line),
                away.over_rate(metric, sel.line),
                league.over_rate(metric, sel.line),
            ]
            .iter()
            .flatten()
            .map(|r| r.rate())
            .collect();
            let over = mean(&rates)?;
            Some(if sel.side == Side::Over { over } else { 1.0 - over })
        }
    }
}

fn model_probability(
    sel: &Selection,
    lambda_home: f64,
    lambda_away: f64,
    league: &LeagueStatProfile,
) -> f64 {
    let total = lambda_home + lambda_away;
    match sel.market {
        MarketKind::TotalGoals | MarketKind::TotalCorners => match sel.side {
            Side::Over => poisson::prob_over(sel.line, total),
            _ => poisson::prob_under(sel.line, total),
        },
        MarketKind::TotalFouls | MarketKind::TotalCards => {
            let over = linear_over(total, league.avg_total(sel.market.metric()));
            if sel.side == Side::Over {
                over
            } else {
                1.0 - over
            }
        }
        MarketKind::BothTeamsScore => {
            let yes = (1.0 - (-lambda_home).exp()) * (1.0 - (-lambda_away).exp());
            if sel.side == Side::Yes {
                yes
            } else {
                1.0 - yes
            }
        }
        MarketKind::MatchResult => {
            let (h, d, a) = poisson::outcome_probs(lambda_home, lambda_away);
            match sel.side {
                Side::Home => h,
                Side::Draw => d,
                _ => a,
            }
        }
    }
}

/// Estimate the probability that `sel` wins, bounded per market.
pub fn estimate(
    sel: &Selection,
    home: &TeamStatProfile,
    away: &TeamStatProfile,
    league: &LeagueStatProfile,
    adj: Adjustments,
) -> Estimate {
    let metric = sel.market.metric();
    // Fouls and cards are referee-driven; venue adjustments do not apply.
    let adj = match sel.market {
        MarketKind::TotalFouls | MarketKind::TotalCards => Adjustments { home: 1.0, away: 1.0 },
        _ => adj,
    };
    let (lambda_home, lambda_away) = expected_rates(metric, home, away, league, adj);

    let params = market_params(sel.market);
    let p_model = model_probability(sel, lambda_home, lambda_away, league);
    let p_empirical = empirical(sel, home, away, league).unwrap_or(p_model);
    let blended = params.alpha * p_model + (1.0 - params.alpha) * p_empirical;

    let min_sample = home.metric(metric).sample.min(away.metric(metric).sample);
    Estimate {
        probability: blended.clamp(params.min_bound, params.max_bound),
        model_probability: p_model,
        empirical_probability: p_empirical,
        quality: DataQuality::from_min_sample(min_sample),
        min_sample,
        lambda_home,
        lambda_away,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::profile::{LineRate, MetricAverages, MetricTotals, RateSample};
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn team(id: i64, metric: Metric, avg_for: f64, avg_against: f64, sample: u32) -> TeamStatProfile {
        let mut t = TeamStatProfile::empty(id, Some(39), Utc::now());
        t.sample_size = sample;
        t.metrics.insert(metric, MetricAverages { sample, avg_for, avg_against });
        t
    }

    fn league(goals_total: f64) -> LeagueStatProfile {
        let mut l = LeagueStatProfile::empty(39, Utc::now());
        l.matches_count = 200;
        l.totals.insert(Metric::Goals, MetricTotals { sample: 200, avg_total: goals_total });
        l.totals.insert(Metric::Fouls, MetricTotals { sample: 200, avg_total: 24.0 });
        l
    }

    #[test]
    fn shrinkage_is_monotone_and_exact_at_reference() {
        let (team_rate, league_rate) = (2.0, 1.3);
        let mut prev = shrink(team_rate, 0, league_rate);
        assert_relative_eq!(prev, league_rate, epsilon = 1e-12);
        for n in 1..=S_REF {
            let cur = shrink(team_rate, n, league_rate);
            assert!(cur > prev, "sample {} did not move toward team rate", n);
            prev = cur;
        }
        assert_eq!(shrink(team_rate, S_REF, league_rate), team_rate);
        assert_eq!(shrink(team_rate, 40, league_rate), team_rate);
        // Works the same when the team rate is below the league rate
        assert!(shrink(0.5, 2, 1.3) < 1.3 && shrink(0.5, 2, 1.3) > 0.5);
    }

    #[test]
    fn o25_scenario() {
        let home = team(1, Metric::Goals, 1.5, 1.1, 10);
        let away = team(2, Metric::Goals, 1.0, 1.3, 10);
        let lg = league(2.6);
        let sel = Selection::new(MarketKind::TotalGoals, Side::Over, 2.5).unwrap();
        let est = estimate(&sel, &home, &away, &lg, Adjustments::default());

        let lh = 1.3 * (0.5 * (1.5 / 1.3) + 0.5 * (1.3 / 1.3)) * 1.05;
        let la = 1.3 * (0.5 * (1.0 / 1.3) + 0.5 * (1.1 / 1.3)) * 0.95;
        assert_relative_eq!(est.lambda_home, lh, epsilon = 1e-9);
        assert_relative_eq!(est.lambda_away, la, epsilon = 1e-9);
        assert_relative_eq!(est.model_probability, 1.0 - poisson::cdf(2, lh + la), epsilon = 1e-9);
        assert!(est.probability >= 0.25 && est.probability <= 0.85);
        assert_eq!(est.quality, DataQuality::High);
    }

    #[test]
    fn blend_uses_alpha_and_empirical_mean() {
        let mut home = team(1, Metric::Goals, 1.5, 1.1, 10);
        let mut away = team(2, Metric::Goals, 1.0, 1.3, 10);
        let mut lg = league(2.6);
        let rate = |hits, sample| vec![LineRate { line: 2.5, over: RateSample { hits, sample } }];
        home.over_rates.insert(Metric::Goals, rate(6, 10));
        away.over_rates.insert(Metric::Goals, rate(4, 10));
        lg.over_rates.insert(Metric::Goals, rate(100, 200));
        let sel = Selection::new(MarketKind::TotalGoals, Side::Over, 2.5).unwrap();
        let est = estimate(&sel, &home, &away, &lg, Adjustments::default());
        assert_relative_eq!(est.empirical_probability, 0.5, epsilon = 1e-9);
        assert_relative_eq!(
            est.probability,
            0.6 * est.model_probability + 0.4 * 0.5,
            epsilon = 1e-9
        );
    }

    #[test]
    fn btts_uses_independent_scoring_probabilities() {
        let home = team(1, Metric::Goals, 1.3, 1.3, 10);
        let away = team(2, Metric::Goals, 1.3, 1.3, 10);
        let lg = league(2.6);
        let adj = Adjustments { home: 1.0, away: 1.0 };
        let sel = Selection::new(MarketKind::BothTeamsScore, Side::Yes, 0.0).unwrap();
        let est = estimate(&sel, &home, &away, &lg, adj);
        let p = 1.0 - (-1.3f64).exp();
        assert_relative_eq!(est.model_probability, p * p, epsilon = 1e-9);
    }

    #[test]
    fn fouls_use_linear_ratio_model() {
        let home = team(1, Metric::Fouls, 15.0, 15.0, 10);
        let away = team(2, Metric::Fouls, 15.0, 15.0, 10);
        let lg = league(2.6);
        let sel = Selection::new(MarketKind::TotalFouls, Side::Over, 23.5).unwrap();
        let est = estimate(&sel, &home, &away, &lg, Adjustments::default());
        // expected 30 vs league 24 → 0.5 + 0.25*0.4 = 0.6
        assert_relative_eq!(est.model_probability, 0.6, epsilon = 1e-9);
    }

    #[test]
    fn empty_profiles_fall_back_to_league_and_tag_low() {
        let home = TeamStatProfile::empty(1, None, Utc::now());
        let away = TeamStatProfile::empty(2, None, Utc::now());
        let lg = league(2.6);
        let sel = Selection::new(MarketKind::TotalGoals, Side::Over, 2.5).unwrap();
        let est = estimate(&sel, &home, &away, &lg, Adjustments { home: 1.0, away: 1.0 });
        assert_relative_eq!(est.expected_total(), 2.6, epsilon = 1e-9);
        assert_eq!(est.quality, DataQuality::Low);
        assert_eq!(est.min_sample, 0);
    }

    #[test]
    fn quality_tag_thresholds() {
        assert_eq!(DataQuality::from_min_sample(8), DataQuality::High);
        assert_eq!(DataQuality::from_min_sample(5), DataQuality::Medium);
        assert_eq!(DataQuality::from_min_sample(4), DataQuality::Low);
    }

    #[test]
    fn all_markets_stay_within_bounds() {
        let lg = league(2.6);
        let selections = [
            Selection::new(MarketKind::TotalGoals, Side::Over, 0.5).unwrap(),
            Selection::new(MarketKind::TotalGoals, Side::Under, 4.5).unwrap(),
            Selection::new(MarketKind::TotalCorners, Side::Over, 9.5).unwrap(),
            Selection::new(MarketKind::BothTeamsScore, Side::No, 0.0).unwrap(),
            Selection::new(MarketKind::TotalFouls, Side::Under, 21.5).unwrap(),
            Selection::new(MarketKind::TotalCards, Side::Over, 4.5).unwrap(),
            Selection::new(MarketKind::MatchResult, Side::Home, 0.0).unwrap(),
            Selection::new(MarketKind::MatchResult, Side::Away, 0.0).unwrap(),
        ];
        for sel in selections {
            let metric = sel.market.metric();
            for (f, a) in [(0.0, 0.0), (0.1, 6.0), (6.0, 0.1), (40.0, 40.0)] {
                for sample in [0, 3, 10] {
                    let home = team(1, metric, f, a, sample);
                    let away = team(2, metric, a, f, sample);
                    let p = market_params(sel.market);
                    let est = estimate(&sel, &home, &away, &lg, Adjustments::default());
                    assert!(
                        est.probability >= p.min_bound && est.probability <= p.max_bound,
                        "{} out of bounds: {}",
                        sel.canonical(),
                        est.probability
                    );
                    assert!(est.probability > 0.0 && est.probability < 1.0);
                }
            }
        }
    }
}
