//! Selection-weight calibration from settled history.
//!
//! Each `(market, side, line)` key, globally and per league, gets a win rate
//! shrunk toward a neutral prior:
//!
//!   bayes = (wins + K·p0) / (n + K)
//!   weight = clamp(bayes / p0, 0.7, 1.5)
//!
//! The weight multiplies a candidate's composite selection weight.
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::db::models::{LegStatus, PerformanceWeight, SettledLeg};
use crate::markets::Selection;

/// Prior strength K.
pub const PRIOR_STRENGTH: f64 = 50.0;
/// Prior win probability p0.
pub const PRIOR_RATE: f64 = 0.5;
pub const MIN_WEIGHT: f64 = 0.7;
pub const MAX_WEIGHT: f64 = 1.5;

pub fn bayes_rate(wins: u32, sample_size: u32) -> f64 {
    (wins as f64 + PRIOR_STRENGTH * PRIOR_RATE) / (sample_size as f64 + PRIOR_STRENGTH)
}

pub fn weight_from_rate(bayes: f64) -> f64 {
    (bayes / PRIOR_RATE).clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// `(market, side, line in hundredths, league)`
type WeightKey = (String, String, i64, Option<i64>);

#[derive(Debug, Default)]
struct Tally {
    line: f64,
    wins: u32,
    losses: u32,
    pushes: u32,
    win_profit: f64,
}

impl Tally {
    fn record(&mut self, status: LegStatus, odds: f64) {
        match status {
            LegStatus::Won => {
                self.wins += 1;
                self.win_profit += odds - 1.0;
            }
            LegStatus::Lost => self.losses += 1,
            LegStatus::Pushed => self.pushes += 1,
            LegStatus::Pending | LegStatus::Voided => {}
        }
    }

    fn into_weight(self, key: WeightKey, now: DateTime<Utc>) -> PerformanceWeight {
        let decided = self.wins + self.losses;
        let (win_rate, roi) = if decided == 0 {
            (0.0, 0.0)
        } else {
            (
                self.wins as f64 / decided as f64,
                (self.win_profit - self.losses as f64) / decided as f64 * 100.0,
            )
        };
        let bayes = bayes_rate(self.wins, decided);
        PerformanceWeight {
            market: key.0,
            side: key.1,
            line: self.line,
            league_id: key.3,
            wins: self.wins,
            losses: self.losses,
            pushes: self.pushes,
            sample_size: decided,
            win_rate,
            roi,
            bayes_rate: bayes,
            weight: weight_from_rate(bayes),
            computed_at: now,
        }
    }
}

/// Recompute every weight from scratch over the given settled legs.
///
/// Voided and pending legs are ignored; pushes are counted but excluded from
/// the win-rate denominator.
pub fn recalibrate(legs: &[SettledLeg], now: DateTime<Utc>) -> Vec<PerformanceWeight> {
    let mut tallies: BTreeMap<WeightKey, Tally> = BTreeMap::new();
    for leg in legs {
        if matches!(leg.status, LegStatus::Pending | LegStatus::Voided) {
            continue;
        }
        let sel = match Selection::parse(&leg.market, &leg.side, leg.line) {
            Ok(s) => s,
            Err(e) => {
                debug!("Skipping leg with unparseable selection: {}", e);
                continue;
            }
        };
        let market = sel.market.as_str().to_string();
        let side = sel.side.as_str().to_string();
        for league in [None, Some(leg.league_id)] {
            let key = (market.clone(), side.clone(), sel.line_key(), league);
            let tally = tallies.entry(key).or_insert_with(|| Tally {
                line: sel.line,
                ..Default::default()
            });
            tally.record(leg.status, leg.odds);
        }
    }
    tallies
        .into_iter()
        .map(|(key, tally)| tally.into_weight(key, now))
        .collect()
}

/// Lookup of calibrated weights for candidate scoring.
#[derive(Debug, Default, Clone)]
pub struct WeightBook {
    /// `(weight, decided sample)` per key
    rows: HashMap<WeightKey, (f64, u32)>,
    /// League rows below this decided sample defer to the global row
    min_league_sample: u32,
}

impl WeightBook {
    pub fn new(weights: &[PerformanceWeight], min_league_sample: u32) -> Self {
        let mut book = WeightBook {
            min_league_sample,
            ..Default::default()
        };
        for w in weights {
            let line_key = (w.line * 100.0).round() as i64;
            let key = (w.market.clone(), w.side.clone(), line_key, w.league_id);
            book.rows.insert(key, (w.weight, w.sample_size));
        }
        book
    }

    /// League weight if well sampled, else global, else neutral 1.0.
    pub fn weight_for(&self, sel: &Selection, league_id: i64) -> f64 {
        let base = (
            sel.market.as_str().to_string(),
            sel.side.as_str().to_string(),
            sel.line_key(),
        );
        let league_key = (base.0.clone(), base.1.clone(), base.2, Some(league_id));
        match self.rows.get(&league_key) {
            Some(&(weight, n)) if n >= self.min_league_sample => weight,
            _ => {
                let global_key = (base.0, base.1, base.2, None);
                self.rows.get(&global_key).map_or(1.0, |&(weight, _)| weight)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::markets::{MarketKind, Side};

    fn leg(league_id: i64, line: f64, odds: f64, status: LegStatus) -> SettledLeg {
        SettledLeg {
            league_id,
            market: "goals".into(),
            side: "over".into(),
            line,
            odds,
            status,
        }
    }

    #[test]
    fn bayesian_weight_scenario() {
        let mut legs = vec![leg(39, 2.5, 1.9, LegStatus::Won); 3];
        legs.extend(vec![leg(39, 2.5, 1.9, LegStatus::Lost); 2]);
        let weights = recalibrate(&legs, Utc::now());
        let global = weights.iter().find(|w| w.league_id.is_none()).unwrap();
        assert_eq!(global.sample_size, 5);
        assert_relative_eq!(global.bayes_rate, 28.0 / 55.0, epsilon = 1e-12);
        assert_relative_eq!(global.weight, (28.0 / 55.0) / 0.5, epsilon = 1e-12);
        assert_relative_eq!(global.weight, 1.018, epsilon = 1e-3);
        assert_relative_eq!(global.win_rate, 0.6, epsilon = 1e-12);
        // (3 × 0.9 − 2) / 5 × 100 = 14
        assert_relative_eq!(global.roi, 14.0, epsilon = 1e-9);
    }

    #[test]
    fn pushes_do_not_enter_denominator() {
        let legs = vec![
            leg(39, 3.0, 2.0, LegStatus::Won),
            leg(39, 3.0, 2.0, LegStatus::Pushed),
            leg(39, 3.0, 2.0, LegStatus::Pushed),
            leg(39, 3.0, 2.0, LegStatus::Voided),
        ];
        let weights = recalibrate(&legs, Utc::now());
        let global = weights.iter().find(|w| w.league_id.is_none()).unwrap();
        assert_eq!(global.pushes, 2);
        assert_eq!(global.sample_size, 1);
        assert_relative_eq!(global.win_rate, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn weight_is_clamped() {
        assert_eq!(weight_from_rate(0.99), MAX_WEIGHT);
        assert_eq!(weight_from_rate(0.01), MIN_WEIGHT);
        let legs = vec![leg(39, 2.5, 1.8, LegStatus::Won); 2000];
        let w = &recalibrate(&legs, Utc::now())[0];
        assert_eq!(w.weight, MAX_WEIGHT);
    }

    #[test]
    fn keys_split_by_line_and_league() {
        let legs = vec![
            leg(39, 2.5, 2.0, LegStatus::Won),
            leg(140, 2.5, 2.0, LegStatus::Lost),
            leg(39, 1.5, 1.4, LegStatus::Won),
        ];
        let weights = recalibrate(&legs, Utc::now());
        // global 2.5, global 1.5, league 39 @2.5, league 140 @2.5, league 39 @1.5
        assert_eq!(weights.len(), 5);
    }

    #[test]
    fn weight_book_prefers_well_sampled_league_row() {
        let mut legs = vec![leg(39, 2.5, 2.0, LegStatus::Won); 30];
        legs.extend(vec![leg(140, 2.5, 2.0, LegStatus::Lost); 5]);
        let weights = recalibrate(&legs, Utc::now());
        let book = WeightBook::new(&weights, 20);
        let sel = Selection::new(MarketKind::TotalGoals, Side::Over, 2.5).unwrap();
        let league_39 = weights
            .iter()
            .find(|w| w.league_id == Some(39))
            .unwrap()
            .weight;
        let global = weights.iter().find(|w| w.league_id.is_none()).unwrap().weight;
        assert_relative_eq!(book.weight_for(&sel, 39), league_39, epsilon = 1e-12);
        // League 140 has only 5 decided legs → global row
        assert_relative_eq!(book.weight_for(&sel, 140), global, epsilon = 1e-12);
        let other = Selection::new(MarketKind::TotalCorners, Side::Over, 9.5).unwrap();
        assert_eq!(book.weight_for(&other, 39), 1.0);
    }

    #[test]
    fn weight_book_without_global_row_falls_back_to_neutral() {
        let league_only = PerformanceWeight {
            market: "goals".into(),
            side: "over".into(),
            line: 2.5,
            league_id: Some(39),
            wins: 4,
            losses: 1,
            pushes: 0,
            sample_size: 5,
            win_rate: 0.8,
            roi: 0.0,
            bayes_rate: 0.6,
            weight: 1.2,
            computed_at: Utc::now(),
        };
        let sel = Selection::new(MarketKind::TotalGoals, Side::Over, 2.5).unwrap();
        let thin = WeightBook::new(std::slice::from_ref(&league_only), 20);
        assert_eq!(thin.len(), 1);
        assert_eq!(thin.weight_for(&sel, 39), 1.0);
        let trusted = WeightBook::new(&[league_only], 5);
        assert_relative_eq!(trusted.weight_for(&sel, 39), 1.2, epsilon = 1e-12);
    }
}
