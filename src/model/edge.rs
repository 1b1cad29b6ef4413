/// Bookmaker-implied probability of decimal odds.
///
/// Odds at or below 1.0 pay nothing, so they imply certainty.
pub fn implied_probability(odds: f64) -> f64 {
    if odds <= 1.0 {
        return 1.0;
    }
    1.0 / odds
}

/// Edge of a bet: model probability minus the implied probability.
///
/// Positive edge means the price underrates the outcome.
pub fn edge(model_prob: f64, odds: f64) -> f64 {
    model_prob - implied_probability(odds)
}

/// Expected profit per unit staked at `odds` given `model_prob`.
pub fn expected_value(model_prob: f64, odds: f64) -> f64 {
    if odds <= 1.0 {
        return -1.0;
    }
    model_prob * (odds - 1.0) - (1.0 - model_prob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_edge_positive() {
        // 55% model vs 2.0 odds (50% implied) → 5 points of edge
        assert_relative_eq!(edge(0.55, 2.0), 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_edge_no_edge() {
        assert_relative_eq!(edge(0.5, 2.0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_edge_negative() {
        assert!(edge(0.3, 2.0) < 0.0);
    }

    #[test]
    fn test_degenerate_odds() {
        assert_relative_eq!(implied_probability(1.0), 1.0, epsilon = 1e-9);
        assert!(edge(0.99, 0.5) <= 0.0);
        assert_relative_eq!(expected_value(0.7, 1.0), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_expected_value() {
        // 60% at 2.0 → 0.6*1 - 0.4 = 0.2
        assert_relative_eq!(expected_value(0.6, 2.0), 0.2, epsilon = 1e-9);
    }
}
