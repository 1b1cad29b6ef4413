//! Poisson tail and score-grid helpers.

/// Goals per side beyond which the score grid is truncated.
const MAX_GRID_GOALS: u32 = 10;

/// P(X = k) for k in 0..=max_k.
pub fn pmf(lambda: f64, max_k: u32) -> Vec<f64> {
    let lambda = lambda.max(0.0);
    let mut out = vec![0.0; max_k as usize + 1];
    out[0] = (-lambda).exp();
    for k in 1..=max_k as usize {
        out[k] = out[k - 1] * lambda / k as f64;
    }
    out
}

/// P(X <= k); zero for negative k.
pub fn cdf(k: i64, lambda: f64) -> f64 {
    if k < 0 {
        return 0.0;
    }
    let lambda = lambda.max(0.0);
    let mut term = (-lambda).exp();
    let mut sum = term;
    let mut i = 0i64;
    while i < k {
        i += 1;
        term *= lambda / i as f64;
        sum += term;
        // Past the mode the remaining terms only shrink
        if term < f64::EPSILON * sum && i as f64 > lambda {
            break;
        }
    }
    sum.min(1.0)
}

/// P(X > line). Integer lines exclude the push outcome.
pub fn prob_over(line: f64, lambda: f64) -> f64 {
    1.0 - cdf(line.floor() as i64, lambda)
}

/// P(X < line). Integer lines exclude the push outcome.
pub fn prob_under(line: f64, lambda: f64) -> f64 {
    cdf(line.ceil() as i64 - 1, lambda)
}

/// Home/draw/away probabilities from two independent Poisson scorers.
pub fn outcome_probs(lambda_home: f64, lambda_away: f64) -> (f64, f64, f64) {
    let pmf_h = pmf(lambda_home, MAX_GRID_GOALS);
    let pmf_a = pmf(lambda_away, MAX_GRID_GOALS);

    let mut p_home = 0.0;
    let mut p_draw = 0.0;
    let mut p_away = 0.0;
    for (i, p_i) in pmf_h.iter().enumerate() {
        for (j, p_j) in pmf_a.iter().enumerate() {
            let p = p_i * p_j;
            if i > j {
                p_home += p;
            } else if i < j {
                p_away += p;
            } else {
                p_draw += p;
            }
        }
    }

    // Renormalise the mass lost to grid truncation.
    let sum = p_home + p_draw + p_away;
    if sum > 0.0 {
        (p_home / sum, p_draw / sum, p_away / sum)
    } else {
        (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cdf_matches_closed_form() {
        let l: f64 = 2.0;
        let expected = (-l).exp() * (1.0 + l + l * l / 2.0);
        assert_relative_eq!(cdf(2, l), expected, epsilon = 1e-12);
    }

    #[test]
    fn huge_lines_have_no_over_mass() {
        assert_relative_eq!(prob_over(4294967296.5, 2.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(cdf(i64::MAX, 2.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(prob_under(150.5, 9.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(cdf(5, 0.0), 1.0);
    }

    #[test]
    fn half_line_over_and_under_sum_to_one() {
        let l = 2.4;
        assert_relative_eq!(prob_over(2.5, l) + prob_under(2.5, l), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn integer_line_leaves_push_mass() {
        let l = 3.0;
        let push = pmf(l, 3)[3];
        assert_relative_eq!(prob_over(3.0, l) + prob_under(3.0, l) + push, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn under_zero_line_is_impossible() {
        assert_eq!(prob_under(0.0, 1.5), 0.0);
    }

    #[test]
    fn outcome_grid_favours_stronger_side() {
        let (h, d, a) = outcome_probs(1.8, 0.9);
        assert_relative_eq!(h + d + a, 1.0, epsilon = 1e-9);
        assert!(h > a);
        let (h, _, a) = outcome_probs(1.2, 1.2);
        assert_relative_eq!(h, a, epsilon = 1e-9);
    }
}
