use crate::db::models::{FixtureResult, FixtureState, LegStatus, TicketStatus};
use crate::markets::{BinaryOutcome, MarketKind, Selection, Side};

/// What scoring a leg against a result produced.
#[derive(Debug, Clone, PartialEq)]
pub enum LegScore {
    Settled {
        status: LegStatus,
        /// The observed quantity: a total, 1/0 for btts, goal difference for 1x2
        actual: Option<f64>,
    },
    /// The leg stays pending; the string says why.
    Unscorable(String),
}

fn over_under(side: Side, actual: f64, line: f64) -> LegStatus {
    let (win, lose) = match side {
        Side::Over => (actual > line, actual < line),
        _ => (actual < line, actual > line),
    };
    if win {
        LegStatus::Won
    } else if lose {
        LegStatus::Lost
    } else {
        LegStatus::Pushed
    }
}

fn won_if(cond: bool) -> LegStatus {
    if cond {
        LegStatus::Won
    } else {
        LegStatus::Lost
    }
}

/// Score a typed selection against a fixture result.
pub fn score_selection(result: &FixtureResult, sel: &Selection) -> LegScore {
    match result.state() {
        FixtureState::Cancelled => {
            return LegScore::Settled {
                status: LegStatus::Voided,
                actual: None,
            }
        }
        FixtureState::Finished => {}
        _ => {
            return LegScore::Unscorable(format!(
                "fixture {} not finished (status {})",
                result.fixture_id, result.status
            ))
        }
    }

    let metric = sel.market.metric();
    let Some((home, away)) = result.pair(metric) else {
        return LegScore::Unscorable(format!(
            "{} missing for fixture {}",
            metric.as_str(),
            result.fixture_id
        ));
    };

    match sel.market {
        MarketKind::BothTeamsScore => {
            let both = home > 0 && away > 0;
            let status = match sel.side {
                Side::Yes => won_if(both),
                _ => won_if(!both),
            };
            LegScore::Settled {
                status,
                actual: Some(if both { 1.0 } else { 0.0 }),
            }
        }
        MarketKind::MatchResult => {
            let status = match sel.side {
                Side::Home => won_if(home > away),
                Side::Away => won_if(away > home),
                _ => won_if(home == away),
            };
            LegScore::Settled {
                status,
                actual: Some((home - away) as f64),
            }
        }
        _ => {
            let total = (home + away) as f64;
            LegScore::Settled {
                status: over_under(sel.side, total, sel.line),
                actual: Some(total),
            }
        }
    }
}

/// Score a stored leg triple. Unknown markets or sides never settle.
pub fn score_leg(result: &FixtureResult, market: &str, side: &str, line: f64) -> LegScore {
    match Selection::parse(market, side, line) {
        Ok(sel) => score_selection(result, &sel),
        Err(e) => LegScore::Unscorable(e),
    }
}

/// Derive a ticket status from its leg statuses.
pub fn rollup(statuses: &[LegStatus]) -> TicketStatus {
    if statuses.iter().any(|s| *s == LegStatus::Lost) {
        return TicketStatus::Lost;
    }
    let settled = statuses.iter().filter(|s| s.is_settled()).count();
    if !statuses.is_empty() && settled == statuses.len() {
        if statuses.iter().all(|s| *s == LegStatus::Voided) {
            TicketStatus::Void
        } else {
            TicketStatus::Won
        }
    } else if settled > 0 {
        TicketStatus::Partial
    } else {
        TicketStatus::Pending
    }
}

/// How a fixture-linked market resolves given its selection's leg outcome:
/// `Some(Some(_))` picks a winner, `Some(None)` voids, `None` waits.
pub fn market_outcome(status: LegStatus) -> Option<Option<BinaryOutcome>> {
    match status {
        LegStatus::Won => Some(Some(BinaryOutcome::Yes)),
        LegStatus::Lost => Some(Some(BinaryOutcome::No)),
        LegStatus::Pushed | LegStatus::Voided => Some(None),
        LegStatus::Pending => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::aggregate::tests::result;

    fn settled(score: LegScore) -> (LegStatus, Option<f64>) {
        match score {
            LegScore::Settled { status, actual } => (status, actual),
            LegScore::Unscorable(why) => panic!("expected settled, got {}", why),
        }
    }

    #[test]
    fn totals_over_under_and_push() {
        let r = result(1, 0, 10, 11, (2, 1), None);
        assert_eq!(settled(score_leg(&r, "goals", "over", 2.5)), (LegStatus::Won, Some(3.0)));
        assert_eq!(settled(score_leg(&r, "goals", "under", 2.5)).0, LegStatus::Lost);
        assert_eq!(settled(score_leg(&r, "goals", "over", 3.0)).0, LegStatus::Pushed);
        assert_eq!(settled(score_leg(&r, "goals", "under", 3.0)).0, LegStatus::Pushed);
        assert_eq!(settled(score_leg(&r, "goals", "under", 3.5)).0, LegStatus::Won);
    }

    #[test]
    fn btts_and_match_result() {
        let r = result(1, 0, 10, 11, (2, 0), None);
        assert_eq!(settled(score_leg(&r, "btts", "yes", 0.0)), (LegStatus::Lost, Some(0.0)));
        assert_eq!(settled(score_leg(&r, "btts", "no", 0.0)).0, LegStatus::Won);
        assert_eq!(settled(score_leg(&r, "1x2", "home", 0.0)), (LegStatus::Won, Some(2.0)));
        assert_eq!(settled(score_leg(&r, "1x2", "draw", 0.0)).0, LegStatus::Lost);
        let level = result(2, 0, 10, 11, (1, 1), None);
        assert_eq!(settled(score_leg(&level, "1x2", "draw", 0.0)).0, LegStatus::Won);
        assert_eq!(settled(score_leg(&level, "btts", "yes", 0.0)).0, LegStatus::Won);
    }

    #[test]
    fn missing_stat_leaves_leg_pending() {
        let r = result(1, 0, 10, 11, (2, 1), None);
        match score_leg(&r, "corners", "over", 9.5) {
            LegScore::Unscorable(why) => assert!(why.contains("corners")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(score_leg(&r, "handicap", "home", 0.5), LegScore::Unscorable(_)));
    }

    #[test]
    fn cancelled_fixture_voids_and_live_fixture_waits() {
        let mut r = result(1, 0, 10, 11, (0, 0), None);
        r.status = "CANC".into();
        assert_eq!(settled(score_leg(&r, "goals", "over", 2.5)), (LegStatus::Voided, None));
        r.status = "HT".into();
        assert!(matches!(score_leg(&r, "goals", "over", 2.5), LegScore::Unscorable(_)));
    }

    #[test]
    fn rollup_cases() {
        use LegStatus::*;
        assert_eq!(rollup(&[Won, Won, Pushed]), TicketStatus::Won);
        assert_eq!(rollup(&[Won, Lost, Pending]), TicketStatus::Lost);
        assert_eq!(rollup(&[Won, Pending]), TicketStatus::Partial);
        assert_eq!(rollup(&[Voided, Voided]), TicketStatus::Void);
        assert_eq!(rollup(&[Voided, Won]), TicketStatus::Won);
        assert_eq!(rollup(&[Pending, Pending]), TicketStatus::Pending);
        assert_eq!(rollup(&[]), TicketStatus::Pending);
    }

    #[test]
    fn linked_market_outcomes() {
        assert_eq!(market_outcome(LegStatus::Won), Some(Some(BinaryOutcome::Yes)));
        assert_eq!(market_outcome(LegStatus::Lost), Some(Some(BinaryOutcome::No)));
        assert_eq!(market_outcome(LegStatus::Pushed), Some(None));
        assert_eq!(market_outcome(LegStatus::Pending), None);
    }
}
