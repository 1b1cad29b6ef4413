//! Settlement of ticket legs and fixture-linked prediction markets.
//!
//! Every terminal transition is a conditional update on a still-pending
//! row, so overlapping or repeated runs never settle or credit twice.
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

pub mod scoring;

pub use scoring::{market_outcome, rollup, score_leg, score_selection, LegScore};

use crate::db::Database;
use crate::error::EngineError;
use crate::markets::Selection;

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub batch_size: i64,
    /// Claims older than this are treated as abandoned
    pub claim_ttl: chrono::Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        SettlementConfig {
            batch_size: 200,
            claim_ttl: chrono::Duration::minutes(15),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SettlementSummary {
    pub scanned: usize,
    pub settled: usize,
    pub unscorable: usize,
    pub tickets_updated: usize,
    pub markets_resolved: usize,
    pub positions_settled: usize,
    pub errors: Vec<String>,
}

/// Settle one batch of claimable legs, refresh the affected tickets and
/// resolve any fixture-linked markets whose result is final.
pub fn run_settlement(
    db: &Database,
    run_token: &str,
    cfg: &SettlementConfig,
    now: DateTime<Utc>,
) -> Result<SettlementSummary> {
    let mut summary = SettlementSummary::default();
    let legs = db.claim_settleable_legs(run_token, cfg.batch_size, now, now - cfg.claim_ttl)?;
    summary.scanned = legs.len();
    let mut touched = BTreeSet::new();

    for leg in &legs {
        let (Some(leg_id), Some(ticket_id)) = (leg.id, leg.ticket_id) else {
            continue;
        };
        let Some(result) = db.get_result(leg.fixture_id)? else {
            let e = EngineError::ResultMissing(leg.fixture_id);
            db.release_leg_claim(leg_id, run_token, &e.to_string(), now)?;
            summary.errors.push(e.to_string());
            continue;
        };
        match score_leg(&result, &leg.market, &leg.side, leg.line) {
            LegScore::Settled { status, actual } => {
                if db.settle_leg(leg_id, run_token, status, actual, now)? {
                    debug!("Leg {} on fixture {} → {}", leg_id, leg.fixture_id, status.as_str());
                    summary.settled += 1;
                    touched.insert(ticket_id);
                }
            }
            LegScore::Unscorable(why) => {
                warn!("Leg {} left pending: {}", leg_id, why);
                db.release_leg_claim(leg_id, run_token, &why, now)?;
                summary.unscorable += 1;
            }
        }
    }

    for ticket_id in touched {
        let status = db.refresh_ticket_status(ticket_id, now)?;
        debug!("Ticket {} → {}", ticket_id, status.as_str());
        summary.tickets_updated += 1;
    }

    resolve_linked_markets(db, now, &mut summary)?;

    info!(
        "Settlement: {} scanned, {} settled, {} unscorable, {} tickets, {} markets",
        summary.scanned,
        summary.settled,
        summary.unscorable,
        summary.tickets_updated,
        summary.markets_resolved
    );
    Ok(summary)
}

fn resolve_linked_markets(
    db: &Database,
    now: DateTime<Utc>,
    summary: &mut SettlementSummary,
) -> Result<()> {
    for market in db.markets_awaiting_fixture()? {
        let (Some(fixture_id), Some(kind), Some(side)) =
            (market.fixture_id, market.market.as_deref(), market.side.as_deref())
        else {
            continue;
        };
        let sel = match Selection::parse(kind, side, market.line.unwrap_or(0.0)) {
            Ok(s) => s,
            Err(e) => {
                summary.errors.push(format!("market {}: {}", market.id, e));
                continue;
            }
        };
        let Some(result) = db.get_result(fixture_id)? else {
            continue;
        };
        let outcome = match score_selection(&result, &sel) {
            LegScore::Settled { status, .. } => market_outcome(status),
            LegScore::Unscorable(why) => {
                debug!("Market {} waiting: {}", market.id, why);
                None
            }
        };
        let Some(outcome) = outcome else {
            continue;
        };
        match db.resolve_market(market.id, outcome, now) {
            Ok(res) => {
                summary.markets_resolved += 1;
                summary.positions_settled += (res.won + res.lost + res.voided) as usize;
            }
            Err(e) => match e.downcast_ref::<EngineError>() {
                Some(EngineError::MarketAlreadyResolved(_)) => {
                    debug!("Market {} resolved concurrently", market.id);
                }
                _ => return Err(e),
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{LegStatus, MarketStatus, TicketStatus};
    use crate::db::tests::memory_db;
    use crate::db::tickets::tests::{leg, ticket};
    use crate::markets::{BinaryOutcome, MarketKind, Side};
    use crate::stats::aggregate::tests::{now, result};
    use approx::assert_relative_eq;

    #[test]
    fn settles_scenario_legs_and_rolls_up() {
        let db = memory_db();
        let id = db
            .insert_ticket(&ticket(vec![
                leg(1, "goals", "over", 2.5),
                leg(2, "goals", "over", 3.0),
                leg(3, "corners", "over", 9.5),
            ]))
            .unwrap();
        db.upsert_result(&result(1, 0, 10, 11, (2, 1), None)).unwrap();
        db.upsert_result(&result(2, 0, 12, 13, (2, 1), None)).unwrap();
        db.upsert_result(&result(3, 0, 14, 15, (0, 0), None)).unwrap();

        let s = run_settlement(&db, "run-1", &SettlementConfig::default(), now()).unwrap();
        assert_eq!(s.scanned, 3);
        assert_eq!(s.settled, 2);
        assert_eq!(s.unscorable, 1, "corners were never reported");

        let t = db.get_ticket(id).unwrap().unwrap();
        assert_eq!(t.status, TicketStatus::Partial);
        assert_eq!(t.legs[0].status, LegStatus::Won);
        assert_eq!(t.legs[0].actual_value, Some(3.0));
        assert_eq!(t.legs[1].status, LegStatus::Pushed);
        assert_eq!(t.legs[2].status, LegStatus::Pending);

        // Corners arrive later and the ticket completes
        db.upsert_result(&result(3, 0, 14, 15, (0, 0), Some((6, 5)))).unwrap();
        run_settlement(&db, "run-2", &SettlementConfig::default(), now()).unwrap();
        assert_eq!(db.get_ticket(id).unwrap().unwrap().status, TicketStatus::Won);
    }

    #[test]
    fn rerun_changes_nothing() {
        let db = memory_db();
        let id = db.insert_ticket(&ticket(vec![leg(1, "goals", "under", 2.5)])).unwrap();
        db.upsert_result(&result(1, 0, 10, 11, (2, 1), None)).unwrap();
        let first = run_settlement(&db, "a", &SettlementConfig::default(), now()).unwrap();
        assert_eq!(first.settled, 1);
        let settled_at = db.get_ticket(id).unwrap().unwrap().settled_at;
        assert!(settled_at.is_some());

        let later = now() + chrono::Duration::hours(1);
        let second = run_settlement(&db, "b", &SettlementConfig::default(), later).unwrap();
        assert_eq!(second.scanned, 0);
        let t = db.get_ticket(id).unwrap().unwrap();
        assert_eq!(t.status, TicketStatus::Lost);
        assert_eq!(t.settled_at, settled_at);
    }

    #[test]
    fn cancelled_fixture_voids_ticket() {
        let db = memory_db();
        let id = db.insert_ticket(&ticket(vec![leg(1, "btts", "yes", 0.0)])).unwrap();
        let mut r = result(1, 0, 10, 11, (0, 0), None);
        r.status = "ABD".into();
        db.upsert_result(&r).unwrap();
        run_settlement(&db, "a", &SettlementConfig::default(), now()).unwrap();
        assert_eq!(db.get_ticket(id).unwrap().unwrap().status, TicketStatus::Void);
    }

    #[test]
    fn linked_market_resolves_once() {
        let db = memory_db();
        let t = now();
        let sel = Selection::new(MarketKind::TotalGoals, Side::Over, 2.5).unwrap();
        let m = db
            .create_market("Over 2.5 goals?", t + chrono::Duration::hours(1), 0.0, Some((1, sel)))
            .unwrap();
        db.deposit("a", 10.0).unwrap();
        db.deposit("b", 10.0).unwrap();
        let pos = db.place_bet("a", m, BinaryOutcome::Yes, 10.0, 0.0, t).unwrap();
        db.place_bet("b", m, BinaryOutcome::No, 10.0, 0.0, t).unwrap();
        db.upsert_result(&result(1, 0, 10, 11, (2, 1), None)).unwrap();

        let s = run_settlement(&db, "a", &SettlementConfig::default(), t).unwrap();
        assert_eq!(s.markets_resolved, 1);
        assert_eq!(s.positions_settled, 2);
        assert_eq!(db.get_market(m).unwrap().unwrap().status, MarketStatus::Resolved);
        assert_relative_eq!(db.balance("a").unwrap(), pos.potential_payout, epsilon = 1e-9);

        let again = run_settlement(&db, "b", &SettlementConfig::default(), t).unwrap();
        assert_eq!(again.markets_resolved, 0);
        assert_relative_eq!(db.balance("a").unwrap(), pos.potential_payout, epsilon = 1e-9);
        assert_eq!(db.balance("b").unwrap(), 0.0);
    }
}
