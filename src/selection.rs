//! Weighted stochastic ticket builder.
//!
//! Each candidate gets a composite weight
//!
//!   w = (0.65·max(0, edge) + 0.25·odds/10 + 0.10·u) · performance_weight
//!
//! with `u` uniform from a seeded generator, then legs are drawn without
//! replacement proportionally to `w`. Drawing a fixture removes every other
//! candidate on that fixture.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::model::CandidateSelection;

const EDGE_WEIGHT: f64 = 0.65;
const ODDS_WEIGHT: f64 = 0.25;
const RANDOM_WEIGHT: f64 = 0.10;

#[derive(Debug, Clone)]
pub struct TicketRequest {
    pub target_leg_count: usize,
    pub min_odds: f64,
    pub max_odds: f64,
    /// `None` seeds from the clock
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct BuiltTicket {
    /// Locked legs first, then drawn legs in draw order
    pub legs: Vec<CandidateSelection>,
    pub seed: u64,
    pub content_hash: String,
}

impl BuiltTicket {
    pub fn total_odds(&self) -> f64 {
        self.legs.iter().map(|l| l.odds).product()
    }
}

pub fn composite_weight(c: &CandidateSelection, u: f64) -> f64 {
    (EDGE_WEIGHT * c.edge.max(0.0) + ODDS_WEIGHT * (c.odds / 10.0) + RANDOM_WEIGHT * u)
        * c.performance_weight.max(0.0)
}

fn clock_seed() -> u64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros()) as u64
}

/// Deterministic hash of a leg set, independent of leg order.
pub fn ticket_hash<'a>(legs: impl IntoIterator<Item = &'a CandidateSelection>) -> String {
    let mut parts: Vec<String> = legs
        .into_iter()
        .map(|l| format!("{}:{}", l.fixture_id, l.selection.canonical()))
        .collect();
    parts.sort();
    let digest = Sha256::digest(parts.join("|").as_bytes());
    format!("{:x}", digest)
}

/// Index chosen by a cumulative-weight draw over `weights`.
fn weighted_index(weights: &[f64], rng: &mut StdRng) -> usize {
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) {
        return rng.gen_range(0..weights.len());
    }
    let mut r = rng.gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        if r < *w {
            return i;
        }
        r -= w;
    }
    weights.len() - 1
}

/// Build a ticket of `target_leg_count` legs on pairwise-distinct fixtures.
///
/// Locked legs are always included. Fails with `InsufficientCandidates`
/// rather than returning a short ticket.
pub fn build_ticket(
    candidates: &[CandidateSelection],
    locked: &[CandidateSelection],
    req: &TicketRequest,
) -> Result<BuiltTicket, EngineError> {
    let seed = req.seed.unwrap_or_else(clock_seed);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut used: HashSet<i64> = HashSet::new();
    for leg in locked {
        if !used.insert(leg.fixture_id) {
            return Err(EngineError::DuplicateLockedFixture(leg.fixture_id));
        }
    }
    let needed = req.target_leg_count.saturating_sub(locked.len());

    let mut pool: Vec<&CandidateSelection> = candidates
        .iter()
        .filter(|c| !used.contains(&c.fixture_id))
        .filter(|c| c.odds >= req.min_odds && c.odds <= req.max_odds)
        .collect();
    // Fixed order so a seed always maps to the same random terms.
    pool.sort_by(|a, b| {
        a.fixture_id
            .cmp(&b.fixture_id)
            .then_with(|| a.selection.canonical().cmp(&b.selection.canonical()))
    });
    let mut weights: Vec<f64> = pool
        .iter()
        .map(|c| composite_weight(c, rng.gen::<f64>()))
        .collect();

    let mut drawn: Vec<CandidateSelection> = Vec::with_capacity(needed);
    while drawn.len() < needed && !pool.is_empty() {
        let idx = weighted_index(&weights, &mut rng);
        let chosen = pool.remove(idx);
        weights.remove(idx);

        let mut i = 0;
        while i < pool.len() {
            if pool[i].fixture_id == chosen.fixture_id {
                pool.remove(i);
                weights.remove(i);
            } else {
                i += 1;
            }
        }
        debug!(
            "Drew fixture {} {} @ {:.2}",
            chosen.fixture_id,
            chosen.selection.canonical(),
            chosen.odds
        );
        drawn.push(chosen.clone());
    }

    if drawn.len() < needed {
        return Err(EngineError::InsufficientCandidates {
            available: locked.len() + drawn.len(),
            required: req.target_leg_count,
        });
    }

    let mut legs = locked.to_vec();
    legs.extend(drawn);
    let content_hash = ticket_hash(&legs);
    Ok(BuiltTicket { legs, seed, content_hash })
}

/// Like [`build_ticket`] but redraws with derived seeds while the result
/// matches one of `recent_hashes`.
pub fn build_distinct_ticket(
    candidates: &[CandidateSelection],
    locked: &[CandidateSelection],
    req: &TicketRequest,
    recent_hashes: &HashSet<String>,
    max_attempts: u32,
) -> Result<BuiltTicket, EngineError> {
    let base_seed = req.seed.unwrap_or_else(clock_seed);
    let mut last = None;
    for attempt in 0..max_attempts.max(1) {
        let attempt_req = TicketRequest {
            seed: Some(base_seed.wrapping_add(attempt as u64)),
            ..req.clone()
        };
        let ticket = build_ticket(candidates, locked, &attempt_req)?;
        if !recent_hashes.contains(&ticket.content_hash) {
            return Ok(ticket);
        }
        debug!("Ticket {} repeats a recent ticket, reshuffling", ticket.content_hash);
        last = Some(ticket);
    }
    warn!(
        "Could not draw a distinct ticket in {} attempts; keeping repeat",
        max_attempts
    );
    match last {
        Some(t) => Ok(t),
        None => build_ticket(candidates, locked, req),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::{MarketKind, Selection, Side};
    use crate::model::DataQuality;
    use chrono::Duration;
    use std::collections::HashMap;

    fn cand(fixture_id: i64, market: MarketKind, side: Side, line: f64, odds: f64, edge: f64) -> CandidateSelection {
        CandidateSelection {
            fixture_id,
            league_id: 39,
            kickoff_at: Utc::now() + Duration::hours(24),
            selection: Selection::new(market, side, line).unwrap(),
            odds,
            model_probability: 1.0 / odds + edge,
            edge,
            quality: DataQuality::High,
            performance_weight: 1.0,
            combined_snapshot: serde_json::Value::Null,
        }
    }

    fn pool() -> Vec<CandidateSelection> {
        let mut out = Vec::new();
        for f in 1..=8 {
            out.push(cand(f, MarketKind::TotalGoals, Side::Over, 2.5, 1.9, 0.04));
            out.push(cand(f, MarketKind::BothTeamsScore, Side::Yes, 0.0, 1.8, 0.02));
            out.push(cand(f, MarketKind::TotalCorners, Side::Over, 9.5, 2.1, 0.01));
        }
        out
    }

    fn req(target: usize, seed: u64) -> TicketRequest {
        TicketRequest { target_leg_count: target, min_odds: 1.2, max_odds: 3.5, seed: Some(seed) }
    }

    fn fixtures(t: &BuiltTicket) -> Vec<i64> {
        t.legs.iter().map(|l| l.fixture_id).collect()
    }

    #[test]
    fn same_seed_reproduces_ticket() {
        let a = build_ticket(&pool(), &[], &req(4, 42)).unwrap();
        let b = build_ticket(&pool(), &[], &req(4, 42)).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.seed, 42);
    }

    #[test]
    fn input_order_does_not_change_seeded_result() {
        let mut reversed = pool();
        reversed.reverse();
        let a = build_ticket(&pool(), &[], &req(4, 7)).unwrap();
        let b = build_ticket(&reversed, &[], &req(4, 7)).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn legs_use_distinct_fixtures_including_locked() {
        let locked = vec![
            cand(3, MarketKind::TotalGoals, Side::Under, 3.5, 1.5, 0.0),
            cand(5, MarketKind::MatchResult, Side::Home, 0.0, 2.2, 0.03),
        ];
        for seed in 0..200 {
            let t = build_ticket(&pool(), &locked, &req(6, seed)).unwrap();
            assert_eq!(t.legs.len(), 6);
            let ids: HashSet<i64> = fixtures(&t).into_iter().collect();
            assert_eq!(ids.len(), 6, "seed {} produced duplicate fixtures", seed);
            assert_eq!(t.legs[0].fixture_id, 3);
            assert_eq!(t.legs[1].fixture_id, 5);
        }
    }

    #[test]
    fn exhausted_pool_reports_available_count() {
        let err = build_ticket(&pool(), &[], &req(10, 1)).unwrap_err();
        assert_eq!(err, EngineError::InsufficientCandidates { available: 8, required: 10 });

        let locked = vec![cand(1, MarketKind::TotalGoals, Side::Over, 2.5, 1.9, 0.04)];
        let err = build_ticket(&pool(), &locked, &req(9, 1)).unwrap_err();
        assert_eq!(err, EngineError::InsufficientCandidates { available: 8, required: 9 });
    }

    #[test]
    fn duplicate_locked_fixture_is_rejected() {
        let locked = vec![
            cand(1, MarketKind::TotalGoals, Side::Over, 2.5, 1.9, 0.04),
            cand(1, MarketKind::BothTeamsScore, Side::Yes, 0.0, 1.8, 0.02),
        ];
        let err = build_ticket(&pool(), &locked, &req(4, 1)).unwrap_err();
        assert_eq!(err, EngineError::DuplicateLockedFixture(1));
    }

    #[test]
    fn odds_outside_range_are_never_drawn() {
        let mut candidates = pool();
        candidates.push(cand(9, MarketKind::TotalGoals, Side::Over, 4.5, 6.0, 0.2));
        for seed in 0..100 {
            let t = build_ticket(&candidates, &[], &req(8, seed)).unwrap();
            assert!(t.legs.iter().all(|l| l.odds <= 3.5));
        }
    }

    #[test]
    fn hash_ignores_leg_order() {
        let legs = pool();
        let forward = ticket_hash(legs.iter().take(3));
        let backward = ticket_hash(legs.iter().take(3).rev());
        assert_eq!(forward, backward);
        assert_ne!(forward, ticket_hash(legs.iter().skip(1).take(3)));
    }

    #[test]
    fn near_ties_are_broken_stochastically() {
        // Identical candidates on every fixture: every fixture should lead some ticket.
        let candidates: Vec<_> = (1..=5)
            .map(|f| cand(f, MarketKind::TotalGoals, Side::Over, 2.5, 1.9, 0.03))
            .collect();
        let mut first: HashMap<i64, u32> = HashMap::new();
        for seed in 0..500 {
            let t = build_ticket(&candidates, &[], &req(2, seed)).unwrap();
            *first.entry(t.legs[0].fixture_id).or_default() += 1;
        }
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn higher_edge_is_drawn_more_often() {
        let candidates = vec![
            cand(1, MarketKind::TotalGoals, Side::Over, 2.5, 1.9, 0.30),
            cand(2, MarketKind::TotalGoals, Side::Over, 2.5, 1.9, 0.0),
        ];
        let mut strong = 0;
        for seed in 0..2000 {
            let t = build_ticket(&candidates, &[], &req(1, seed)).unwrap();
            if t.legs[0].fixture_id == 1 {
                strong += 1;
            }
        }
        assert!(strong > 1300, "strong candidate drawn {} / 2000", strong);
    }

    #[test]
    fn distinct_ticket_avoids_recent_hash() {
        let first = build_ticket(&pool(), &[], &req(3, 11)).unwrap();
        let recent: HashSet<String> = [first.content_hash.clone()].into_iter().collect();
        let next = build_distinct_ticket(&pool(), &[], &req(3, 11), &recent, 10).unwrap();
        assert_ne!(next.content_hash, first.content_hash);
    }
}
