use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::Serialize;

use super::models::*;
use super::{Database, TERMINAL_STATUSES};
use crate::error::EngineError;
use crate::markets::{BinaryOutcome, Selection};

const SELECT_MARKET: &str = "SELECT id, question, status, closes_at, winning_outcome, resolved_at,
        yes_pool, no_pool, fixture_id, market, side, line
   FROM prediction_markets";

/// Outcome of resolving one market.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolutionSummary {
    pub market_id: i64,
    pub won: u32,
    pub lost: u32,
    pub voided: u32,
    pub credited: f64,
}

/// Parimutuel payout for `net` placed on a side holding `side_pool` out of
/// `total_pool`, both measured before the stake joins.
pub fn parimutuel_payout(net: f64, side_pool: f64, total_pool: f64) -> f64 {
    net * (total_pool + net) / (side_pool + net)
}

impl Database {
    // ── Prediction markets ───────────────────────────────────────────────────

    /// Open a market. `seed_liquidity` is added to both pools.
    pub fn create_market(
        &self,
        question: &str,
        closes_at: DateTime<Utc>,
        seed_liquidity: f64,
        link: Option<(i64, Selection)>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let (fixture_id, market, side, line) = match link {
            Some((fixture_id, sel)) => (
                Some(fixture_id),
                Some(sel.market.as_str()),
                Some(sel.side.as_str()),
                Some(sel.line),
            ),
            None => (None, None, None, None),
        };
        conn.execute(
            "INSERT INTO prediction_markets (
                question, status, closes_at, yes_pool, no_pool, fixture_id, market, side, line, created_at
             ) VALUES (?1, 'open', ?2, ?3, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                question,
                closes_at,
                seed_liquidity.max(0.0),
                fixture_id,
                market,
                side,
                line,
                Utc::now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_market(&self, id: i64) -> Result<Option<PredictionMarket>> {
        let conn = self.conn()?;
        let m = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_MARKET),
                params![id],
                map_market,
            )
            .optional()?;
        Ok(m)
    }

    pub fn list_markets(&self, limit: i64) -> Result<Vec<PredictionMarket>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id DESC LIMIT ?1", SELECT_MARKET))?;
        let rows = stmt
            .query_map(params![limit], map_market)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Unresolved markets linked to a fixture whose result is final.
    pub fn markets_awaiting_fixture(&self) -> Result<Vec<PredictionMarket>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE status != 'resolved' AND fixture_id IS NOT NULL
               AND EXISTS (SELECT 1 FROM fixture_results r
                            WHERE r.fixture_id = prediction_markets.fixture_id
                              AND r.status IN {})
             ORDER BY id",
            SELECT_MARKET, TERMINAL_STATUSES
        ))?;
        let rows = stmt
            .query_map([], map_market)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Close every open market past its close time. Returns how many closed.
    pub fn close_expired_markets(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE prediction_markets SET status = 'closed'
              WHERE status = 'open' AND closes_at <= ?1",
            params![now],
        )?;
        Ok(n)
    }

    /// Administrative close of a single open market.
    pub fn close_market(&self, market_id: i64) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE prediction_markets SET status = 'closed' WHERE id = ?1 AND status = 'open'",
            params![market_id],
        )?;
        if n == 0 {
            let status: Option<MarketStatus> = conn
                .query_row(
                    "SELECT status FROM prediction_markets WHERE id = ?1",
                    params![market_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match status {
                None => EngineError::MarketNotFound(market_id),
                Some(s) => EngineError::MarketNotOpen {
                    market_id,
                    status: s.as_str().to_string(),
                },
            }
            .into());
        }
        Ok(())
    }

    /// Take a position: debit the stake, book the fee and grow the pool in
    /// one transaction.
    pub fn place_bet(
        &self,
        user_id: &str,
        market_id: i64,
        outcome: BinaryOutcome,
        stake: f64,
        fee_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<MarketPosition> {
        if !stake.is_finite() || stake <= 0.0 {
            return Err(EngineError::InvalidStake(stake).into());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let market = tx
            .query_row(
                "SELECT status, closes_at, yes_pool, no_pool FROM prediction_markets WHERE id = ?1",
                params![market_id],
                |row| {
                    Ok((
                        row.get::<_, MarketStatus>(0)?,
                        row.get::<_, DateTime<Utc>>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((status, closes_at, yes_pool, no_pool)) = market else {
            return Err(EngineError::MarketNotFound(market_id).into());
        };
        if status != MarketStatus::Open || closes_at <= now {
            return Err(EngineError::MarketNotOpen {
                market_id,
                status: status.as_str().to_string(),
            }
            .into());
        }

        let debited = tx.execute(
            "UPDATE accounts SET balance = balance - ?1, updated_at = ?3
              WHERE user_id = ?2 AND balance >= ?1",
            params![stake, user_id, now],
        )?;
        if debited == 0 {
            return Err(EngineError::InsufficientBalance {
                user_id: user_id.to_string(),
                needed: stake,
            }
            .into());
        }

        let fee = stake * fee_rate.clamp(0.0, 1.0);
        let net = stake - fee;
        let side_pool = match outcome {
            BinaryOutcome::Yes => yes_pool,
            BinaryOutcome::No => no_pool,
        };
        let potential_payout = parimutuel_payout(net, side_pool, yes_pool + no_pool);

        tx.execute(
            "INSERT INTO market_positions (
                market_id, user_id, outcome, stake, fee, potential_payout, status, placed_at
             ) VALUES (?1,?2,?3,?4,?5,?6,'pending',?7)",
            params![market_id, user_id, outcome.as_str(), stake, fee, potential_payout, now],
        )?;
        let id = tx.last_insert_rowid();
        let pool_sql = match outcome {
            BinaryOutcome::Yes => "UPDATE prediction_markets SET yes_pool = yes_pool + ?1 WHERE id = ?2",
            BinaryOutcome::No => "UPDATE prediction_markets SET no_pool = no_pool + ?1 WHERE id = ?2",
        };
        tx.execute(pool_sql, params![net, market_id])?;
        tx.commit()?;

        Ok(MarketPosition {
            id,
            market_id,
            user_id: user_id.to_string(),
            outcome: outcome.as_str().to_string(),
            stake,
            fee,
            potential_payout,
            status: PositionStatus::Pending,
            payout: None,
            placed_at: now,
            settled_at: None,
        })
    }

    /// Resolve a market and settle its positions exactly once.
    ///
    /// `None` voids the market and refunds every stake. The whole resolution
    /// commits or nothing does; a second call fails with
    /// `MarketAlreadyResolved` and credits nothing.
    pub fn resolve_market(
        &self,
        market_id: i64,
        outcome: Option<BinaryOutcome>,
        now: DateTime<Utc>,
    ) -> Result<ResolutionSummary> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let status: Option<MarketStatus> = tx
            .query_row(
                "SELECT status FROM prediction_markets WHERE id = ?1",
                params![market_id],
                |row| row.get(0),
            )
            .optional()?;
        match status {
            None => return Err(EngineError::MarketNotFound(market_id).into()),
            Some(MarketStatus::Resolved) => {
                return Err(EngineError::MarketAlreadyResolved(market_id).into())
            }
            Some(_) => {}
        }

        let positions = {
            let mut stmt = tx.prepare(
                "SELECT id, user_id, outcome, stake, potential_payout FROM market_positions
                  WHERE market_id = ?1 AND status = 'pending' ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![market_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, f64>(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut summary = ResolutionSummary {
            market_id,
            ..Default::default()
        };
        for (id, user_id, side, stake, potential) in positions {
            let (status, payout) = match outcome {
                None => (PositionStatus::Void, stake),
                Some(o) if o.as_str() == side => (PositionStatus::Won, potential),
                Some(_) => (PositionStatus::Lost, 0.0),
            };
            let changed = tx.execute(
                "UPDATE market_positions SET status = ?1, payout = ?2, settled_at = ?3
                  WHERE id = ?4 AND status = 'pending'",
                params![status, payout, now, id],
            )?;
            if changed == 0 {
                // Rolls the whole resolution back
                return Err(EngineError::PositionAlreadySettled(id).into());
            }
            match status {
                PositionStatus::Won => summary.won += 1,
                PositionStatus::Lost => summary.lost += 1,
                _ => summary.voided += 1,
            }
            if payout > 0.0 {
                tx.execute(
                    "INSERT INTO accounts (user_id, balance, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(user_id) DO UPDATE SET
                        balance = balance + excluded.balance,
                        updated_at = excluded.updated_at",
                    params![user_id, payout, now],
                )?;
                summary.credited += payout;
            }
        }

        let changed = tx.execute(
            "UPDATE prediction_markets
                SET status = 'resolved', winning_outcome = ?1, resolved_at = ?2
              WHERE id = ?3 AND status != 'resolved'",
            params![outcome.map(|o| o.as_str()), now, market_id],
        )?;
        if changed != 1 {
            return Err(EngineError::MarketAlreadyResolved(market_id).into());
        }
        tx.commit()?;
        Ok(summary)
    }

    pub fn positions_for_market(&self, market_id: i64) -> Result<Vec<MarketPosition>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, market_id, user_id, outcome, stake, fee, potential_payout, status,
                    payout, placed_at, settled_at
               FROM market_positions WHERE market_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![market_id], |row| {
                Ok(MarketPosition {
                    id: row.get(0)?,
                    market_id: row.get(1)?,
                    user_id: row.get(2)?,
                    outcome: row.get(3)?,
                    stake: row.get(4)?,
                    fee: row.get(5)?,
                    potential_payout: row.get(6)?,
                    status: row.get(7)?,
                    payout: row.get(8)?,
                    placed_at: row.get(9)?,
                    settled_at: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Accounts ─────────────────────────────────────────────────────────────

    pub fn deposit(&self, user_id: &str, amount: f64) -> Result<()> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EngineError::InvalidStake(amount).into());
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (user_id, balance, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                balance = balance + excluded.balance,
                updated_at = excluded.updated_at",
            params![user_id, amount, Utc::now()],
        )?;
        Ok(())
    }

    pub fn balance(&self, user_id: &str) -> Result<f64> {
        let conn = self.conn()?;
        let b: Option<f64> = conn
            .query_row(
                "SELECT balance FROM accounts WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(b.unwrap_or(0.0))
    }
}

fn map_market(row: &rusqlite::Row) -> rusqlite::Result<PredictionMarket> {
    Ok(PredictionMarket {
        id: row.get(0)?,
        question: row.get(1)?,
        status: row.get(2)?,
        closes_at: row.get(3)?,
        winning_outcome: row.get(4)?,
        resolved_at: row.get(5)?,
        yes_pool: row.get(6)?,
        no_pool: row.get(7)?,
        fixture_id: row.get(8)?,
        market: row.get(9)?,
        side: row.get(10)?,
        line: row.get(11)?,
    })
}
