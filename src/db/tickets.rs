use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::HashSet;

use super::models::*;
use super::{Database, TERMINAL_STATUSES};
use crate::settlement::rollup;

const SELECT_LEG: &str = "SELECT id, ticket_id, position, fixture_id, league_id, market, side, line,
        odds, model_probability, status, actual_value, settled_at
   FROM ticket_legs";

impl Database {
    // ── Tickets ──────────────────────────────────────────────────────────────

    /// Persist a ticket and its legs atomically. Returns the ticket id.
    pub fn insert_ticket(&self, ticket: &Ticket) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO tickets (status, content_hash, seed, total_odds, created_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                ticket.status,
                ticket.content_hash,
                ticket.seed.to_string(),
                ticket.total_odds,
                ticket.created_at,
            ],
        )?;
        let ticket_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO ticket_legs (
                    ticket_id, position, fixture_id, league_id, market, side, line,
                    odds, model_probability, status
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            )?;
            for leg in &ticket.legs {
                stmt.execute(params![
                    ticket_id,
                    leg.position,
                    leg.fixture_id,
                    leg.league_id,
                    leg.market,
                    leg.side,
                    leg.line,
                    leg.odds,
                    leg.model_probability,
                    leg.status,
                ])?;
            }
        }
        tx.commit()?;
        Ok(ticket_id)
    }

    pub fn get_ticket(&self, id: i64) -> Result<Option<Ticket>> {
        let conn = self.conn()?;
        let ticket = conn
            .query_row(
                "SELECT id, status, content_hash, seed, total_odds, created_at, settled_at
                   FROM tickets WHERE id = ?1",
                params![id],
                map_ticket,
            )
            .optional()?;
        let Some(mut ticket) = ticket else {
            return Ok(None);
        };
        let mut stmt = conn.prepare(&format!(
            "{} WHERE ticket_id = ?1 ORDER BY position",
            SELECT_LEG
        ))?;
        ticket.legs = stmt
            .query_map(params![id], map_leg)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Some(ticket))
    }

    /// Newest tickets first, without legs.
    pub fn list_tickets(&self, limit: i64) -> Result<Vec<Ticket>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, status, content_hash, seed, total_odds, created_at, settled_at
               FROM tickets ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], map_ticket)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn recent_ticket_hashes(&self, since: DateTime<Utc>) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT content_hash FROM tickets WHERE created_at >= ?1")?;
        let rows = stmt
            .query_map(params![since], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(rows)
    }

    // ── Leg settlement ───────────────────────────────────────────────────────

    /// Claim up to `limit` pending legs whose fixture has a final result.
    ///
    /// Legs held by another live run are skipped; claims older than
    /// `stale_before` are considered abandoned and may be taken over.
    pub fn claim_settleable_legs(
        &self,
        run_token: &str,
        limit: i64,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<TicketLeg>> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "UPDATE ticket_legs SET claimed_by = ?1, claimed_at = ?2
                  WHERE id IN (
                    SELECT l.id FROM ticket_legs l
                      JOIN fixture_results r ON r.fixture_id = l.fixture_id
                     WHERE l.status = 'pending'
                       AND r.status IN {}
                       AND (l.claimed_by IS NULL OR l.claimed_at < ?3)
                     ORDER BY COALESCE(l.last_attempt_at, ''), l.id
                     LIMIT ?4)",
                TERMINAL_STATUSES
            ),
            params![run_token, now, stale_before, limit],
        )?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE claimed_by = ?1 AND status = 'pending' ORDER BY id",
            SELECT_LEG
        ))?;
        let legs = stmt
            .query_map(params![run_token], map_leg)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(legs)
    }

    /// Record a terminal leg status. Returns false if the leg was already
    /// settled or is no longer held by this run.
    pub fn settle_leg(
        &self,
        leg_id: i64,
        run_token: &str,
        status: LegStatus,
        actual_value: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE ticket_legs
                SET status = ?1, actual_value = ?2, settled_at = ?3,
                    claimed_by = NULL, claimed_at = NULL, diagnostic = NULL
              WHERE id = ?4 AND status = 'pending' AND claimed_by = ?5",
            params![status, actual_value, now, leg_id, run_token],
        )?;
        Ok(changed == 1)
    }

    /// Give a claimed leg back, leaving it pending with a diagnostic.
    pub fn release_leg_claim(
        &self,
        leg_id: i64,
        run_token: &str,
        diagnostic: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE ticket_legs
                SET claimed_by = NULL, claimed_at = NULL, diagnostic = ?3, last_attempt_at = ?4
              WHERE id = ?1 AND claimed_by = ?2",
            params![leg_id, run_token, diagnostic, now],
        )?;
        Ok(())
    }

    /// Recompute a ticket's status from its legs. Returns the new status.
    pub fn refresh_ticket_status(&self, ticket_id: i64, now: DateTime<Utc>) -> Result<TicketStatus> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let statuses = {
            let mut stmt = tx.prepare("SELECT status FROM ticket_legs WHERE ticket_id = ?1")?;
            let rows = stmt
                .query_map(params![ticket_id], |row| row.get::<_, LegStatus>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let status = rollup(&statuses);
        let terminal = matches!(
            status,
            TicketStatus::Won | TicketStatus::Lost | TicketStatus::Void
        );
        tx.execute(
            "UPDATE tickets
                SET status = ?1,
                    settled_at = CASE WHEN ?2 THEN COALESCE(settled_at, ?3) ELSE NULL END
              WHERE id = ?4",
            params![status, terminal, now, ticket_id],
        )?;
        tx.commit()?;
        Ok(status)
    }

    /// Won, lost and pushed legs settled since `since`, for calibration.
    pub fn settled_legs_since(&self, since: DateTime<Utc>) -> Result<Vec<SettledLeg>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT league_id, market, side, line, odds, status FROM ticket_legs
              WHERE status IN ('won','lost','pushed') AND settled_at >= ?1",
        )?;
        let rows = stmt
            .query_map(params![since], |row| {
                Ok(SettledLeg {
                    league_id: row.get(0)?,
                    market: row.get(1)?,
                    side: row.get(2)?,
                    line: row.get(3)?,
                    odds: row.get(4)?,
                    status: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn pending_leg_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM ticket_legs WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

fn map_ticket(row: &rusqlite::Row) -> rusqlite::Result<Ticket> {
    let seed: String = row.get(3)?;
    Ok(Ticket {
        id: row.get(0)?,
        status: row.get(1)?,
        content_hash: row.get(2)?,
        seed: seed.parse().unwrap_or_default(),
        total_odds: row.get(4)?,
        created_at: row.get(5)?,
        settled_at: row.get(6)?,
        legs: Vec::new(),
    })
}

fn map_leg(row: &rusqlite::Row) -> rusqlite::Result<TicketLeg> {
    Ok(TicketLeg {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        position: row.get(2)?,
        fixture_id: row.get(3)?,
        league_id: row.get(4)?,
        market: row.get(5)?,
        side: row.get(6)?,
        line: row.get(7)?,
        odds: row.get(8)?,
        model_probability: row.get(9)?,
        status: row.get(10)?,
        actual_value: row.get(11)?,
        settled_at: row.get(12)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::tests::memory_db;
    use crate::stats::aggregate::tests::{now, result};

    pub(crate) fn leg(fixture_id: i64, market: &str, side: &str, line: f64) -> TicketLeg {
        TicketLeg {
            id: None,
            ticket_id: None,
            position: 0,
            fixture_id,
            league_id: 39,
            market: market.into(),
            side: side.into(),
            line,
            odds: 1.9,
            model_probability: 0.6,
            status: LegStatus::Pending,
            actual_value: None,
            settled_at: None,
        }
    }

    pub(crate) fn ticket(legs: Vec<TicketLeg>) -> Ticket {
        let legs: Vec<TicketLeg> = legs
            .into_iter()
            .enumerate()
            .map(|(i, mut l)| {
                l.position = i as i32;
                l
            })
            .collect();
        Ticket {
            id: None,
            status: TicketStatus::Pending,
            content_hash: format!("hash-{}", legs.len()),
            seed: u64::MAX - 1,
            total_odds: legs.iter().map(|l| l.odds).product(),
            created_at: now(),
            settled_at: None,
            legs,
        }
    }

    #[test]
    fn ticket_round_trip_keeps_leg_order_and_seed() {
        let db = memory_db();
        let id = db
            .insert_ticket(&ticket(vec![leg(2, "goals", "over", 2.5), leg(1, "btts", "yes", 0.0)]))
            .unwrap();
        let back = db.get_ticket(id).unwrap().unwrap();
        assert_eq!(back.seed, u64::MAX - 1);
        assert_eq!(back.legs.len(), 2);
        assert_eq!(back.legs[0].fixture_id, 2);
        assert_eq!(back.legs[1].market, "btts");
        assert!(db.recent_ticket_hashes(now()).unwrap().contains("hash-2"));
    }

    #[test]
    fn one_leg_per_fixture_is_enforced() {
        let db = memory_db();
        let dup = ticket(vec![leg(1, "goals", "over", 2.5), leg(1, "btts", "yes", 0.0)]);
        assert!(db.insert_ticket(&dup).is_err());
        assert!(db.list_tickets(10).unwrap().is_empty());
    }

    #[test]
    fn claims_skip_legs_held_by_another_run() {
        let db = memory_db();
        db.insert_ticket(&ticket(vec![leg(1, "goals", "over", 2.5), leg(2, "goals", "over", 2.5)]))
            .unwrap();
        db.upsert_result(&result(1, 0, 10, 11, (2, 1), None)).unwrap();
        let mut live = result(2, 0, 12, 13, (0, 0), None);
        live.status = "2H".into();
        db.upsert_result(&live).unwrap();

        let t = now();
        let stale = t - chrono::Duration::minutes(15);
        let a = db.claim_settleable_legs("run-a", 10, t, stale).unwrap();
        assert_eq!(a.len(), 1, "only the finished fixture is claimable");
        let b = db.claim_settleable_legs("run-b", 10, t, stale).unwrap();
        assert!(b.is_empty());

        // An abandoned claim becomes available again
        let later = t + chrono::Duration::minutes(30);
        let c = db
            .claim_settleable_legs("run-c", 10, later, later - chrono::Duration::minutes(15))
            .unwrap();
        assert_eq!(c.len(), 1);
        // The original holder can no longer settle it
        let id = c[0].id.unwrap();
        assert!(!db.settle_leg(id, "run-a", LegStatus::Won, Some(3.0), later).unwrap());
        assert!(db.settle_leg(id, "run-c", LegStatus::Won, Some(3.0), later).unwrap());
        assert!(!db.settle_leg(id, "run-c", LegStatus::Lost, Some(3.0), later).unwrap());
    }

    #[test]
    fn ticket_status_follows_legs() {
        let db = memory_db();
        let id = db
            .insert_ticket(&ticket(vec![leg(1, "goals", "over", 2.5), leg(2, "goals", "over", 2.5)]))
            .unwrap();
        db.upsert_result(&result(1, 0, 10, 11, (2, 1), None)).unwrap();
        let legs = db.claim_settleable_legs("r", 10, now(), now()).unwrap();
        db.settle_leg(legs[0].id.unwrap(), "r", LegStatus::Won, Some(3.0), now()).unwrap();
        assert_eq!(db.refresh_ticket_status(id, now()).unwrap(), TicketStatus::Partial);
        let t = db.get_ticket(id).unwrap().unwrap();
        assert!(t.settled_at.is_none());
        assert_eq!(db.settled_legs_since(now()).unwrap().len(), 1);
        assert_eq!(db.pending_leg_count().unwrap(), 1);
    }
}
