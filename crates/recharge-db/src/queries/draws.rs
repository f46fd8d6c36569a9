//! Draw store queries.
//!
//! Status changes go through [`transition_status`] (compare-and-swap) or
//! [`record_completion`]; nothing else writes the `status` column. A
//! completed draw is additionally frozen by schema triggers.

use chrono::NaiveDate;
use recharge_types::{
    DigitSet, Draw, DrawId, DrawStatus, DrawType, Msisdn, NotificationStatus, Timestamp,
    UnawardedSlot, Winner,
};
use rusqlite::{Connection, OptionalExtension};

use crate::{DbError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

const COLUMNS: &str = "id, draw_date, draw_type, status, eligible_digits, lookback_secs,
     prize_structure, unawarded, seed, executed_at, failure_reason, retry_of, created_at";

/// Insert a new draw.
///
/// Fails with [`DbError::Constraint`] when a non-failed draw already exists
/// for the same `(draw_date, draw_type)`.
pub fn insert(conn: &Connection, draw: &Draw) -> Result<()> {
    let prizes = serde_json::to_string(&draw.prize_structure)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    let unawarded = serde_json::to_string(&draw.unawarded)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO draws (id, draw_date, draw_type, status, eligible_digits, lookback_secs,
                            prize_structure, unawarded, seed, executed_at, failure_reason,
                            retry_of, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        rusqlite::params![
            draw.id,
            draw.draw_date.format(DATE_FORMAT).to_string(),
            draw.draw_type.as_str(),
            draw.status.as_str(),
            draw.eligible_digits.to_string(),
            draw.lookback_secs as i64,
            prizes,
            unawarded,
            draw.seed.map(|s| s as i64),
            draw.executed_at.map(|t| t as i64),
            draw.failure_reason,
            draw.retry_of,
            draw.created_at as i64,
        ],
    )
    .map_err(DbError::from_write)?;
    Ok(())
}

/// Load a draw with its winners.
pub fn get(conn: &Connection, id: &str) -> Result<Draw> {
    let raw = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM draws WHERE id = ?1"),
            [id],
            RawDraw::from_row,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("draw {id}")))?;
    raw.into_draw(conn)
}

/// The live (non-failed) draw for a date and type, if any.
pub fn find_live(conn: &Connection, date: NaiveDate, draw_type: DrawType) -> Result<Option<Draw>> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM draws
                 WHERE draw_date = ?1 AND draw_type = ?2 AND status != 'FAILED'"
            ),
            rusqlite::params![date.format(DATE_FORMAT).to_string(), draw_type.as_str()],
            RawDraw::from_row,
        )
        .optional()?;
    raw.map(|r| r.into_draw(conn)).transpose()
}

/// All draws on a date, failed ones included, oldest first.
pub fn by_date(conn: &Connection, date: NaiveDate) -> Result<Vec<Draw>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM draws WHERE draw_date = ?1 ORDER BY created_at, id"
    ))?;
    let raws = stmt
        .query_map([date.format(DATE_FORMAT).to_string()], RawDraw::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raws.into_iter().map(|r| r.into_draw(conn)).collect()
}

/// All draws in a status, by date.
pub fn list_by_status(conn: &Connection, status: DrawStatus) -> Result<Vec<Draw>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM draws WHERE status = ?1 ORDER BY draw_date, draw_type, id"
    ))?;
    let raws = stmt
        .query_map([status.as_str()], RawDraw::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raws.into_iter().map(|r| r.into_draw(conn)).collect()
}

/// Count draws, optionally restricted to one status.
pub fn count(conn: &Connection, status: Option<DrawStatus>) -> Result<u64> {
    let count: i64 = match status {
        Some(s) => conn.query_row(
            "SELECT COUNT(*) FROM draws WHERE status = ?1",
            [s.as_str()],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM draws", [], |row| row.get(0))?,
    };
    Ok(count as u64)
}

/// Compare-and-swap the status of a draw.
///
/// Only `SCHEDULED -> RUNNING` and `RUNNING -> FAILED` are legal here.
/// Returns `false` if the draw was not in `expected`.
pub fn transition_status(
    conn: &Connection,
    id: &str,
    expected: DrawStatus,
    target: DrawStatus,
    failure_reason: Option<&str>,
) -> Result<bool> {
    let legal = matches!(
        (expected, target),
        (DrawStatus::Scheduled, DrawStatus::Running) | (DrawStatus::Running, DrawStatus::Failed)
    );
    if !legal {
        return Err(DbError::Constraint(format!(
            "illegal draw transition {expected} -> {target}"
        )));
    }

    let updated = conn
        .execute(
            "UPDATE draws SET status = ?1, failure_reason = COALESCE(?2, failure_reason)
             WHERE id = ?3 AND status = ?4",
            rusqlite::params![target.as_str(), failure_reason, id, expected.as_str()],
        )
        .map_err(DbError::from_write)?;
    if updated == 0 && !exists(conn, id)? {
        return Err(DbError::NotFound(format!("draw {id}")));
    }
    Ok(updated == 1)
}

/// Record the seed of a running draw. A seed is written once.
pub fn set_seed(conn: &Connection, id: &str, seed: u64) -> Result<bool> {
    let updated = conn
        .execute(
            "UPDATE draws SET seed = ?1 WHERE id = ?2 AND status = 'RUNNING' AND seed IS NULL",
            rusqlite::params![seed as i64, id],
        )
        .map_err(DbError::from_write)?;
    Ok(updated == 1)
}

/// Atomically write winners, unawarded slots, seed and execution time and
/// mark the draw `COMPLETED`.
///
/// Returns `false` without writing anything if the draw is not `RUNNING`.
pub fn record_completion(
    conn: &Connection,
    id: &str,
    winners: &[Winner],
    unawarded: &[UnawardedSlot],
    seed: u64,
    executed_at: Timestamp,
) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;

    let current = tx
        .query_row(
            "SELECT status, seed FROM draws WHERE id = ?1",
            [id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?)),
        )
        .optional()?;
    let Some((status, stored_seed)) = current else {
        return Err(DbError::NotFound(format!("draw {id}")));
    };
    if status != DrawStatus::Running.as_str() {
        return Ok(false);
    }
    if let Some(stored) = stored_seed {
        if stored as u64 != seed {
            return Err(DbError::Constraint(format!(
                "draw {id} was seeded with {} not {seed}",
                stored as u64
            )));
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO draw_winners
                (draw_id, position, msisdn, rank, prize_amount, picked_at, notification_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for (position, w) in winners.iter().enumerate() {
            stmt.execute(rusqlite::params![
                id,
                position as i64,
                w.msisdn.as_str(),
                w.rank,
                w.prize_amount as i64,
                w.picked_at as i64,
                w.notification_status.as_str(),
            ])
            .map_err(DbError::from_write)?;
        }
    }

    let unawarded =
        serde_json::to_string(unawarded).map_err(|e| DbError::Serialization(e.to_string()))?;
    let updated = tx
        .execute(
            "UPDATE draws SET status = 'COMPLETED', seed = ?1, executed_at = ?2, unawarded = ?3
             WHERE id = ?4 AND status = 'RUNNING'",
            rusqlite::params![seed as i64, executed_at as i64, unawarded, id],
        )
        .map_err(DbError::from_write)?;
    if updated != 1 {
        return Ok(false);
    }

    tx.commit()?;
    Ok(true)
}

/// Winners of a draw in picking order.
pub fn winners(conn: &Connection, draw_id: &str) -> Result<Vec<Winner>> {
    let mut stmt = conn.prepare(
        "SELECT msisdn, rank, prize_amount, picked_at, notification_status
         FROM draw_winners WHERE draw_id = ?1 ORDER BY position",
    )?;
    let raws = stmt
        .query_map([draw_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    raws.into_iter()
        .map(|(msisdn, rank, amount, picked_at, status)| {
            Ok(Winner {
                msisdn: Msisdn::parse(&msisdn).map_err(serialization)?,
                rank,
                prize_amount: amount as u64,
                picked_at: picked_at as u64,
                notification_status: status.parse().map_err(serialization)?,
            })
        })
        .collect()
}

/// Record the delivery outcome for one winner.
pub fn set_notification_status(
    conn: &Connection,
    draw_id: &str,
    msisdn: &Msisdn,
    status: NotificationStatus,
) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE draw_winners SET notification_status = ?1 WHERE draw_id = ?2 AND msisdn = ?3",
            rusqlite::params![status.as_str(), draw_id, msisdn.as_str()],
        )
        .map_err(DbError::from_write)?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("winner {msisdn} of draw {draw_id}")));
    }
    Ok(())
}

fn exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM draws WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn serialization(e: impl std::fmt::Display) -> DbError {
    DbError::Serialization(e.to_string())
}

/// A raw draw row, before decoding.
struct RawDraw {
    id: DrawId,
    draw_date: String,
    draw_type: String,
    status: String,
    eligible_digits: String,
    lookback_secs: i64,
    prize_structure: String,
    unawarded: String,
    seed: Option<i64>,
    executed_at: Option<i64>,
    failure_reason: Option<String>,
    retry_of: Option<DrawId>,
    created_at: i64,
}

impl RawDraw {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            draw_date: row.get(1)?,
            draw_type: row.get(2)?,
            status: row.get(3)?,
            eligible_digits: row.get(4)?,
            lookback_secs: row.get(5)?,
            prize_structure: row.get(6)?,
            unawarded: row.get(7)?,
            seed: row.get(8)?,
            executed_at: row.get(9)?,
            failure_reason: row.get(10)?,
            retry_of: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_draw(self, conn: &Connection) -> Result<Draw> {
        let winners = winners(conn, &self.id)?;
        Ok(Draw {
            draw_date: NaiveDate::parse_from_str(&self.draw_date, DATE_FORMAT)
                .map_err(serialization)?,
            draw_type: self.draw_type.parse().map_err(serialization)?,
            status: self.status.parse().map_err(serialization)?,
            eligible_digits: DigitSet::parse(&self.eligible_digits).map_err(serialization)?,
            lookback_secs: self.lookback_secs as u64,
            prize_structure: serde_json::from_str(&self.prize_structure)
                .map_err(serialization)?,
            unawarded: serde_json::from_str(&self.unawarded).map_err(serialization)?,
            winners,
            seed: self.seed.map(|s| s as u64),
            executed_at: self.executed_at.map(|t| t as u64),
            failure_reason: self.failure_reason,
            retry_of: self.retry_of,
            created_at: self.created_at as u64,
            id: self.id,
        })
    }
}
