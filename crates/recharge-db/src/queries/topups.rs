//! Top-up ledger queries.

use recharge_types::{Msisdn, Timestamp, TopUp};
use rusqlite::Connection;

use crate::{DbError, Result};

/// Append a top-up.
pub fn insert(conn: &Connection, topup: &TopUp, ingested_at: Timestamp) -> Result<()> {
    conn.execute(
        "INSERT INTO topups (id, msisdn, amount, awarded_points, timestamp, ingested_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            topup.id,
            topup.msisdn.as_str(),
            topup.amount as i64,
            topup.awarded_points as i64,
            topup.timestamp as i64,
            ingested_at as i64,
        ],
    )
    .map_err(DbError::from_write)?;
    Ok(())
}

/// Top-ups for one subscriber with `from <= timestamp <= to`, oldest first.
pub fn list_for(
    conn: &Connection,
    msisdn: &Msisdn,
    from: Timestamp,
    to: Timestamp,
) -> Result<Vec<TopUp>> {
    let mut stmt = conn.prepare(
        "SELECT id, amount, awarded_points, timestamp FROM topups
         WHERE msisdn = ?1 AND timestamp BETWEEN ?2 AND ?3
         ORDER BY timestamp, id",
    )?;

    let rows = stmt
        .query_map(
            rusqlite::params![msisdn.as_str(), from as i64, to as i64],
            |row| {
                Ok(TopUp {
                    id: row.get(0)?,
                    msisdn: msisdn.clone(),
                    amount: row.get::<_, i64>(1)? as u64,
                    awarded_points: row.get::<_, i64>(2)? as u64,
                    timestamp: row.get::<_, i64>(3)? as u64,
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Per-subscriber count of point-earning top-ups inside a window,
/// together with the subscriber's opt-in instants.
pub fn qualifying_counts(
    conn: &Connection,
    start: Timestamp,
    end: Timestamp,
) -> Result<Vec<QualifyingRow>> {
    let mut stmt = conn.prepare(
        "SELECT s.msisdn, s.opt_in_at, s.opt_out_at, COUNT(t.id)
         FROM topups t JOIN subscribers s ON s.msisdn = t.msisdn
         WHERE t.timestamp BETWEEN ?1 AND ?2 AND t.awarded_points >= 1
         GROUP BY s.msisdn
         ORDER BY s.msisdn",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![start as i64, end as i64], |row| {
            Ok(RawQualifying {
                msisdn: row.get(0)?,
                opt_in_at: row.get(1)?,
                opt_out_at: row.get(2)?,
                qualifying: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|raw| {
            Ok(QualifyingRow {
                msisdn: Msisdn::parse(&raw.msisdn)
                    .map_err(|e| DbError::Serialization(e.to_string()))?,
                opt_in_at: raw.opt_in_at.map(|t| t as u64),
                opt_out_at: raw.opt_out_at.map(|t| t as u64),
                qualifying: raw.qualifying as u32,
            })
        })
        .collect()
}

/// Total top-ups recorded.
pub fn count(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM topups", [], |row| row.get(0))?;
    Ok(count as u64)
}

struct RawQualifying {
    msisdn: String,
    opt_in_at: Option<i64>,
    opt_out_at: Option<i64>,
    qualifying: i64,
}

/// A subscriber with point-earning top-ups in a window.
#[derive(Debug, Clone)]
pub struct QualifyingRow {
    pub msisdn: Msisdn,
    pub opt_in_at: Option<Timestamp>,
    pub opt_out_at: Option<Timestamp>,
    pub qualifying: u32,
}
