//! Subscriber registry queries.
//!
//! Point updates are optimistic: callers read `(points, version)` and
//! apply a delta only if the version is unchanged.

use recharge_types::{Msisdn, Subscriber, Timestamp};
use rusqlite::{Connection, OptionalExtension};

use crate::{DbError, Result};

const COLUMNS: &str = "msisdn, opt_in, opt_in_at, opt_out_at, points, created_at";

/// Create the subscriber if absent, opted out.
pub fn ensure(conn: &Connection, msisdn: &Msisdn, now: Timestamp) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO subscribers (msisdn, created_at) VALUES (?1, ?2)",
        rusqlite::params![msisdn.as_str(), now as i64],
    )
    .map_err(DbError::from_write)?;
    Ok(())
}

/// Look up a subscriber.
pub fn find(conn: &Connection, msisdn: &Msisdn) -> Result<Option<Subscriber>> {
    let raw = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM subscribers WHERE msisdn = ?1"),
            [msisdn.as_str()],
            RawSubscriber::from_row,
        )
        .optional()?;
    raw.map(RawSubscriber::into_subscriber).transpose()
}

/// Look up a subscriber, failing with `NotFound`.
pub fn get(conn: &Connection, msisdn: &Msisdn) -> Result<Subscriber> {
    find(conn, msisdn)?.ok_or_else(|| DbError::NotFound(format!("subscriber {msisdn}")))
}

/// Opt a subscriber in, creating the record if needed.
///
/// Already opted-in subscribers keep their original opt-in instant.
pub fn opt_in(conn: &Connection, msisdn: &Msisdn, at: Timestamp) -> Result<Subscriber> {
    ensure(conn, msisdn, at)?;
    conn.execute(
        "UPDATE subscribers SET opt_in = 1, opt_in_at = ?1, version = version + 1
         WHERE msisdn = ?2 AND opt_in = 0",
        rusqlite::params![at as i64, msisdn.as_str()],
    )
    .map_err(DbError::from_write)?;
    get(conn, msisdn)
}

/// Opt a subscriber out.
pub fn opt_out(conn: &Connection, msisdn: &Msisdn, at: Timestamp) -> Result<Subscriber> {
    let current = get(conn, msisdn)?;
    if current.opt_in {
        conn.execute(
            "UPDATE subscribers SET opt_in = 0, opt_out_at = ?1, version = version + 1
             WHERE msisdn = ?2 AND opt_in = 1",
            rusqlite::params![at as i64, msisdn.as_str()],
        )
        .map_err(DbError::from_write)?;
    }
    get(conn, msisdn)
}

/// Current points and row version.
pub fn points_version(conn: &Connection, msisdn: &Msisdn) -> Result<(u64, u64)> {
    conn.query_row(
        "SELECT points, version FROM subscribers WHERE msisdn = ?1",
        [msisdn.as_str()],
        |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
    )
    .optional()?
    .ok_or_else(|| DbError::NotFound(format!("subscriber {msisdn}")))
}

/// Add `delta` points if the row is still at `expected_version`.
///
/// Returns `false` when another writer got there first.
pub fn add_points_if_version(
    conn: &Connection,
    msisdn: &Msisdn,
    delta: u64,
    expected_version: u64,
) -> Result<bool> {
    let updated = conn
        .execute(
            "UPDATE subscribers SET points = points + ?1, version = version + 1
             WHERE msisdn = ?2 AND version = ?3",
            rusqlite::params![delta as i64, msisdn.as_str(), expected_version as i64],
        )
        .map_err(DbError::from_write)?;
    Ok(updated == 1)
}

/// Administrative reset of a subscriber's points to zero.
pub fn reset_points(conn: &Connection, msisdn: &Msisdn) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE subscribers SET points = 0, version = version + 1 WHERE msisdn = ?1",
            [msisdn.as_str()],
        )
        .map_err(DbError::from_write)?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("subscriber {msisdn}")));
    }
    Ok(())
}

/// A raw subscriber row.
struct RawSubscriber {
    msisdn: String,
    opt_in: bool,
    opt_in_at: Option<i64>,
    opt_out_at: Option<i64>,
    points: i64,
    created_at: i64,
}

impl RawSubscriber {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            msisdn: row.get(0)?,
            opt_in: row.get(1)?,
            opt_in_at: row.get(2)?,
            opt_out_at: row.get(3)?,
            points: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_subscriber(self) -> Result<Subscriber> {
        let msisdn =
            Msisdn::parse(&self.msisdn).map_err(|e| DbError::Serialization(e.to_string()))?;
        Ok(Subscriber {
            msisdn,
            opt_in: self.opt_in,
            opt_in_at: self.opt_in_at.map(|t| t as u64),
            opt_out_at: self.opt_out_at.map(|t| t as u64),
            points: self.points as u64,
            created_at: self.created_at as u64,
        })
    }
}
