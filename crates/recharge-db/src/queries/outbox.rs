//! Notification outbox queries.
//!
//! A job is durable once [`enqueue`] returns. The dispatcher claims due
//! jobs with [`due`] and reports each attempt back.

use recharge_types::{Msisdn, Timestamp};
use rusqlite::Connection;

use crate::{DbError, Result};

/// Job state.
pub const STATE_QUEUED: &str = "QUEUED";
pub const STATE_SENT: &str = "SENT";
pub const STATE_FAILED: &str = "FAILED";

/// A job to enqueue.
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub correlation_id: &'a str,
    pub draw_id: &'a str,
    pub msisdn: &'a Msisdn,
    pub body: &'a str,
}

/// Enqueue a job.
///
/// Re-enqueueing a correlation id that ended `FAILED` resets it to
/// `QUEUED`; a queued or sent job is left untouched.
pub fn enqueue(conn: &Connection, job: &NewJob<'_>, now: Timestamp) -> Result<()> {
    conn.execute(
        "INSERT INTO notification_outbox
            (correlation_id, draw_id, msisdn, body, next_attempt_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)
         ON CONFLICT(correlation_id) DO UPDATE SET
            state = 'QUEUED', attempts = 0, last_error = NULL,
            body = excluded.body,
            next_attempt_at = excluded.next_attempt_at, updated_at = excluded.updated_at
         WHERE notification_outbox.state = 'FAILED'",
        rusqlite::params![
            job.correlation_id,
            job.draw_id,
            job.msisdn.as_str(),
            job.body,
            now as i64,
        ],
    )
    .map_err(DbError::from_write)?;
    Ok(())
}

/// Queued jobs whose next attempt is due, oldest first.
pub fn due(conn: &Connection, now: Timestamp, limit: u32) -> Result<Vec<OutboxRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, correlation_id, draw_id, msisdn, body, attempts
         FROM notification_outbox
         WHERE state = 'QUEUED' AND next_attempt_at <= ?1
         ORDER BY next_attempt_at, id LIMIT ?2",
    )?;

    let raws = stmt
        .query_map(rusqlite::params![now as i64, limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    raws.into_iter()
        .map(|(id, correlation_id, draw_id, msisdn, body, attempts)| {
            Ok(OutboxRow {
                id,
                correlation_id,
                draw_id,
                msisdn: Msisdn::parse(&msisdn)
                    .map_err(|e| DbError::Serialization(e.to_string()))?,
                body,
                attempts: attempts as u32,
            })
        })
        .collect()
}

/// Mark a job delivered.
pub fn mark_sent(conn: &Connection, id: i64, gateway: &str, now: Timestamp) -> Result<()> {
    conn.execute(
        "UPDATE notification_outbox
         SET state = 'SENT', attempts = attempts + 1, gateway = ?1, last_error = NULL,
             updated_at = ?2
         WHERE id = ?3",
        rusqlite::params![gateway, now as i64, id],
    )
    .map_err(DbError::from_write)?;
    Ok(())
}

/// Record a failed attempt. With `retry_at = None` the job is terminal.
pub fn mark_attempt_failed(
    conn: &Connection,
    id: i64,
    error: &str,
    retry_at: Option<Timestamp>,
    now: Timestamp,
) -> Result<()> {
    let (state, next) = match retry_at {
        Some(at) => (STATE_QUEUED, at),
        None => (STATE_FAILED, now),
    };
    conn.execute(
        "UPDATE notification_outbox
         SET state = ?1, attempts = attempts + 1, last_error = ?2, next_attempt_at = ?3,
             updated_at = ?4
         WHERE id = ?5",
        rusqlite::params![state, error, next as i64, now as i64, id],
    )
    .map_err(DbError::from_write)?;
    Ok(())
}

/// Number of jobs in a state.
pub fn count_in_state(conn: &Connection, state: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notification_outbox WHERE state = ?1",
        [state],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Number of jobs for a draw.
pub fn count_for_draw(conn: &Connection, draw_id: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notification_outbox WHERE draw_id = ?1",
        [draw_id],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// A claimed outbox job.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub correlation_id: String,
    pub draw_id: String,
    pub msisdn: Msisdn,
    pub body: String,
    /// Attempts made before this one.
    pub attempts: u32,
}
