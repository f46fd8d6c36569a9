//! Recharge ingest and subscriber registry operations.
//!
//! Every function here runs against one locked connection; the engine
//! owns locking.

use recharge_db::queries::{subscribers, topups};
use recharge_db::DbError;
use recharge_rules::PointRules;
use recharge_types::{Msisdn, Subscriber, Timestamp, TopUp};
use rusqlite::Connection;

use crate::{DrawError, Result};

/// A recharge event as reported by the operator feed.
#[derive(Debug, Clone)]
pub struct TopUpEvent {
    pub msisdn: Msisdn,
    /// Signed so that a negative feed value is rejected, not wrapped.
    pub amount: i64,
    pub timestamp: Timestamp,
}

/// Record a top-up and credit the subscriber's points.
///
/// The event row and the point credit commit together. The credit is an
/// optimistic version check retried up to `max_retries` times.
pub fn ingest(
    conn: &Connection,
    rules: &PointRules,
    event: TopUpEvent,
    now: Timestamp,
    max_retries: u32,
) -> Result<TopUp> {
    if event.amount <= 0 {
        return Err(DrawError::InvalidInput(format!(
            "top-up amount must be positive, got {}",
            event.amount
        )));
    }
    let amount = event.amount as u64;
    let topup = TopUp {
        id: recharge_db::new_id(),
        msisdn: event.msisdn,
        amount,
        awarded_points: rules.award(amount),
        timestamp: event.timestamp,
    };

    let tx = conn.unchecked_transaction().map_err(DbError::from)?;
    subscribers::ensure(&tx, &topup.msisdn, now)?;
    topups::insert(&tx, &topup, now)?;
    if topup.awarded_points > 0 {
        credit_points(&tx, &topup.msisdn, topup.awarded_points, max_retries)?;
    }
    tx.commit().map_err(DbError::from)?;

    tracing::debug!(
        msisdn = %topup.msisdn,
        amount = topup.amount,
        points = topup.awarded_points,
        "top-up ingested"
    );
    Ok(topup)
}

fn credit_points(conn: &Connection, msisdn: &Msisdn, delta: u64, max_retries: u32) -> Result<()> {
    for attempt in 0..=max_retries {
        let (_, version) = subscribers::points_version(conn, msisdn)?;
        if subscribers::add_points_if_version(conn, msisdn, delta, version)? {
            return Ok(());
        }
        tracing::debug!(msisdn = %msisdn, attempt, "point update lost a version race");
    }
    Err(DrawError::StorageUnavailable(DbError::Constraint(format!(
        "points for {msisdn} kept changing"
    ))))
}

/// Opt a subscriber in. Re-opting in must come strictly after the
/// recorded opt-out.
pub fn opt_in(conn: &Connection, msisdn: &Msisdn, at: Timestamp) -> Result<Subscriber> {
    if let Some(current) = subscribers::find(conn, msisdn)? {
        match current.opt_out_at {
            Some(out) if !current.opt_in && at <= out => {
                return Err(DrawError::InvalidInput(format!(
                    "opt-in at {at} for {msisdn} does not follow its opt-out at {out}"
                )));
            }
            _ => {}
        }
    }
    Ok(subscribers::opt_in(conn, msisdn, at)?)
}

/// Opt a subscriber out. The instant may not precede the current opt-in.
pub fn opt_out(conn: &Connection, msisdn: &Msisdn, at: Timestamp) -> Result<Subscriber> {
    let current = subscribers::get(conn, msisdn)?;
    match current.opt_in_at {
        Some(since) if current.opt_in && at < since => Err(DrawError::InvalidInput(format!(
            "opt-out at {at} for {msisdn} precedes its opt-in at {since}"
        ))),
        _ => Ok(subscribers::opt_out(conn, msisdn, at)?),
    }
}

/// Zero a subscriber's points.
pub fn reset_points(conn: &Connection, msisdn: &Msisdn) -> Result<Subscriber> {
    subscribers::reset_points(conn, msisdn)?;
    Ok(subscribers::get(conn, msisdn)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msisdn() -> Msisdn {
        Msisdn::parse("2348031234560").expect("msisdn")
    }

    fn event(amount: i64, timestamp: Timestamp) -> TopUpEvent {
        TopUpEvent {
            msisdn: msisdn(),
            amount,
            timestamp,
        }
    }

    #[test]
    fn test_ingest_credits_points() {
        let conn = recharge_db::open_memory().expect("db");
        let rules = PointRules::default();

        let first = ingest(&conn, &rules, event(500, 10), 20, 3).expect("ingest");
        assert_eq!(first.awarded_points, 5);
        ingest(&conn, &rules, event(100, 11), 21, 3).expect("ingest");

        let sub = subscribers::get(&conn, &msisdn()).expect("subscriber");
        assert_eq!(sub.points, 6);
        assert!(!sub.opt_in);
        assert_eq!(topups::count(&conn).expect("count"), 2);
    }

    #[test]
    fn test_small_topup_recorded_without_points() {
        let conn = recharge_db::open_memory().expect("db");
        let topup = ingest(&conn, &PointRules::default(), event(50, 10), 20, 3).expect("ingest");
        assert_eq!(topup.awarded_points, 0);
        assert_eq!(subscribers::get(&conn, &msisdn()).expect("sub").points, 0);
        assert_eq!(topups::count(&conn).expect("count"), 1);
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let conn = recharge_db::open_memory().expect("db");
        for amount in [0, -100] {
            let err = ingest(&conn, &PointRules::default(), event(amount, 10), 20, 3).expect_err("should fail");
            assert!(matches!(err, DrawError::InvalidInput(_)));
        }
        assert_eq!(topups::count(&conn).expect("count"), 0);
    }

    #[test]
    fn test_reset_points() {
        let conn = recharge_db::open_memory().expect("db");
        ingest(&conn, &PointRules::default(), event(1000, 10), 20, 3).expect("ingest");
        let sub = reset_points(&conn, &msisdn()).expect("reset");
        assert_eq!(sub.points, 0);
    }

    #[test]
    fn test_opt_out_unknown_subscriber() {
        let conn = recharge_db::open_memory().expect("db");
        let err = opt_out(&conn, &msisdn(), 10).expect_err("should fail");
        assert!(matches!(err, DrawError::NotFound(_)));
    }

    #[test]
    fn test_opt_out_before_opt_in_rejected() {
        let conn = recharge_db::open_memory().expect("db");
        opt_in(&conn, &msisdn(), 1_000).expect("opt in");

        let err = opt_out(&conn, &msisdn(), 500).expect_err("should fail");
        assert!(matches!(err, DrawError::InvalidInput(_)));

        let sub = subscribers::get(&conn, &msisdn()).expect("sub");
        assert!(sub.opt_in);
        assert!(sub.opted_in_at(2_000));

        // Same instant is allowed and means out from then on.
        let sub = opt_out(&conn, &msisdn(), 1_000).expect("opt out");
        assert!(!sub.opt_in);
        assert!(!sub.opted_in_at(1_000));
    }

    #[test]
    fn test_reopt_in_before_opt_out_rejected() {
        let conn = recharge_db::open_memory().expect("db");
        opt_in(&conn, &msisdn(), 100).expect("opt in");
        opt_out(&conn, &msisdn(), 1_000).expect("opt out");

        for at in [500, 1_000] {
            let err = opt_in(&conn, &msisdn(), at).expect_err("should fail");
            assert!(matches!(err, DrawError::InvalidInput(_)));
        }
        let sub = subscribers::get(&conn, &msisdn()).expect("sub");
        assert!(!sub.opt_in);

        let sub = opt_in(&conn, &msisdn(), 1_001).expect("re-opt in");
        assert!(sub.opt_in);
        assert!(sub.opted_in_at(2_000));
    }

    #[test]
    fn test_registry_flag_agrees_with_history() {
        let conn = recharge_db::open_memory().expect("db");
        let steps: [(bool, Timestamp); 6] =
            [(true, 100), (false, 50), (false, 200), (true, 150), (true, 300), (false, 250)];
        for (opting_in, at) in steps {
            let _ = if opting_in {
                opt_in(&conn, &msisdn(), at)
            } else {
                opt_out(&conn, &msisdn(), at)
            };
            let sub = subscribers::get(&conn, &msisdn()).expect("sub");
            assert_eq!(sub.opted_in_at(Timestamp::MAX), sub.opt_in);
        }
    }
}
