//! Candidate selection.

use std::collections::BTreeMap;

use recharge_db::queries::topups;
use recharge_types::{subscriber::opted_in_at, DigitSet, Msisdn};
use rusqlite::Connection;

use crate::window::Window;
use crate::{DrawError, Result};

/// Eligible subscribers and their weights (qualifying top-up counts),
/// ordered by MSISDN.
pub type CandidatePool = BTreeMap<Msisdn, u32>;

/// Build the candidate pool for a window and digit set.
///
/// A subscriber qualifies when their MSISDN ends in one of `digits`, they
/// are opted in at the end of the window and at least one top-up inside
/// the window earned points. The weight is the number of such top-ups.
pub fn select_candidates(conn: &Connection, window: &Window, digits: DigitSet) -> Result<CandidatePool> {
    if digits.is_empty() {
        return Err(DrawError::InvalidDrawConfig(
            "eligible digit set is empty".to_string(),
        ));
    }

    let rows = topups::qualifying_counts(conn, window.start, window.end)?;
    let pool: CandidatePool = rows
        .into_iter()
        .filter(|row| row.qualifying > 0)
        .filter(|row| digits.contains(row.msisdn.last_digit()))
        .filter(|row| opted_in_at(row.opt_in_at, row.opt_out_at, window.end))
        .map(|row| (row.msisdn, row.qualifying))
        .collect();

    tracing::debug!(
        start = window.start,
        end = window.end,
        digits = %digits,
        candidates = pool.len(),
        "candidate pool built"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use recharge_db::queries::subscribers;
    use recharge_types::TopUp;

    const DAY: u64 = 1_704_067_200;

    fn window() -> Window {
        Window {
            start: DAY,
            end: DAY + 86_399,
        }
    }

    fn msisdn(s: &str) -> Msisdn {
        Msisdn::parse(s).expect("msisdn")
    }

    fn topup(conn: &Connection, id: &str, who: &Msisdn, points: u64, ts: u64) {
        subscribers::ensure(conn, who, ts).expect("ensure");
        topups::insert(
            conn,
            &TopUp {
                id: id.to_string(),
                msisdn: who.clone(),
                amount: 100 * points.max(1),
                awarded_points: points,
                timestamp: ts,
            },
            ts,
        )
        .expect("insert topup");
    }

    #[test]
    fn test_filters_by_digit_opt_in_and_points() {
        let conn = recharge_db::open_memory().expect("db");
        let a = msisdn("2348030000010");
        let b = msisdn("2348030000021");
        let c = msisdn("2348030000030");
        let d = msisdn("2348030000040");
        for m in [&a, &b, &c] {
            subscribers::opt_in(&conn, m, DAY - 10).expect("opt in");
        }

        topup(&conn, "t1", &a, 1, DAY + 10);
        topup(&conn, "t2", &a, 2, DAY + 20);
        // Wrong digit.
        topup(&conn, "t3", &b, 1, DAY + 10);
        // Below the point threshold.
        topup(&conn, "t4", &c, 0, DAY + 10);
        // Never opted in.
        topup(&conn, "t5", &d, 1, DAY + 10);

        let digits = DigitSet::from_digits(&[0]).expect("digits");
        let pool = select_candidates(&conn, &window(), digits).expect("select");
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(&a), Some(&2));
    }

    #[test]
    fn test_window_boundaries_inclusive() {
        let conn = recharge_db::open_memory().expect("db");
        let a = msisdn("2348030000010");
        subscribers::opt_in(&conn, &a, DAY - 10).expect("opt in");
        topup(&conn, "before", &a, 1, DAY - 1);
        topup(&conn, "first", &a, 1, DAY);
        topup(&conn, "last", &a, 1, DAY + 86_399);
        topup(&conn, "after", &a, 1, DAY + 86_400);

        let pool = select_candidates(&conn, &window(), DigitSet::ALL).expect("select");
        assert_eq!(pool.get(&a), Some(&2));
    }

    #[test]
    fn test_opted_out_before_window_end_excluded() {
        let conn = recharge_db::open_memory().expect("db");
        let a = msisdn("2348030000010");
        subscribers::opt_in(&conn, &a, DAY - 10).expect("opt in");
        topup(&conn, "t1", &a, 1, DAY + 10);
        subscribers::opt_out(&conn, &a, DAY + 100).expect("opt out");

        let pool = select_candidates(&conn, &window(), DigitSet::ALL).expect("select");
        assert!(pool.is_empty());
    }

    #[test]
    fn test_opted_in_during_window_counts() {
        let conn = recharge_db::open_memory().expect("db");
        let a = msisdn("2348030000010");
        topup(&conn, "t1", &a, 1, DAY + 10);
        subscribers::opt_in(&conn, &a, DAY + 500).expect("opt in");

        let pool = select_candidates(&conn, &window(), DigitSet::ALL).expect("select");
        assert_eq!(pool.get(&a), Some(&1));
    }

    #[test]
    fn test_empty_digits_rejected() {
        let conn = recharge_db::open_memory().expect("db");
        let err = select_candidates(&conn, &window(), DigitSet::EMPTY).expect_err("should fail");
        assert!(matches!(err, DrawError::InvalidDrawConfig(_)));
    }

    #[test]
    fn test_backdated_opt_out_cannot_leave_subscriber_eligible() {
        let conn = recharge_db::open_memory().expect("db");
        let a = msisdn("2348030000010");
        crate::ingest::opt_in(&conn, &a, DAY - 100).expect("opt in");
        topup(&conn, "t1", &a, 5, DAY + 10);

        let err = crate::ingest::opt_out(&conn, &a, DAY - 500).expect_err("should fail");
        assert!(matches!(err, DrawError::InvalidInput(_)));
        crate::ingest::opt_out(&conn, &a, DAY + 100).expect("opt out");

        let sub = subscribers::get(&conn, &a).expect("sub");
        assert!(!sub.opt_in);
        let pool = select_candidates(&conn, &window(), DigitSet::ALL).expect("select");
        assert!(pool.is_empty());
    }

    #[test]
    fn test_backdated_reopt_in_cannot_exclude_subscriber() {
        let conn = recharge_db::open_memory().expect("db");
        let a = msisdn("2348030000010");
        crate::ingest::opt_in(&conn, &a, DAY - 1_000).expect("opt in");
        crate::ingest::opt_out(&conn, &a, DAY - 100).expect("opt out");
        topup(&conn, "t1", &a, 5, DAY + 10);

        let err = crate::ingest::opt_in(&conn, &a, DAY - 500).expect_err("should fail");
        assert!(matches!(err, DrawError::InvalidInput(_)));
        crate::ingest::opt_in(&conn, &a, DAY + 200).expect("re-opt in");

        let sub = subscribers::get(&conn, &a).expect("sub");
        assert!(sub.opt_in);
        let pool = select_candidates(&conn, &window(), DigitSet::ALL).expect("select");
        assert_eq!(pool.get(&a), Some(&1));
    }
}
