//! Lookback windows.
//!
//! A draw's window ends at the last second of its draw date (in the
//! promotion's local day) and reaches back `lookback_secs`. Both ends are
//! inclusive.

use chrono::NaiveDate;
use recharge_types::Timestamp;
use serde::{Deserialize, Serialize};

use crate::{DrawError, Result};

/// An inclusive range of event timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Window {
    /// Whether `ts` falls inside the window.
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts <= self.end
    }
}

/// First second of the day after `date`, as a UTC timestamp.
pub fn end_of_day_exclusive(date: NaiveDate, utc_offset_secs: i32) -> Result<i64> {
    let next = date
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| DrawError::InvalidInput(format!("draw date {date} out of range")))?;
    Ok(next.and_utc().timestamp() - i64::from(utc_offset_secs))
}

/// The window of a draw on `date` looking back `lookback_secs`.
pub fn lookback_window(date: NaiveDate, lookback_secs: u64, utc_offset_secs: i32) -> Result<Window> {
    if lookback_secs == 0 {
        return Err(DrawError::InvalidDrawConfig(
            "lookback must be positive".to_string(),
        ));
    }
    let end_excl = end_of_day_exclusive(date, utc_offset_secs)?;
    if end_excl <= 0 {
        return Err(DrawError::InvalidInput(format!(
            "draw date {date} precedes the epoch"
        )));
    }
    let lookback = i64::try_from(lookback_secs).unwrap_or(i64::MAX);
    let start = end_excl.saturating_sub(lookback).max(0);
    Ok(Window {
        start: start as Timestamp,
        end: (end_excl - 1) as Timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use recharge_types::{DEFAULT_DAILY_LOOKBACK_SECS, DEFAULT_SATURDAY_LOOKBACK_SECS};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn test_daily_window_is_the_draw_day() {
        // 2024-01-01T00:00:00Z
        let day_start = 1_704_067_200;
        let w = lookback_window(date(2024, 1, 1), DEFAULT_DAILY_LOOKBACK_SECS, 0).expect("window");
        assert_eq!(w.start, day_start);
        assert_eq!(w.end, day_start + 86_399);
        assert!(w.contains(day_start));
        assert!(w.contains(day_start + 86_399));
        assert!(!w.contains(day_start + 86_400));
        assert!(!w.contains(day_start - 1));
    }

    #[test]
    fn test_saturday_window_spans_seven_days() {
        let w = lookback_window(date(2024, 1, 6), DEFAULT_SATURDAY_LOOKBACK_SECS, 0)
            .expect("window");
        assert_eq!(w.end - w.start + 1, 7 * 86_400);
        // Starts at Sunday 2023-12-31T00:00:00Z.
        assert_eq!(w.start, 1_703_980_800);
    }

    #[test]
    fn test_offset_shifts_local_midnight() {
        let utc = lookback_window(date(2024, 1, 1), 86_400, 0).expect("utc");
        let lagos = lookback_window(date(2024, 1, 1), 86_400, 3600).expect("lagos");
        assert_eq!(utc.start - lagos.start, 3600);
        assert_eq!(utc.end - lagos.end, 3600);
    }

    #[test]
    fn test_zero_lookback_rejected() {
        let err = lookback_window(date(2024, 1, 1), 0, 0).expect_err("should fail");
        assert!(matches!(err, DrawError::InvalidDrawConfig(_)));
    }

    #[test]
    fn test_window_clamped_at_epoch() {
        let w = lookback_window(date(1970, 1, 2), 30 * 86_400, 0).expect("window");
        assert_eq!(w.start, 0);
        assert_eq!(w.end, 2 * 86_400 - 1);
    }
}
