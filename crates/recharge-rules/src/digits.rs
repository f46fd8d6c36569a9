//! Default eligible digits by weekday.
//!
//! Each weekday is bound to the digit set its draw uses unless the
//! scheduler is told otherwise. A day with no entry has no draw.

use chrono::Weekday;
use recharge_types::{DigitSet, DrawType};
use serde::{Deserialize, Serialize};

use crate::{Result, RulesError};

/// Weekday to digit set mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitPolicy {
    #[serde(default)]
    pub monday: Option<DigitSet>,
    #[serde(default)]
    pub tuesday: Option<DigitSet>,
    #[serde(default)]
    pub wednesday: Option<DigitSet>,
    #[serde(default)]
    pub thursday: Option<DigitSet>,
    #[serde(default)]
    pub friday: Option<DigitSet>,
    #[serde(default)]
    pub saturday: Option<DigitSet>,
    #[serde(default)]
    pub sunday: Option<DigitSet>,
}

impl DigitPolicy {
    /// Reject configured-but-empty sets.
    pub fn validate(&self) -> Result<()> {
        for day in ALL_DAYS {
            if let Some(set) = self.slot(day) {
                if set.is_empty() {
                    return Err(RulesError::EmptyDigits(day));
                }
            }
        }
        Ok(())
    }

    /// The default digit set for a weekday, if that day has a draw.
    pub fn default_eligible_digits(&self, day: Weekday) -> Option<DigitSet> {
        self.slot(day).copied()
    }

    fn slot(&self, day: Weekday) -> Option<&DigitSet> {
        match day {
            Weekday::Mon => self.monday.as_ref(),
            Weekday::Tue => self.tuesday.as_ref(),
            Weekday::Wed => self.wednesday.as_ref(),
            Weekday::Thu => self.thursday.as_ref(),
            Weekday::Fri => self.friday.as_ref(),
            Weekday::Sat => self.saturday.as_ref(),
            Weekday::Sun => self.sunday.as_ref(),
        }
    }
}

/// The draw cadence held on a weekday: the weekly jackpot on Saturday,
/// the daily draw otherwise.
pub fn draw_type_for(day: Weekday) -> DrawType {
    match day {
        Weekday::Sat => DrawType::Saturday,
        _ => DrawType::Daily,
    }
}

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn pair(a: u8, b: u8) -> Option<DigitSet> {
    DigitSet::from_digits(&[a, b]).ok()
}

impl Default for DigitPolicy {
    fn default() -> Self {
        Self {
            monday: pair(0, 1),
            tuesday: pair(2, 3),
            wednesday: pair(4, 5),
            thursday: pair(6, 7),
            friday: pair(8, 9),
            saturday: Some(DigitSet::ALL),
            sunday: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mapping() {
        let policy = DigitPolicy::default();
        policy.validate().expect("valid");
        assert_eq!(
            policy.default_eligible_digits(Weekday::Mon).map(|d| d.to_vec()),
            Some(vec![0, 1])
        );
        assert_eq!(
            policy.default_eligible_digits(Weekday::Tue).map(|d| d.to_vec()),
            Some(vec![2, 3])
        );
        assert_eq!(policy.default_eligible_digits(Weekday::Sat), Some(DigitSet::ALL));
        assert_eq!(policy.default_eligible_digits(Weekday::Sun), None);
    }

    #[test]
    fn test_every_digit_has_a_weekday() {
        let policy = DigitPolicy::default();
        let mut covered = DigitSet::EMPTY.to_vec();
        for day in [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri] {
            covered.extend(policy.default_eligible_digits(day).map(|d| d.to_vec()).unwrap_or_default());
        }
        covered.sort_unstable();
        assert_eq!(covered, (0..=9).collect::<Vec<u8>>());
    }

    #[test]
    fn test_empty_set_rejected() {
        let policy = DigitPolicy {
            sunday: Some(DigitSet::EMPTY),
            ..DigitPolicy::default()
        };
        assert!(matches!(policy.validate(), Err(RulesError::EmptyDigits(Weekday::Sun))));
    }

    #[test]
    fn test_draw_type_for() {
        assert_eq!(draw_type_for(Weekday::Sat), DrawType::Saturday);
        assert_eq!(draw_type_for(Weekday::Tue), DrawType::Daily);
    }
}
