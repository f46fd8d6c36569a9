//! Draw structures.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{DrawId, Msisdn, Result, Timestamp, TypesError};

/// Draw cadence. Unique together with the draw date.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrawType {
    Daily,
    Saturday,
}

/// Draw lifecycle status.
///
/// `Scheduled -> Running -> Completed | Failed`. Failed draws are never
/// reused; a retry is a new draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrawStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
}

/// Delivery status of a winner's SMS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

macro_rules! tagged_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $tag:literal),+ $(,)? }) => {
        impl $ty {
            /// Storage / wire tag.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $tag,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($tag => Ok(Self::$variant),)+
                    other => Err(TypesError::UnknownTag {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

tagged_enum!(DrawType, "draw type", {
    Daily => "DAILY",
    Saturday => "SATURDAY",
});

tagged_enum!(DrawStatus, "draw status", {
    Scheduled => "SCHEDULED",
    Running => "RUNNING",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

tagged_enum!(NotificationStatus, "notification status", {
    Pending => "PENDING",
    Sent => "SENT",
    Failed => "FAILED",
});

/// A set of decimal digits 0-9.
///
/// Serialized as a sorted array, stored as a digit string (`"023"`).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct DigitSet(u16);

impl DigitSet {
    /// The empty set.
    pub const EMPTY: DigitSet = DigitSet(0);

    /// All ten digits.
    pub const ALL: DigitSet = DigitSet(0x3FF);

    /// Build a set from digits, rejecting anything above 9.
    pub fn from_digits(digits: &[u8]) -> Result<Self> {
        let mut bits = 0u16;
        for &d in digits {
            if d > 9 {
                return Err(TypesError::DigitOutOfRange(d));
            }
            bits |= 1 << d;
        }
        Ok(Self(bits))
    }

    /// Parse the storage form, a string of decimal characters.
    pub fn parse(s: &str) -> Result<Self> {
        let mut digits = Vec::with_capacity(s.len());
        for c in s.chars() {
            let d = c.to_digit(10).ok_or_else(|| TypesError::UnknownTag {
                kind: "digit",
                value: c.to_string(),
            })?;
            digits.push(d as u8);
        }
        Self::from_digits(&digits)
    }

    pub fn contains(&self, digit: u8) -> bool {
        digit <= 9 && self.0 & (1 << digit) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Digits in ascending order.
    pub fn to_vec(&self) -> Vec<u8> {
        (0..=9).filter(|d| self.contains(*d)).collect()
    }
}

impl fmt::Display for DigitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in self.to_vec() {
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DigitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.to_vec()).finish()
    }
}

impl TryFrom<Vec<u8>> for DigitSet {
    type Error = TypesError;

    fn try_from(value: Vec<u8>) -> Result<Self> {
        Self::from_digits(&value)
    }
}

impl From<DigitSet> for Vec<u8> {
    fn from(value: DigitSet) -> Self {
        value.to_vec()
    }
}

/// One prize tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prize {
    /// 1-based, strictly increasing within a draw.
    pub rank: u32,
    pub name: String,
    /// Currency minor units.
    pub amount: u64,
    /// Winners to pick at this rank.
    pub quantity: u32,
}

/// Check rank ordering and quantities of a prize table.
pub fn validate_prize_structure(prizes: &[Prize]) -> Result<()> {
    if prizes.is_empty() {
        return Err(TypesError::InvalidPrizeStructure(
            "at least one prize is required".to_string(),
        ));
    }
    let mut previous = 0u32;
    for prize in prizes {
        if prize.rank == 0 {
            return Err(TypesError::InvalidPrizeStructure(
                "ranks are 1-based".to_string(),
            ));
        }
        if prize.rank <= previous {
            return Err(TypesError::InvalidPrizeStructure(format!(
                "rank {} does not follow rank {previous}",
                prize.rank
            )));
        }
        if prize.quantity == 0 {
            return Err(TypesError::InvalidPrizeStructure(format!(
                "rank {} has zero quantity",
                prize.rank
            )));
        }
        if prize.name.trim().is_empty() {
            return Err(TypesError::InvalidPrizeStructure(format!(
                "rank {} has no name",
                prize.rank
            )));
        }
        previous = prize.rank;
    }
    Ok(())
}

/// Total winners a prize table asks for.
pub fn total_picks(prizes: &[Prize]) -> u64 {
    prizes.iter().map(|p| u64::from(p.quantity)).sum()
}

/// A picked winner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub msisdn: Msisdn,
    pub rank: u32,
    pub prize_amount: u64,
    pub picked_at: Timestamp,
    pub notification_status: NotificationStatus,
}

/// Prize slots left unawarded because the candidate pool ran out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnawardedSlot {
    pub rank: u32,
    pub count: u32,
}

/// A scheduled or executed draw.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    pub id: DrawId,
    pub draw_date: NaiveDate,
    pub draw_type: DrawType,
    pub status: DrawStatus,
    pub eligible_digits: DigitSet,
    /// Window length ending at the close of `draw_date`.
    pub lookback_secs: u64,
    pub prize_structure: Vec<Prize>,
    /// Picking order; populated on completion.
    pub winners: Vec<Winner>,
    pub unawarded: Vec<UnawardedSlot>,
    pub executed_at: Option<Timestamp>,
    /// Seed actually used, recorded before picking begins.
    pub seed: Option<u64>,
    pub failure_reason: Option<String>,
    /// The failed draw this one replaces, if any.
    pub retry_of: Option<DrawId>,
    pub created_at: Timestamp,
}
