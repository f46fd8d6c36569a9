//! Point rules.
//!
//! Piecewise-constant award by recharge band. A recharge of `amount`
//! earns the points of the highest band whose `min_amount <= amount`,
//! or nothing below the first band.
//!
//! Default bands:
//!
//! ```text
//!        amount < 100   ->  0
//!  100 <= amount < 200  ->  1
//!  200 <= amount < 500  ->  2
//!  500 <= amount < 1000 ->  5
//! 1000 <= amount        -> 10
//! ```

use serde::{Deserialize, Serialize};

use crate::{Result, RulesError};

/// One band: recharges of at least `min_amount` earn `points`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointBand {
    pub min_amount: u64,
    pub points: u64,
}

/// The band table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PointBand>", into = "Vec<PointBand>")]
pub struct PointRules {
    bands: Vec<PointBand>,
}

impl PointRules {
    /// Build a table, requiring strictly increasing thresholds.
    pub fn new(bands: Vec<PointBand>) -> Result<Self> {
        if bands.is_empty() {
            return Err(RulesError::NoBands);
        }
        for pair in bands.windows(2) {
            if pair[1].min_amount <= pair[0].min_amount {
                return Err(RulesError::UnorderedBands {
                    previous: pair[0].min_amount,
                    next: pair[1].min_amount,
                });
            }
        }
        Ok(Self { bands })
    }

    /// Points for a recharge of `amount`. Total and pure.
    pub fn award(&self, amount: u64) -> u64 {
        self.bands
            .iter()
            .rev()
            .find(|band| band.min_amount <= amount)
            .map(|band| band.points)
            .unwrap_or(0)
    }

    pub fn bands(&self) -> &[PointBand] {
        &self.bands
    }
}

impl Default for PointRules {
    fn default() -> Self {
        let band = |min_amount, points| PointBand { min_amount, points };
        Self {
            bands: vec![band(100, 1), band(200, 2), band(500, 5), band(1000, 10)],
        }
    }
}

impl TryFrom<Vec<PointBand>> for PointRules {
    type Error = RulesError;

    fn try_from(value: Vec<PointBand>) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PointRules> for Vec<PointBand> {
    fn from(value: PointRules) -> Self {
        value.bands
    }
}
