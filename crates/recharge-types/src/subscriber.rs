//! Subscribers and recharge events.

use serde::{Deserialize, Serialize};

use crate::{Msisdn, Timestamp, TopUpId};

/// A subscriber known to the promotion.
///
/// Created lazily on first opt-in or first top-up, never deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub msisdn: Msisdn,
    pub opt_in: bool,
    pub opt_in_at: Option<Timestamp>,
    pub opt_out_at: Option<Timestamp>,
    /// Accumulated points. Only an administrative reset lowers this.
    pub points: u64,
    pub created_at: Timestamp,
}

impl Subscriber {
    /// Whether the subscriber was opted in at instant `at`.
    ///
    /// The registry keeps only the most recent opt-in and opt-out, so an
    /// opt-out that happened at or before `at`, after the latest opt-in,
    /// means "out".
    pub fn opted_in_at(&self, at: Timestamp) -> bool {
        opted_in_at(self.opt_in_at, self.opt_out_at, at)
    }
}

/// Opt-in status at `at` given the latest opt-in and opt-out instants.
pub fn opted_in_at(opt_in_at: Option<Timestamp>, opt_out_at: Option<Timestamp>, at: Timestamp) -> bool {
    match (opt_in_at, opt_out_at) {
        (None, _) => false,
        (Some(i), _) if i > at => false,
        (Some(_), None) => true,
        (Some(i), Some(o)) => o < i || o > at,
    }
}

/// A single recharge event. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopUp {
    pub id: TopUpId,
    pub msisdn: Msisdn,
    /// Amount in the operator's billing unit.
    pub amount: u64,
    /// Points frozen at write time from the point rules.
    pub awarded_points: u64,
    /// Event time, not ingest time.
    pub timestamp: Timestamp,
}
