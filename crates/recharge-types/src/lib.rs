//! # recharge-types
//!
//! Shared domain types for the recharge-and-win promotion backend.
//!
//! - [`msisdn`]: E.164 subscriber numbers
//! - [`subscriber`]: opted-in subscribers and recharge events
//! - [`draw`]: draws, prizes, winners and the eligible-digit set

pub mod draw;
pub mod msisdn;
pub mod subscriber;

pub use draw::{
    DigitSet, Draw, DrawStatus, DrawType, NotificationStatus, Prize, UnawardedSlot, Winner,
};
pub use msisdn::Msisdn;
pub use subscriber::{Subscriber, TopUp};

/// Opaque draw identifier (hex).
pub type DrawId = String;

/// Opaque top-up identifier (hex).
pub type TopUpId = String;

/// Unix epoch seconds, UTC.
pub type Timestamp = u64;

/// Seconds in one calendar day.
pub const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Default DAILY lookback: the draw's own calendar day.
pub const DEFAULT_DAILY_LOOKBACK_SECS: u64 = SECS_PER_DAY;

/// Default SATURDAY lookback: the seven calendar days ending on the draw date.
pub const DEFAULT_SATURDAY_LOOKBACK_SECS: u64 = 7 * SECS_PER_DAY;

/// Error types for domain value validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypesError {
    /// The MSISDN could not be normalized to E.164.
    #[error("malformed MSISDN {raw:?}: {reason}")]
    MalformedMsisdn {
        /// Input as received.
        raw: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A digit outside 0-9.
    #[error("digit out of range: {0}")]
    DigitOutOfRange(u8),

    /// Unknown enum tag in storage or on the wire.
    #[error("unknown {kind}: {value}")]
    UnknownTag {
        /// Which enum was being parsed.
        kind: &'static str,
        /// The offending value.
        value: String,
    },

    /// Prize structure violates its ordering or quantity rules.
    #[error("invalid prize structure: {0}")]
    InvalidPrizeStructure(String),
}

/// Convenience result type for domain validation.
pub type Result<T> = std::result::Result<T, TypesError>;

/// Current Unix time in seconds.
pub fn now_secs() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
