//! # recharge-rules
//!
//! Read-mostly promotion policy, loaded once at startup:
//!
//! - [`points`]: recharge amount to awarded points
//! - [`digits`]: weekday to default eligible digits

pub mod digits;
pub mod points;

pub use digits::DigitPolicy;
pub use points::{PointBand, PointRules};

/// Error types for policy configuration.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    /// Band thresholds must be strictly increasing.
    #[error("point band thresholds must increase: {previous} then {next}")]
    UnorderedBands {
        /// Threshold of the earlier band.
        previous: u64,
        /// Threshold of the offending band.
        next: u64,
    },

    /// A band table must award something somewhere.
    #[error("point band table is empty")]
    NoBands,

    /// A configured digit set is empty.
    #[error("empty digit set configured for {0}")]
    EmptyDigits(chrono::Weekday),
}

/// Convenience result type for rules.
pub type Result<T> = std::result::Result<T, RulesError>;
