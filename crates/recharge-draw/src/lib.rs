//! # recharge-draw
//!
//! The draw engine: recharge ingest, eligibility, weighted winner
//! selection and the draw state machine.
//!
//! ## Modules
//!
//! - [`ingest`]: top-up ingest and subscriber registry operations
//! - [`window`]: lookback windows anchored on a draw date
//! - [`eligibility`]: the candidate pool for a draw
//! - [`picker`]: seeded weighted sampling without replacement
//! - [`engine`]: scheduling, execution and notification hand-off
//!
//! ## State machine
//!
//! ```text
//! SCHEDULED --[CAS -> RUNNING]--> RUNNING --[record completion]--> COMPLETED
//!                                        \--[unrecoverable]-------> FAILED
//! ```

pub mod config;
pub mod eligibility;
pub mod engine;
pub mod ingest;
pub mod picker;
pub mod window;

use std::time::Duration;

use chrono::NaiveDate;
use recharge_db::DbError;
use recharge_notify::NotifyError;
use recharge_types::{DrawId, DrawStatus, DrawType, TypesError};

pub use config::EngineConfig;
pub use eligibility::CandidatePool;
pub use engine::{DrawEngine, DrawSpec, ExecuteOptions};
pub use picker::PickOutcome;
pub use window::Window;

/// Error kinds produced by the draw engine.
#[derive(Debug, thiserror::Error)]
pub enum DrawError {
    /// Malformed MSISDN, non-positive amount, bad digit.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A schedule request failed validation.
    #[error("invalid draw config: {0}")]
    InvalidDrawConfig(String),

    /// A live draw already exists for this date and type.
    #[error("a {draw_type} draw is already scheduled for {date}")]
    DuplicateDraw {
        /// Draw date.
        date: NaiveDate,
        /// Draw type.
        draw_type: DrawType,
    },

    /// Unknown draw or subscriber.
    #[error("not found: {0}")]
    NotFound(String),

    /// The draw is not in a status that allows the operation.
    #[error("draw {id} is {status}")]
    InvalidState {
        /// Draw id.
        id: DrawId,
        /// Status found.
        status: DrawStatus,
    },

    /// Another executor won the SCHEDULED -> RUNNING race.
    #[error("draw {0} is already running")]
    AlreadyRunning(DrawId),

    /// Persistence fault; retryable.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] DbError),

    /// The caller withdrew the request before completion.
    #[error("draw execution cancelled")]
    Cancelled,

    /// Execution ran past its deadline.
    #[error("draw execution exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),

    /// A winner notification could not be handed off.
    #[error("notification dispatch failed: {0}")]
    NotificationDispatchFailed(#[from] NotifyError),
}

impl DrawError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DrawError::StorageUnavailable(_) | DrawError::NotificationDispatchFailed(_)
        )
    }
}

impl From<DbError> for DrawError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => DrawError::NotFound(what),
            other => DrawError::StorageUnavailable(other),
        }
    }
}

impl From<TypesError> for DrawError {
    fn from(err: TypesError) -> Self {
        DrawError::InvalidInput(err.to_string())
    }
}

/// Convenience result type for the draw engine.
pub type Result<T> = std::result::Result<T, DrawError>;
