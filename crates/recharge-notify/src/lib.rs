//! # recharge-notify
//!
//! Winner notification hand-off.
//!
//! The draw engine hands one [`NotificationJob`] per winner to a
//! [`NotificationHandoff`]. The production hand-off is the durable
//! [`outbox::OutboxHandoff`]; a [`dispatcher::Dispatcher`] drains the
//! outbox through an [`gateway::SmsGateway`] and writes the outcome back
//! onto the winner record.
//!
//! ## Modules
//!
//! - [`template`]: winner message rendering
//! - [`outbox`]: durable enqueue
//! - [`gateway`]: HTTPS SMS gateways with primary/fallback
//! - [`dispatcher`]: asynchronous delivery loop

use std::future::Future;

use recharge_types::{DrawId, Msisdn};

pub mod dispatcher;
pub mod gateway;
pub mod outbox;
pub mod template;

pub use dispatcher::{DispatchStats, Dispatcher, DispatcherConfig};
pub use gateway::{Delivery, Failover, GatewayConfig, HttpGateway, SmsGateway, SmsMessage};
pub use outbox::OutboxHandoff;
pub use template::{MessageTemplate, TemplateVars};

/// Error types for notification hand-off and delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The outbox could not be written or read.
    #[error("notification storage error: {0}")]
    Storage(#[from] recharge_db::DbError),

    /// A gateway rejected or failed the send.
    #[error("gateway {gateway} failed: {reason}")]
    Gateway {
        /// Gateway name.
        gateway: String,
        /// Transport or HTTP failure detail.
        reason: String,
    },

    /// A gateway did not answer within the deadline.
    #[error("gateway {gateway} timed out after {secs}s")]
    Timeout {
        /// Gateway name.
        gateway: String,
        /// Deadline that elapsed.
        secs: u64,
    },

    /// Template text is malformed.
    #[error("invalid template: {0}")]
    Template(String),

    /// Gateway configuration is unusable.
    #[error("invalid gateway config: {0}")]
    Config(String),
}

/// Convenience result type for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// One winner notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationJob {
    /// `<draw id>:<rank>.<slot within rank>`.
    pub correlation_id: String,
    pub draw_id: DrawId,
    pub msisdn: Msisdn,
    /// Rendered message text.
    pub body: String,
}

impl NotificationJob {
    /// Correlation id for the `slot`-th winner (1-based) of a prize rank.
    pub fn correlation_id(draw_id: &str, rank: u32, slot: u32) -> String {
        format!("{draw_id}:{rank}.{slot}")
    }
}

/// Accepts winner notifications for asynchronous delivery.
///
/// A successful return means the job is durably queued; delivery happens
/// later and is reported onto the winner's notification status.
pub trait NotificationHandoff: Send + Sync {
    fn enqueue(&self, job: NotificationJob) -> impl Future<Output = Result<()>> + Send;
}
