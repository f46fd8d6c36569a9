//! Durable hand-off into the SQLite outbox.

use recharge_db::queries::outbox::{self, NewJob};
use recharge_db::SharedDb;
use recharge_types::now_secs;

use crate::{NotificationHandoff, NotificationJob, Result};

/// Enqueues jobs into the `notification_outbox` table.
#[derive(Clone)]
pub struct OutboxHandoff {
    db: SharedDb,
}

impl OutboxHandoff {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }
}

impl NotificationHandoff for OutboxHandoff {
    async fn enqueue(&self, job: NotificationJob) -> Result<()> {
        let db = self.db.lock().await;
        outbox::enqueue(
            &db,
            &NewJob {
                correlation_id: &job.correlation_id,
                draw_id: &job.draw_id,
                msisdn: &job.msisdn,
                body: &job.body,
            },
            now_secs(),
        )?;
        tracing::debug!(correlation_id = %job.correlation_id, "notification enqueued");
        Ok(())
    }
}
