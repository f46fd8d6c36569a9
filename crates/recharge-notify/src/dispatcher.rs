//! Outbox delivery loop.
//!
//! Claims due jobs, sends each through the gateway under a deadline, and
//! records the outcome on both the outbox row and the winner record.
//! Failed attempts back off exponentially until `max_attempts`, after
//! which the winner is marked `FAILED`.

use std::time::Duration;

use recharge_db::queries::{draws, outbox};
use recharge_db::SharedDb;
use recharge_types::{now_secs, NotificationStatus, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::gateway::{SmsGateway, SmsMessage};
use crate::{NotifyError, Result};

/// Delivery loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Per-send deadline.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts before a job is terminally failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base retry delay, doubled per attempt.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    /// Idle wait between outbox polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Jobs claimed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_backoff_secs() -> u64 {
    60
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    50
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
        }
    }
}

/// Outcome counts of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: u32,
    pub retried: u32,
    pub failed: u32,
}

/// Drains the notification outbox.
pub struct Dispatcher<G> {
    db: SharedDb,
    gateway: G,
    config: DispatcherConfig,
}

impl<G: SmsGateway> Dispatcher<G> {
    pub fn new(db: SharedDb, gateway: G, config: DispatcherConfig) -> Self {
        Self {
            db,
            gateway,
            config,
        }
    }

    /// Deliver every job due at `now`.
    pub async fn run_once(&self, now: Timestamp) -> Result<DispatchStats> {
        let jobs = {
            let db = self.db.lock().await;
            outbox::due(&db, now, self.config.batch_size)?
        };

        let mut stats = DispatchStats::default();
        for job in jobs {
            let message = SmsMessage {
                to: job.msisdn.clone(),
                body: job.body.clone(),
                correlation_id: job.correlation_id.clone(),
            };
            let outcome = tokio::time::timeout(
                Duration::from_secs(self.config.timeout_secs),
                self.gateway.send(&message),
            )
            .await
            .unwrap_or_else(|_| {
                Err(NotifyError::Timeout {
                    gateway: self.gateway.name().to_string(),
                    secs: self.config.timeout_secs,
                })
            });

            let db = self.db.lock().await;
            match outcome {
                Ok(delivery) => {
                    outbox::mark_sent(&db, job.id, &delivery.gateway, now)?;
                    report(&db, &job.draw_id, &job.msisdn, NotificationStatus::Sent);
                    info!(
                        correlation_id = %job.correlation_id,
                        gateway = %delivery.gateway,
                        "winner notification sent"
                    );
                    stats.sent += 1;
                }
                Err(e) => {
                    let attempts = job.attempts + 1;
                    if attempts >= self.config.max_attempts {
                        outbox::mark_attempt_failed(&db, job.id, &e.to_string(), None, now)?;
                        report(&db, &job.draw_id, &job.msisdn, NotificationStatus::Failed);
                        warn!(
                            correlation_id = %job.correlation_id,
                            attempts,
                            error = %e,
                            "winner notification failed permanently"
                        );
                        stats.failed += 1;
                    } else {
                        let retry_at = now + self.backoff(job.attempts);
                        outbox::mark_attempt_failed(
                            &db,
                            job.id,
                            &e.to_string(),
                            Some(retry_at),
                            now,
                        )?;
                        warn!(
                            correlation_id = %job.correlation_id,
                            attempts,
                            retry_at,
                            error = %e,
                            "winner notification failed, will retry"
                        );
                        stats.retried += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    /// Poll the outbox until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        info!(gateway = self.gateway.name(), "notification dispatcher started");
        loop {
            if let Err(e) = self.run_once(now_secs()).await {
                error!("dispatcher pass failed: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => {
                    info!("notification dispatcher stopping");
                    return;
                }
            }
        }
    }

    fn backoff(&self, previous_attempts: u32) -> u64 {
        self.config
            .retry_backoff_secs
            .saturating_mul(1u64 << previous_attempts.min(6))
    }
}

fn report(
    conn: &rusqlite::Connection,
    draw_id: &str,
    msisdn: &recharge_types::Msisdn,
    status: NotificationStatus,
) {
    if let Err(e) = draws::set_notification_status(conn, draw_id, msisdn, status) {
        warn!(draw_id, %msisdn, "could not record notification status: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Delivery;
    use chrono::NaiveDate;
    use recharge_db::queries::outbox::NewJob;
    use recharge_types::{DigitSet, Draw, DrawStatus, DrawType, Msisdn, Prize, Winner};
    use std::sync::atomic::{AtomicU32, Ordering};

    enum Behaviour {
        Ok,
        Fail,
        Hang,
    }

    struct Scripted {
        behaviour: Behaviour,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl SmsGateway for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _message: &SmsMessage) -> Result<Delivery> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Ok => Ok(Delivery {
                    gateway: "scripted".to_string(),
                }),
                Behaviour::Fail => Err(NotifyError::Gateway {
                    gateway: "scripted".to_string(),
                    reason: "HTTP 503 Service Unavailable".to_string(),
                }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Delivery {
                        gateway: "scripted".to_string(),
                    })
                }
            }
        }
    }

    fn winner_msisdn() -> Msisdn {
        Msisdn::parse("2348031234562").expect("msisdn")
    }

    /// A completed draw with one winner and its queued notification.
    fn seeded_db() -> SharedDb {
        let conn = recharge_db::open_memory().expect("open");
        let draw = Draw {
            id: "d1".to_string(),
            draw_date: NaiveDate::from_ymd_opt(2024, 6, 4).expect("date"),
            draw_type: DrawType::Daily,
            status: DrawStatus::Scheduled,
            eligible_digits: DigitSet::ALL,
            lookback_secs: 86_400,
            prize_structure: vec![Prize {
                rank: 1,
                name: "Jackpot".to_string(),
                amount: 10_000,
                quantity: 1,
            }],
            winners: Vec::new(),
            unawarded: Vec::new(),
            executed_at: None,
            seed: None,
            failure_reason: None,
            retry_of: None,
            created_at: 0,
        };
        draws::insert(&conn, &draw).expect("insert");
        draws::transition_status(&conn, "d1", DrawStatus::Scheduled, DrawStatus::Running, None)
            .expect("cas");
        let winner = Winner {
            msisdn: winner_msisdn(),
            rank: 1,
            prize_amount: 10_000,
            picked_at: 10,
            notification_status: NotificationStatus::Pending,
        };
        draws::record_completion(&conn, "d1", &[winner], &[], 1, 10).expect("complete");
        outbox::enqueue(
            &conn,
            &NewJob {
                correlation_id: "d1:1.1",
                draw_id: "d1",
                msisdn: &winner_msisdn(),
                body: "You won",
            },
            100,
        )
        .expect("enqueue");
        recharge_db::shared(conn)
    }

    async fn winner_status(db: &SharedDb) -> NotificationStatus {
        let conn = db.lock().await;
        draws::winners(&conn, "d1").expect("winners")[0].notification_status
    }

    #[tokio::test]
    async fn test_successful_delivery_marks_winner_sent() {
        let db = seeded_db();
        let dispatcher = Dispatcher::new(db.clone(), Scripted::new(Behaviour::Ok), DispatcherConfig::default());
        let stats = dispatcher.run_once(100).await.expect("pass");
        assert_eq!(stats, DispatchStats { sent: 1, retried: 0, failed: 0 });
        assert_eq!(winner_status(&db).await, NotificationStatus::Sent);

        // Nothing left to send.
        let stats = dispatcher.run_once(10_000).await.expect("pass");
        assert_eq!(stats, DispatchStats::default());
    }

    #[tokio::test]
    async fn test_failure_retries_then_gives_up() {
        let db = seeded_db();
        let config = DispatcherConfig {
            max_attempts: 2,
            retry_backoff_secs: 10,
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(db.clone(), Scripted::new(Behaviour::Fail), config);

        let stats = dispatcher.run_once(100).await.expect("first pass");
        assert_eq!(stats.retried, 1);
        assert_eq!(winner_status(&db).await, NotificationStatus::Pending);

        // Backoff not yet elapsed.
        assert_eq!(dispatcher.run_once(105).await.expect("pass"), DispatchStats::default());

        let stats = dispatcher.run_once(110).await.expect("second pass");
        assert_eq!(stats.failed, 1);
        assert_eq!(winner_status(&db).await, NotificationStatus::Failed);
        assert_eq!(dispatcher.gateway.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_gateway_times_out() {
        let db = seeded_db();
        let config = DispatcherConfig {
            max_attempts: 1,
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(db.clone(), Scripted::new(Behaviour::Hang), config);
        let stats = dispatcher.run_once(100).await.expect("pass");
        assert_eq!(stats.failed, 1);
        assert_eq!(winner_status(&db).await, NotificationStatus::Failed);

        let conn = db.lock().await;
        assert_eq!(outbox::count_in_state(&conn, outbox::STATE_FAILED).expect("count"), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let dispatcher = Dispatcher::new(
            seeded_db(),
            Scripted::new(Behaviour::Ok),
            DispatcherConfig {
                retry_backoff_secs: 60,
                ..DispatcherConfig::default()
            },
        );
        assert_eq!(dispatcher.backoff(0), 60);
        assert_eq!(dispatcher.backoff(1), 120);
        assert_eq!(dispatcher.backoff(3), 480);
        assert_eq!(dispatcher.backoff(50), 60 * 64);
    }
}
