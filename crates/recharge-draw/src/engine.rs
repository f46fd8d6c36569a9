//! The draw engine.
//!
//! [`DrawEngine`] owns the store handle and the read-only policy, and
//! exposes every draw, ingest and registry operation. Execution follows
//! a fixed sequence:
//!
//! 1. load the draw; only `SCHEDULED` proceeds
//! 2. compare-and-swap `SCHEDULED -> RUNNING`; the loser gets `AlreadyRunning`
//! 3. fix and record the seed
//! 4. compute the window and build the candidate pool
//! 5. pick winners
//! 6. record winners and `COMPLETED` in one write
//! 7. hand off one notification per winner
//!
//! Any error, cancellation or deadline overrun in steps 3 to 6 moves the
//! draw to `FAILED`. Hand-off failures in step 7 never fail the draw; they
//! mark the winner's notification `FAILED` for a later retry.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, NaiveDate, Weekday};
use rand::RngCore;
use recharge_db::queries::{draws, subscribers};
use recharge_db::{DbError, SharedDb};
use recharge_notify::{NotificationHandoff, NotificationJob, TemplateVars};
use recharge_rules::digits::draw_type_for;
use recharge_rules::{DigitPolicy, PointRules};
use recharge_types::draw::validate_prize_structure;
use recharge_types::{
    now_secs, DigitSet, Draw, DrawId, DrawStatus, DrawType, Msisdn, NotificationStatus, Prize,
    Subscriber, Timestamp, TopUp, Winner,
};
use rusqlite::Connection;
use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::ingest::{self, TopUpEvent};
use crate::{eligibility, picker, window, DrawError, Result};

/// A request to schedule a draw.
#[derive(Debug, Clone)]
pub struct DrawSpec {
    pub draw_date: NaiveDate,
    pub draw_type: DrawType,
    pub eligible_digits: DigitSet,
    pub prize_structure: Vec<Prize>,
    /// Defaults to the configured lookback for `draw_type`.
    pub lookback_secs: Option<u64>,
}

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Use this seed instead of a fresh one from the OS.
    pub seed: Option<u64>,
    /// Execution stops with [`DrawError::Cancelled`] once this reads `true`.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl ExecuteOptions {
    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(rx) if *rx.borrow() => Err(DrawError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// The draw engine.
pub struct DrawEngine<H> {
    db: SharedDb,
    handoff: H,
    rules: Arc<PointRules>,
    digits: Arc<DigitPolicy>,
    config: Arc<EngineConfig>,
}

impl<H: NotificationHandoff> DrawEngine<H> {
    pub fn new(
        db: SharedDb,
        handoff: H,
        rules: PointRules,
        digits: DigitPolicy,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            handoff,
            rules: Arc::new(rules),
            digits: Arc::new(digits),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn db(&self) -> &SharedDb {
        &self.db
    }

    /// Normalize a raw MSISDN with the configured country code.
    pub fn normalize(&self, raw: &str) -> Result<Msisdn> {
        Ok(Msisdn::normalize(raw, &self.config.default_country_code)?)
    }

    // ------------------------------------------------------------------
    // Ingest and registry
    // ------------------------------------------------------------------

    /// Record a recharge event and credit the subscriber's points.
    pub async fn ingest_topup(&self, raw_msisdn: &str, amount: i64, timestamp: Timestamp) -> Result<TopUp> {
        let msisdn = self.normalize(raw_msisdn)?;
        let db = self.db.lock().await;
        ingest::ingest(
            &db,
            &self.rules,
            TopUpEvent {
                msisdn,
                amount,
                timestamp,
            },
            now_secs(),
            self.config.points_update_retries,
        )
    }

    pub async fn opt_in(&self, raw_msisdn: &str, at: Timestamp) -> Result<Subscriber> {
        let msisdn = self.normalize(raw_msisdn)?;
        let db = self.db.lock().await;
        let subscriber = ingest::opt_in(&db, &msisdn, at)?;
        tracing::info!(msisdn = %msisdn, "subscriber opted in");
        Ok(subscriber)
    }

    pub async fn opt_out(&self, raw_msisdn: &str, at: Timestamp) -> Result<Subscriber> {
        let msisdn = self.normalize(raw_msisdn)?;
        let db = self.db.lock().await;
        let subscriber = ingest::opt_out(&db, &msisdn, at)?;
        tracing::info!(msisdn = %msisdn, "subscriber opted out");
        Ok(subscriber)
    }

    pub async fn subscriber(&self, raw_msisdn: &str) -> Result<Subscriber> {
        let msisdn = self.normalize(raw_msisdn)?;
        let db = self.db.lock().await;
        Ok(subscribers::get(&db, &msisdn)?)
    }

    /// Administrative reset of a subscriber's points.
    pub async fn reset_points(&self, raw_msisdn: &str) -> Result<Subscriber> {
        let msisdn = self.normalize(raw_msisdn)?;
        let db = self.db.lock().await;
        let subscriber = ingest::reset_points(&db, &msisdn)?;
        tracing::warn!(msisdn = %msisdn, "subscriber points reset");
        Ok(subscriber)
    }

    // ------------------------------------------------------------------
    // Scheduling and queries
    // ------------------------------------------------------------------

    /// Configured digits for a weekday; `None` means no draw that day.
    pub fn default_eligible_digits(&self, day: Weekday) -> Option<DigitSet> {
        self.digits.default_eligible_digits(day)
    }

    /// Create a `SCHEDULED` draw.
    pub async fn schedule(&self, spec: DrawSpec) -> Result<Draw> {
        let lookback = self.validate(&spec)?;
        let db = self.db.lock().await;
        let draw = insert_draw(&db, &spec, lookback, None)?;
        tracing::info!(
            draw_id = %draw.id,
            date = %draw.draw_date,
            draw_type = %draw.draw_type,
            digits = %draw.eligible_digits,
            "draw scheduled"
        );
        Ok(draw)
    }

    /// Schedule the configured draw for `date`.
    ///
    /// Returns `Ok(None)` on a day without a draw.
    pub async fn schedule_default(&self, date: NaiveDate) -> Result<Option<Draw>> {
        let day = date.weekday();
        let Some(digits) = self.default_eligible_digits(day) else {
            return Ok(None);
        };
        let draw_type = draw_type_for(day);
        let spec = DrawSpec {
            draw_date: date,
            draw_type,
            eligible_digits: digits,
            prize_structure: self.config.prizes_for(draw_type).to_vec(),
            lookback_secs: None,
        };
        self.schedule(spec).await.map(Some)
    }

    /// Schedule a replacement for a `FAILED` draw with the same settings.
    pub async fn reschedule(&self, failed_id: &str) -> Result<Draw> {
        let db = self.db.lock().await;
        let failed = draws::get(&db, failed_id)?;
        if failed.status != DrawStatus::Failed {
            return Err(DrawError::InvalidState {
                id: failed.id,
                status: failed.status,
            });
        }
        let spec = DrawSpec {
            draw_date: failed.draw_date,
            draw_type: failed.draw_type,
            eligible_digits: failed.eligible_digits,
            prize_structure: failed.prize_structure,
            lookback_secs: Some(failed.lookback_secs),
        };
        let draw = insert_draw(&db, &spec, failed.lookback_secs, Some(failed.id))?;
        tracing::info!(draw_id = %draw.id, retry_of = ?draw.retry_of, "draw rescheduled");
        Ok(draw)
    }

    pub async fn get_draw(&self, id: &str) -> Result<Draw> {
        let db = self.db.lock().await;
        Ok(draws::get(&db, id)?)
    }

    pub async fn draws_by_date(&self, date: NaiveDate) -> Result<Vec<Draw>> {
        let db = self.db.lock().await;
        Ok(draws::by_date(&db, date)?)
    }

    pub async fn draws_by_status(&self, status: DrawStatus) -> Result<Vec<Draw>> {
        let db = self.db.lock().await;
        Ok(draws::list_by_status(&db, status)?)
    }

    pub async fn count_draws(&self, status: Option<DrawStatus>) -> Result<u64> {
        let db = self.db.lock().await;
        Ok(draws::count(&db, status)?)
    }

    fn validate(&self, spec: &DrawSpec) -> Result<u64> {
        if spec.eligible_digits.is_empty() {
            return Err(DrawError::InvalidDrawConfig(
                "eligible digit set is empty".to_string(),
            ));
        }
        validate_prize_structure(&spec.prize_structure)
            .map_err(|e| DrawError::InvalidDrawConfig(e.to_string()))?;
        if spec.draw_type == DrawType::Saturday && spec.draw_date.weekday() != Weekday::Sat {
            return Err(DrawError::InvalidDrawConfig(format!(
                "{} is a {}, not a Saturday",
                spec.draw_date,
                spec.draw_date.weekday()
            )));
        }
        let lookback = spec
            .lookback_secs
            .unwrap_or_else(|| self.config.lookback_for(spec.draw_type));
        if lookback == 0 {
            return Err(DrawError::InvalidDrawConfig(
                "lookback must be positive".to_string(),
            ));
        }
        Ok(lookback)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute a scheduled draw with a fresh seed.
    pub async fn execute(&self, id: &str) -> Result<Draw> {
        self.execute_with(id, ExecuteOptions::default()).await
    }

    /// Execute a scheduled draw.
    pub async fn execute_with(&self, id: &str, options: ExecuteOptions) -> Result<Draw> {
        let started = Instant::now();

        let draw = {
            let db = self.db.lock().await;
            let draw = draws::get(&db, id)?;
            match draw.status {
                DrawStatus::Scheduled => {}
                DrawStatus::Running => return Err(DrawError::AlreadyRunning(draw.id)),
                status => return Err(DrawError::InvalidState { id: draw.id, status }),
            }
            if !draws::transition_status(&db, id, DrawStatus::Scheduled, DrawStatus::Running, None)? {
                return Err(DrawError::AlreadyRunning(draw.id));
            }
            draw
        };
        tracing::info!(draw_id = %draw.id, status = %DrawStatus::Running, "draw started");

        let winners = match self.run(&draw, &options, started).await {
            Ok(winners) => winners,
            Err(err) => {
                self.mark_failed(&draw.id, &err).await;
                return Err(err);
            }
        };

        self.notify_winners(&draw, &winners).await;

        let db = self.db.lock().await;
        Ok(draws::get(&db, id)?)
    }

    /// Steps 3 to 6. Returns the recorded winners.
    async fn run(&self, draw: &Draw, options: &ExecuteOptions, started: Instant) -> Result<Vec<Winner>> {
        options.check_cancelled()?;

        let seed = options.seed.unwrap_or_else(|| rand::rngs::OsRng.next_u64());
        {
            let db = self.db.lock().await;
            if !draws::set_seed(&db, &draw.id, seed)? {
                return Err(current_state(&db, &draw.id));
            }
        }
        tracing::info!(draw_id = %draw.id, seed, "draw seeded");
        options.check_cancelled()?;

        let window = window::lookback_window(
            draw.draw_date,
            draw.lookback_secs,
            self.config.utc_offset_secs,
        )?;
        let pool = {
            let db = self.db.lock().await;
            eligibility::select_candidates(&db, &window, draw.eligible_digits)?
        };
        let deadline = self.config.deadline_for(pool.len());
        options.check_cancelled()?;

        let outcome = picker::pick_winners(&pool, &draw.prize_structure, seed, now_secs());
        if started.elapsed() >= deadline {
            return Err(DrawError::DeadlineExceeded(deadline));
        }
        options.check_cancelled()?;

        {
            let db = self.db.lock().await;
            let recorded = draws::record_completion(
                &db,
                &draw.id,
                &outcome.winners,
                &outcome.unawarded,
                seed,
                now_secs(),
            )?;
            if !recorded {
                return Err(current_state(&db, &draw.id));
            }
        }

        tracing::info!(
            draw_id = %draw.id,
            status = %DrawStatus::Completed,
            candidates = pool.len(),
            winners = outcome.winners.len(),
            unawarded = outcome.unawarded.iter().map(|u| u.count).sum::<u32>(),
            "draw completed"
        );
        Ok(outcome.winners)
    }

    async fn mark_failed(&self, id: &str, err: &DrawError) {
        let reason = err.to_string();
        let db = self.db.lock().await;
        match draws::transition_status(&db, id, DrawStatus::Running, DrawStatus::Failed, Some(&reason)) {
            Ok(true) => {
                tracing::warn!(draw_id = %id, status = %DrawStatus::Failed, error = %reason, "draw failed");
            }
            Ok(false) => {
                tracing::warn!(draw_id = %id, error = %reason, "draw left RUNNING before it could be failed");
            }
            Err(e) => {
                tracing::error!(draw_id = %id, error = %e, "could not record draw failure");
            }
        }
    }

    /// Hand off one notification per winner. Failures are recorded on the
    /// winner and never propagate.
    async fn notify_winners(&self, draw: &Draw, winners: &[Winner]) {
        for (winner, slot) in winners.iter().zip(slots(winners)) {
            if let Err(err) = self.hand_off(draw, winner, slot).await {
                tracing::warn!(
                    draw_id = %draw.id,
                    msisdn = %winner.msisdn,
                    error = %err,
                    "winner notification hand-off failed"
                );
                let db = self.db.lock().await;
                if let Err(e) = draws::set_notification_status(
                    &db,
                    &draw.id,
                    &winner.msisdn,
                    NotificationStatus::Failed,
                ) {
                    tracing::error!(draw_id = %draw.id, msisdn = %winner.msisdn, error = %e, "could not mark notification failed");
                }
            }
        }
    }

    async fn hand_off(&self, draw: &Draw, winner: &Winner, slot: u32) -> Result<()> {
        let body = self.config.winner_template.render(&TemplateVars {
            prize_amount: winner.prize_amount,
            draw_date: draw.draw_date,
        });
        let job = NotificationJob {
            correlation_id: NotificationJob::correlation_id(&draw.id, winner.rank, slot),
            draw_id: draw.id.clone(),
            msisdn: winner.msisdn.clone(),
            body,
        };
        self.handoff.enqueue(job).await?;
        Ok(())
    }

    /// Re-hand-off every winner of a completed draw whose notification
    /// failed. Returns how many were handed off.
    pub async fn retry_failed_notifications(&self, id: &str) -> Result<usize> {
        let draw = self.get_draw(id).await?;
        if draw.status != DrawStatus::Completed {
            return Err(DrawError::InvalidState {
                id: draw.id,
                status: draw.status,
            });
        }

        let mut retried = 0;
        for (winner, slot) in draw.winners.iter().zip(slots(&draw.winners)) {
            if winner.notification_status != NotificationStatus::Failed {
                continue;
            }
            self.hand_off(&draw, winner, slot).await?;
            let db = self.db.lock().await;
            draws::set_notification_status(&db, &draw.id, &winner.msisdn, NotificationStatus::Pending)?;
            retried += 1;
        }
        tracing::info!(draw_id = %draw.id, retried, "failed notifications handed off again");
        Ok(retried)
    }
}

/// 1-based position of each winner within its rank.
fn slots(winners: &[Winner]) -> Vec<u32> {
    let mut last_rank = None;
    let mut slot = 0;
    winners
        .iter()
        .map(|w| {
            if last_rank != Some(w.rank) {
                last_rank = Some(w.rank);
                slot = 0;
            }
            slot += 1;
            slot
        })
        .collect()
}

fn insert_draw(
    conn: &Connection,
    spec: &DrawSpec,
    lookback_secs: u64,
    retry_of: Option<DrawId>,
) -> Result<Draw> {
    let duplicate = || DrawError::DuplicateDraw {
        date: spec.draw_date,
        draw_type: spec.draw_type,
    };
    if draws::find_live(conn, spec.draw_date, spec.draw_type)?.is_some() {
        return Err(duplicate());
    }

    let draw = Draw {
        id: recharge_db::new_id(),
        draw_date: spec.draw_date,
        draw_type: spec.draw_type,
        status: DrawStatus::Scheduled,
        eligible_digits: spec.eligible_digits,
        lookback_secs,
        prize_structure: spec.prize_structure.clone(),
        winners: Vec::new(),
        unawarded: Vec::new(),
        executed_at: None,
        seed: None,
        failure_reason: None,
        retry_of,
        created_at: now_secs(),
    };
    match draws::insert(conn, &draw) {
        Ok(()) => Ok(draw),
        Err(DbError::Constraint(_)) => Err(duplicate()),
        Err(e) => Err(e.into()),
    }
}

/// The error describing why a draw is no longer `RUNNING`.
fn current_state(conn: &Connection, id: &str) -> DrawError {
    match draws::get(conn, id) {
        Ok(draw) => DrawError::InvalidState {
            id: draw.id,
            status: draw.status,
        },
        Err(e) => e.into(),
    }
}
