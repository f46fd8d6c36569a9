//! Day-boundary scheduling.
//!
//! At every local midnight the day's default draw is scheduled. With
//! `auto_execute`, draws left `SCHEDULED` from days that have ended are
//! executed as well. Both steps are idempotent, so a restart simply
//! repeats them for the current day.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use recharge_draw::{DrawError, ExecuteOptions};
use recharge_types::{now_secs, DrawStatus, Timestamp, SECS_PER_DAY};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::DaemonState;

/// The local calendar date at `now`.
pub fn local_date(now: Timestamp, utc_offset_secs: i32) -> Option<NaiveDate> {
    let local = i64::try_from(now).ok()? + i64::from(utc_offset_secs);
    DateTime::from_timestamp(local, 0).map(|dt| dt.date_naive())
}

/// Seconds until the next local midnight.
pub fn seconds_until_next_day(now: Timestamp, utc_offset_secs: i32) -> u64 {
    let day = SECS_PER_DAY as i64;
    let local = now as i64 + i64::from(utc_offset_secs);
    (day - local.rem_euclid(day)) as u64
}

/// Boundary work for `today`.
pub async fn on_day_boundary(state: &DaemonState, today: NaiveDate) {
    match state.engine.schedule_default(today).await {
        Ok(Some(draw)) => {
            info!(draw_id = %draw.id, date = %today, draw_type = %draw.draw_type, "day's draw scheduled");
        }
        Ok(None) => info!(date = %today, "no draw configured for today"),
        Err(DrawError::DuplicateDraw { .. }) => {
            debug!(date = %today, "day's draw already scheduled");
        }
        Err(e) => error!(date = %today, "could not schedule day's draw: {}", e),
    }

    if state.config.scheduler.auto_execute {
        execute_overdue(state, today).await;
    }
}

async fn execute_overdue(state: &DaemonState, today: NaiveDate) {
    let scheduled = match state.engine.draws_by_status(DrawStatus::Scheduled).await {
        Ok(draws) => draws,
        Err(e) => {
            error!("could not list scheduled draws: {}", e);
            return;
        }
    };
    for draw in scheduled.into_iter().filter(|d| d.draw_date < today) {
        let options = ExecuteOptions {
            seed: None,
            cancel: Some(state.cancel.clone()),
        };
        match state.engine.execute_with(&draw.id, options).await {
            Ok(done) => info!(draw_id = %done.id, winners = done.winners.len(), "overdue draw executed"),
            Err(DrawError::AlreadyRunning(_)) => {}
            Err(e) => warn!(draw_id = %draw.id, "overdue draw failed: {}", e),
        }
    }
}

/// Run boundary work now and then at every local midnight until shutdown.
pub async fn run(state: Arc<DaemonState>, mut shutdown: broadcast::Receiver<()>) {
    let offset = state.config.draws.utc_offset_secs;
    info!("draw scheduler started");
    loop {
        match local_date(now_secs(), offset) {
            Some(today) => on_day_boundary(&state, today).await,
            None => error!("system clock outside the representable range"),
        }

        // One extra second lands safely past midnight.
        let wait = Duration::from_secs(seconds_until_next_day(now_secs(), offset) + 1);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.recv() => {
                info!("draw scheduler stopping");
                return;
            }
        }
    }
}
