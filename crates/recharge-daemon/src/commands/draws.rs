//! Draw command handlers.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Weekday};
use recharge_draw::{DrawError, DrawSpec, ExecuteOptions};
use recharge_rules::digits::draw_type_for;
use recharge_types::{DigitSet, DrawStatus, DrawType, Prize};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;

use super::{params, to_json, Result};
use crate::DaemonState;

#[derive(Deserialize)]
struct ScheduleParams {
    draw_date: NaiveDate,
    /// Defaults to the weekday's draw type.
    draw_type: Option<DrawType>,
    /// Defaults to the weekday's configured digits.
    eligible_digits: Option<DigitSet>,
    /// Defaults to the configured table for the draw type.
    prize_structure: Option<Vec<Prize>>,
    lookback_secs: Option<u64>,
}

#[derive(Deserialize)]
struct DrawIdParams {
    draw_id: String,
}

#[derive(Deserialize)]
struct ExecuteParams {
    draw_id: String,
    /// Replay with a recorded seed.
    seed: Option<u64>,
}

#[derive(Deserialize)]
struct DateParams {
    draw_date: NaiveDate,
}

#[derive(Deserialize)]
struct StatusParams {
    status: Option<DrawStatus>,
}

#[derive(Deserialize)]
struct DayParams {
    day: String,
}

/// Schedule a draw. Omitted fields take the configured defaults.
pub async fn schedule_draw(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: ScheduleParams = params(raw)?;
    let engine = &state.engine;
    let day = p.draw_date.weekday();
    let draw_type = p.draw_type.unwrap_or_else(|| draw_type_for(day));
    let eligible_digits = match p.eligible_digits {
        Some(digits) => digits,
        None => engine.default_eligible_digits(day).ok_or_else(|| {
            DrawError::InvalidDrawConfig(format!("no default digits for {day}"))
        })?,
    };
    let prize_structure = p
        .prize_structure
        .unwrap_or_else(|| engine.config().prizes_for(draw_type).to_vec());

    let draw = engine
        .schedule(DrawSpec {
            draw_date: p.draw_date,
            draw_type,
            eligible_digits,
            prize_structure,
            lookback_secs: p.lookback_secs,
        })
        .await?;
    to_json(&draw)
}

/// Execute a scheduled draw. It stops, and the draw fails, once `cancel`
/// flips.
pub async fn execute_draw(
    state: &Arc<DaemonState>,
    raw: &Value,
    cancel: &watch::Receiver<bool>,
) -> Result {
    let p: ExecuteParams = params(raw)?;
    let options = ExecuteOptions {
        seed: p.seed,
        cancel: Some(cancel.clone()),
    };
    let draw = state.engine.execute_with(&p.draw_id, options).await?;
    to_json(&draw)
}

pub async fn get_draw(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: DrawIdParams = params(raw)?;
    to_json(&state.engine.get_draw(&p.draw_id).await?)
}

pub async fn get_draws_by_date(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: DateParams = params(raw)?;
    to_json(&state.engine.draws_by_date(p.draw_date).await?)
}

/// List draws in one status (default `SCHEDULED`).
pub async fn list_draws(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: StatusParams = params(raw)?;
    let status = p.status.unwrap_or(DrawStatus::Scheduled);
    to_json(&state.engine.draws_by_status(status).await?)
}

pub async fn count_draws(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: StatusParams = params(raw)?;
    let count = state.engine.count_draws(p.status).await?;
    Ok(serde_json::json!({ "count": count }))
}

pub async fn reschedule_draw(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: DrawIdParams = params(raw)?;
    to_json(&state.engine.reschedule(&p.draw_id).await?)
}

pub async fn retry_notifications(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: DrawIdParams = params(raw)?;
    let retried = state.engine.retry_failed_notifications(&p.draw_id).await?;
    Ok(serde_json::json!({ "draw_id": p.draw_id, "retried": retried }))
}

/// Digits configured for a weekday (`"monday"`, `"Mon"`, ...).
pub async fn get_default_digits(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: DayParams = params(raw)?;
    let day: Weekday = p
        .day
        .parse()
        .map_err(|_| DrawError::InvalidInput(format!("unknown weekday {:?}", p.day)))?;
    let digits = state.engine.default_eligible_digits(day);
    Ok(serde_json::json!({
        "day": day.to_string(),
        "draw_type": digits.map(|_| draw_type_for(day)),
        "eligible_digits": digits,
    }))
}
