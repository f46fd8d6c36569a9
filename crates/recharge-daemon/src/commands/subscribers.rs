//! Subscriber and recharge command handlers.

use std::sync::Arc;

use recharge_types::{now_secs, Timestamp};
use serde::Deserialize;
use serde_json::Value;

use super::{params, to_json, Result};
use crate::DaemonState;

#[derive(Deserialize)]
struct TopUpParams {
    msisdn: String,
    amount: i64,
    /// Event time; defaults to now.
    timestamp: Option<Timestamp>,
}

#[derive(Deserialize)]
struct MsisdnParams {
    msisdn: String,
    /// Effective instant for opt-in/out; defaults to now.
    at: Option<Timestamp>,
}

pub async fn ingest_topup(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: TopUpParams = params(raw)?;
    let timestamp = p.timestamp.unwrap_or_else(now_secs);
    to_json(&state.engine.ingest_topup(&p.msisdn, p.amount, timestamp).await?)
}

pub async fn opt_in(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: MsisdnParams = params(raw)?;
    let at = p.at.unwrap_or_else(now_secs);
    to_json(&state.engine.opt_in(&p.msisdn, at).await?)
}

pub async fn opt_out(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: MsisdnParams = params(raw)?;
    let at = p.at.unwrap_or_else(now_secs);
    to_json(&state.engine.opt_out(&p.msisdn, at).await?)
}

pub async fn get_subscriber(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: MsisdnParams = params(raw)?;
    to_json(&state.engine.subscriber(&p.msisdn).await?)
}

pub async fn reset_points(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: MsisdnParams = params(raw)?;
    to_json(&state.engine.reset_points(&p.msisdn).await?)
}
