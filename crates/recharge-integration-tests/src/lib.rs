//! Integration test fixtures for the recharge-and-win draw engine.
//!
//! The tests under `tests/` drive the engine end to end against an
//! in-memory SQLite store with the durable outbox as the hand-off.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p recharge-integration-tests
//! ```

use std::sync::Arc;

use chrono::NaiveDate;
use recharge_db::queries::outbox;
use recharge_db::SharedDb;
use recharge_draw::{DrawEngine, DrawSpec, EngineConfig};
use recharge_notify::OutboxHandoff;
use recharge_rules::{DigitPolicy, PointRules};
use recharge_types::{DigitSet, DrawType, Prize, Timestamp};

/// 2024-01-02T00:00:00Z, a Tuesday.
pub const TUESDAY: Timestamp = 1_704_153_600;

/// 2024-01-06T00:00:00Z, a Saturday.
pub const SATURDAY: Timestamp = 1_704_499_200;

pub const DAY: Timestamp = 86_400;

pub type Engine = DrawEngine<OutboxHandoff>;

/// An engine wired to a fresh in-memory store.
pub struct Harness {
    pub db: SharedDb,
    pub engine: Arc<Engine>,
}

impl Harness {
    pub fn new() -> recharge_db::Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> recharge_db::Result<Self> {
        let db = recharge_db::shared(recharge_db::open_memory()?);
        let engine = DrawEngine::new(
            db.clone(),
            OutboxHandoff::new(db.clone()),
            PointRules::default(),
            DigitPolicy::default(),
            config,
        );
        Ok(Self {
            db,
            engine: Arc::new(engine),
        })
    }

    /// Register a subscriber opted in since `at`.
    pub async fn opted_in(&self, msisdn: &str, at: Timestamp) -> recharge_draw::Result<()> {
        self.engine.opt_in(msisdn, at).await.map(|_| ())
    }

    pub async fn topup(&self, msisdn: &str, amount: i64, at: Timestamp) -> recharge_draw::Result<()> {
        self.engine.ingest_topup(msisdn, amount, at).await.map(|_| ())
    }

    /// Outbox jobs recorded for a draw.
    pub async fn queued_for(&self, draw_id: &str) -> recharge_db::Result<u64> {
        let db = self.db.lock().await;
        outbox::count_for_draw(&db, draw_id)
    }
}

pub fn date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Prize table from `(amount, quantity)` pairs, ranked in order.
pub fn prizes(tiers: &[(u64, u32)]) -> Vec<Prize> {
    tiers
        .iter()
        .enumerate()
        .map(|(i, (amount, quantity))| Prize {
            rank: i as u32 + 1,
            name: format!("Tier {}", i + 1),
            amount: *amount,
            quantity: *quantity,
        })
        .collect()
}

pub fn draw_spec(
    draw_date: NaiveDate,
    draw_type: DrawType,
    digits: DigitSet,
    prize_structure: Vec<Prize>,
) -> DrawSpec {
    DrawSpec {
        draw_date,
        draw_type,
        eligible_digits: digits,
        prize_structure,
        lookback_secs: None,
    }
}
