//! Integration test: end-to-end draw scenarios.
//!
//! Each test drives the engine the way the daemon does: subscribers opt in,
//! recharges are ingested, a draw is scheduled and executed, and winner
//! notifications land in the durable outbox.

use recharge_db::queries::outbox;
use recharge_draw::{DrawError, ExecuteOptions};
use recharge_integration_tests::{date, draw_spec, prizes, Harness, DAY, SATURDAY, TUESDAY};
use recharge_notify::{
    Delivery, Dispatcher, DispatcherConfig, Failover, NotifyError, SmsGateway, SmsMessage,
};
use recharge_types::{now_secs, DigitSet, DrawStatus, DrawType, NotificationStatus};

const A: &str = "2348031234562";
const B: &str = "2348031234567";
const C: &str = "2348031234560";

/// A gateway that is always down.
struct DownGateway(&'static str);

impl SmsGateway for DownGateway {
    fn name(&self) -> &str {
        self.0
    }

    async fn send(&self, _message: &SmsMessage) -> recharge_notify::Result<Delivery> {
        Err(NotifyError::Gateway {
            gateway: self.0.to_string(),
            reason: "HTTP 503 Service Unavailable".to_string(),
        })
    }
}

/// A gateway that accepts everything.
struct UpGateway(&'static str);

impl SmsGateway for UpGateway {
    fn name(&self) -> &str {
        self.0
    }

    async fn send(&self, _message: &SmsMessage) -> recharge_notify::Result<Delivery> {
        Ok(Delivery {
            gateway: self.0.to_string(),
        })
    }
}

enum Gw {
    Up(UpGateway),
    Down(DownGateway),
}

impl SmsGateway for Gw {
    fn name(&self) -> &str {
        match self {
            Gw::Up(g) => g.name(),
            Gw::Down(g) => g.name(),
        }
    }

    async fn send(&self, message: &SmsMessage) -> recharge_notify::Result<Delivery> {
        match self {
            Gw::Up(g) => g.send(message).await,
            Gw::Down(g) => g.send(message).await,
        }
    }
}

/// The Tuesday population: A and B opted in, C opted out again.
async fn tuesday_population(h: &Harness) {
    h.opted_in(A, TUESDAY - DAY).await.expect("opt in A");
    h.opted_in(B, TUESDAY - DAY).await.expect("opt in B");
    h.opted_in(C, TUESDAY - 2 * DAY).await.expect("opt in C");
    h.engine.opt_out(C, TUESDAY - DAY).await.expect("opt out C");

    h.topup(A, 150, TUESDAY + 3600).await.expect("topup A");
    h.topup(B, 250, TUESDAY + 7200).await.expect("topup B");
    h.topup(C, 1000, TUESDAY + 10_800).await.expect("topup C");
}

#[tokio::test]
async fn s1_tuesday_daily_draw_one_winner() {
    let h = Harness::new().expect("harness");
    tuesday_population(&h).await;

    assert_eq!(h.engine.subscriber(A).await.expect("A").points, 1);
    assert_eq!(h.engine.subscriber(B).await.expect("B").points, 2);
    assert_eq!(h.engine.subscriber(C).await.expect("C").points, 10);

    let tuesday = date(2024, 1, 2).expect("date");
    let digits = h
        .engine
        .default_eligible_digits(chrono::Weekday::Tue)
        .expect("tuesday digits");
    assert_eq!(digits.to_vec(), vec![2, 3]);

    let draw = h
        .engine
        .schedule(draw_spec(tuesday, DrawType::Daily, digits, prizes(&[(10_000, 1)])))
        .await
        .expect("schedule");
    let done = h.engine.execute(&draw.id).await.expect("execute");

    assert_eq!(done.status, DrawStatus::Completed);
    assert_eq!(done.winners.len(), 1);
    let winner = &done.winners[0];
    assert_eq!(winner.msisdn.as_str(), A);
    assert_eq!(winner.rank, 1);
    assert_eq!(winner.prize_amount, 10_000);
    assert!(done.unawarded.is_empty());
    assert_eq!(h.queued_for(&draw.id).await.expect("outbox"), 1);
}

#[tokio::test]
async fn s2_saturday_jackpot_with_lookback() {
    let h = Harness::new().expect("harness");
    let inside = "2348031111115";
    let outside = "2348032222225";
    h.opted_in(inside, SATURDAY - 30 * DAY).await.expect("opt in");
    h.opted_in(outside, SATURDAY - 30 * DAY).await.expect("opt in");
    h.topup(inside, 500, SATURDAY - 3 * DAY + 3600).await.expect("topup");
    h.topup(outside, 500, SATURDAY - 10 * DAY).await.expect("topup");

    let saturday = date(2024, 1, 6).expect("date");
    let draw = h
        .engine
        .schedule(draw_spec(
            saturday,
            DrawType::Saturday,
            DigitSet::ALL,
            prizes(&[(1_000_000, 2)]),
        ))
        .await
        .expect("schedule");
    assert_eq!(draw.lookback_secs, 7 * DAY);

    let done = h.engine.execute(&draw.id).await.expect("execute");
    assert_eq!(done.winners.len(), 1);
    assert_eq!(done.winners[0].msisdn.as_str(), inside);
    assert_eq!(done.unawarded.len(), 1);
    assert_eq!(done.unawarded[0].count, 1);
}

#[tokio::test]
async fn s3_empty_pool_completes_without_notifications() {
    let h = Harness::new().expect("harness");
    tuesday_population(&h).await;

    let tuesday = date(2024, 1, 2).expect("date");
    let digits = DigitSet::from_digits(&[8, 9]).expect("digits");
    let draw = h
        .engine
        .schedule(draw_spec(tuesday, DrawType::Daily, digits, prizes(&[(10_000, 1)])))
        .await
        .expect("schedule");
    let done = h.engine.execute(&draw.id).await.expect("execute");

    assert_eq!(done.status, DrawStatus::Completed);
    assert!(done.winners.is_empty());
    assert_eq!(h.queued_for(&draw.id).await.expect("outbox"), 0);
}

#[tokio::test]
async fn s4_same_seed_same_winners() {
    let mut runs = Vec::new();
    for _ in 0..2 {
        let h = Harness::new().expect("harness");
        for n in 0..40u32 {
            let msisdn = format!("2348030{n:05}{}", n % 4);
            h.opted_in(&msisdn, TUESDAY - DAY).await.expect("opt in");
            for k in 0..=(n % 3) {
                h.topup(&msisdn, 100 + 100 * i64::from(k), TUESDAY + u64::from(n * 60 + k))
                    .await
                    .expect("topup");
            }
        }
        let tuesday = date(2024, 1, 2).expect("date");
        let digits = DigitSet::from_digits(&[2, 3]).expect("digits");
        let draw = h
            .engine
            .schedule(draw_spec(tuesday, DrawType::Daily, digits, prizes(&[(10_000, 1), (1_000, 5)])))
            .await
            .expect("schedule");
        let options = ExecuteOptions {
            seed: Some(0xDEAD_BEEF),
            cancel: None,
        };
        let done = h.engine.execute_with(&draw.id, options).await.expect("execute");
        assert_eq!(done.seed, Some(0xDEAD_BEEF));
        runs.push(
            done.winners
                .into_iter()
                .map(|w| (w.msisdn, w.rank, w.prize_amount))
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(runs[0].len(), 6);
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn s5_parallel_execute_runs_once() {
    let h = Harness::new().expect("harness");
    tuesday_population(&h).await;
    let tuesday = date(2024, 1, 2).expect("date");
    let digits = DigitSet::from_digits(&[2, 3]).expect("digits");
    let draw = h
        .engine
        .schedule(draw_spec(tuesday, DrawType::Daily, digits, prizes(&[(10_000, 1)])))
        .await
        .expect("schedule");

    let first = {
        let engine = h.engine.clone();
        let id = draw.id.clone();
        tokio::spawn(async move { engine.execute(&id).await })
    };
    let second = {
        let engine = h.engine.clone();
        let id = draw.id.clone();
        tokio::spawn(async move { engine.execute(&id).await })
    };
    let results = [
        first.await.expect("join first"),
        second.await.expect("join second"),
    ];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    let conflict = results.iter().find_map(|r| r.as_ref().err()).expect("one loser");
    assert!(matches!(
        conflict,
        DrawError::AlreadyRunning(_)
            | DrawError::InvalidState {
                status: DrawStatus::Completed,
                ..
            }
    ));

    let stored = h.engine.draws_by_date(tuesday).await.expect("draws");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, DrawStatus::Completed);
    assert_eq!(stored[0].winners.len(), 1);
    assert_eq!(h.queued_for(&draw.id).await.expect("outbox"), 1);
}

#[tokio::test]
async fn s6_dispatch_failure_leaves_draw_completed() {
    let h = Harness::new().expect("harness");
    tuesday_population(&h).await;
    let tuesday = date(2024, 1, 2).expect("date");
    let digits = DigitSet::from_digits(&[2, 3]).expect("digits");
    let draw = h
        .engine
        .schedule(draw_spec(tuesday, DrawType::Daily, digits, prizes(&[(10_000, 1)])))
        .await
        .expect("schedule");
    h.engine.execute(&draw.id).await.expect("execute");

    let config = DispatcherConfig {
        max_attempts: 1,
        ..DispatcherConfig::default()
    };
    let dispatcher = Dispatcher::new(h.db.clone(), DownGateway("mtn"), config.clone());
    let stats = dispatcher.run_once(now_secs() + 1).await.expect("dispatch");
    assert_eq!(stats.failed, 1);

    let after = h.engine.get_draw(&draw.id).await.expect("get");
    assert_eq!(after.status, DrawStatus::Completed);
    assert_eq!(after.winners[0].notification_status, NotificationStatus::Failed);

    // An operator retry goes out through the fallback gateway.
    let retried = h
        .engine
        .retry_failed_notifications(&draw.id)
        .await
        .expect("retry");
    assert_eq!(retried, 1);

    let failover = Failover::new(
        Gw::Down(DownGateway("mtn")),
        Some(Gw::Up(UpGateway("kodobe"))),
    );
    let dispatcher = Dispatcher::new(h.db.clone(), failover, config);
    let stats = dispatcher.run_once(now_secs() + 1).await.expect("dispatch");
    assert_eq!(stats.sent, 1);

    let after = h.engine.get_draw(&draw.id).await.expect("get");
    assert_eq!(after.winners[0].notification_status, NotificationStatus::Sent);
    let db = h.db.lock().await;
    assert_eq!(
        outbox::count_in_state(&db, outbox::STATE_SENT).expect("count"),
        1
    );
}
