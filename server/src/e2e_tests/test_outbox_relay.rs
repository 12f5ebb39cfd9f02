//! Tasks survive a broker outage at commit time and are relayed later.

use chrono::TimeDelta;

use crate::e2e_tests::helpers::*;
use crate::identity::register_user;
use crate::queue::{OutboxRelay, ProcessOutcome};
use crate::worker::TASK_SEND_VERIFY_EMAIL;

#[tokio::test]
async fn test_broker_outage_then_relay() {
    let bank = TestBank::new();
    bank.broker.set_down(true);

    let user = register_user(&bank.store, &user_params("alice"))
        .await
        .expect("user commits despite the outage");
    assert_eq!(user.username, "alice");

    let pending = bank.store.pending_outbox().await.expect("outbox");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task.task_type, TASK_SEND_VERIFY_EMAIL);

    let relay = OutboxRelay::new(
        bank.store.clone(),
        bank.distributor.clone(),
        std::time::Duration::from_millis(10),
    )
    .with_grace(TimeDelta::seconds(1));

    // Still down: the entry stays
    bank.time.advance(TimeDelta::seconds(2));
    assert_eq!(relay.drain_once().await.expect("drain"), 0);
    assert_eq!(bank.store.pending_outbox().await.expect("outbox").len(), 1);

    bank.broker.set_down(false);
    assert_eq!(relay.drain_once().await.expect("drain"), 1);
    assert!(bank.store.pending_outbox().await.expect("outbox").is_empty());
    assert_eq!(relay.drain_once().await.expect("drain"), 0);

    let processor = bank.processor();
    bank.time.advance(TimeDelta::seconds(11));
    assert_eq!(
        processor.process_next().await.expect("poll"),
        Some(ProcessOutcome::Acked)
    );
    assert_eq!(processor.process_next().await.expect("poll"), None);
}

#[tokio::test]
async fn test_relay_skips_fresh_entries() {
    let bank = TestBank::new();
    bank.broker.set_down(true);
    register_user(&bank.store, &user_params("alice"))
        .await
        .expect("register");
    bank.broker.set_down(false);

    let relay = OutboxRelay::new(
        bank.store.clone(),
        bank.distributor.clone(),
        std::time::Duration::from_millis(10),
    );
    assert_eq!(relay.drain_once().await.expect("drain"), 0);

    bank.time.advance(TimeDelta::seconds(5));
    assert_eq!(relay.drain_once().await.expect("drain"), 1);
}

#[tokio::test]
async fn test_background_relay_drains() {
    let bank = TestBank::new();
    bank.broker.set_down(true);
    register_user(&bank.store, &user_params("alice"))
        .await
        .expect("register");
    bank.broker.set_down(false);
    bank.time.advance(TimeDelta::minutes(1));

    let handle = OutboxRelay::new(
        bank.store.clone(),
        bank.distributor.clone(),
        std::time::Duration::from_millis(10),
    )
    .start();

    let mut drained = false;
    for _ in 0..200 {
        if bank.store.pending_outbox().await.expect("outbox").is_empty() {
            drained = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    handle.shutdown().await;
    assert!(drained);
}
