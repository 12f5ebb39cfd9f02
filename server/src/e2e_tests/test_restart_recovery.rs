//! Users, sessions, outbox entries and queued tasks survive a restart.

use chrono::TimeDelta;

use crate::e2e_tests::helpers::*;
use crate::identity::register_user;
use crate::queue::{OutboxRelay, ProcessOutcome};
use crate::session::ClientMetadata;

#[tokio::test]
async fn test_reopen_keeps_user_session_and_task() {
    let bank = TestBank::new();
    register_user(&bank.store, &user_params("alice"))
        .await
        .expect("register");
    let login = bank
        .sessions
        .login("alice", &ClientMetadata::default())
        .await
        .expect("login");

    let bank = bank.reopen();

    let user = bank.store.get_user("alice").await.expect("user recovered");
    assert_eq!(user.email, "alice@example.com");
    bank.sessions
        .renew_access_token(&login.refresh_token)
        .await
        .expect("session recovered");

    let processor = bank.processor();
    bank.time.advance(TimeDelta::seconds(11));
    assert_eq!(
        processor.process_next().await.expect("poll"),
        Some(ProcessOutcome::Acked)
    );
}

#[tokio::test]
async fn test_reopen_keeps_undispatched_outbox() {
    let bank = TestBank::new();
    bank.broker.set_down(true);
    register_user(&bank.store, &user_params("alice"))
        .await
        .expect("register");

    let bank = bank.reopen();
    assert_eq!(bank.store.pending_outbox().await.expect("outbox").len(), 1);

    bank.time.advance(TimeDelta::seconds(30));
    let relay = OutboxRelay::new(
        bank.store.clone(),
        bank.distributor.clone(),
        std::time::Duration::from_millis(10),
    );
    assert_eq!(relay.drain_once().await.expect("drain"), 1);
}
