//! A failing post-create callback leaves nothing behind.

use crate::db::StoreError;
use crate::e2e_tests::helpers::*;
use crate::errors::ErrorKind;
use crate::queue::{QUEUE_CRITICAL, TaskOptions};

#[tokio::test]
async fn test_failing_callback_rolls_back_user_and_tasks() {
    let bank = TestBank::new();

    let err = bank
        .store
        .create_user_tx(&user_params("alice"), |user, outbox| {
            outbox.stage(
                "task:test",
                &user.username,
                TaskOptions::default().queue(QUEUE_CRITICAL),
            )?;
            Err(StoreError::Aborted("downstream validation failed".to_string()))
        })
        .await
        .expect_err("callback fails");
    assert_eq!(err.kind(), ErrorKind::TransactionAborted);

    assert_eq!(bank.store.get_user("alice").await, Err(StoreError::NotFound));
    assert!(bank.store.pending_outbox().await.expect("outbox").is_empty());

    let processor = bank.processor();
    bank.time.advance(chrono::TimeDelta::minutes(1));
    assert_eq!(processor.process_next().await.expect("poll"), None);
}

#[tokio::test]
async fn test_username_can_be_reused_after_rollback() {
    let bank = TestBank::new();

    bank.store
        .create_user_tx(&user_params("alice"), |_, _| {
            Err(StoreError::Aborted("no".to_string()))
        })
        .await
        .expect_err("callback fails");

    let user = bank
        .store
        .create_user_tx(&user_params("alice"), |_, _| Ok(()))
        .await
        .expect("second attempt commits");
    assert_eq!(user.email, "alice@example.com");
}
