//! Permanent failures are archived after a single delivery.

use chrono::TimeDelta;

use crate::e2e_tests::helpers::*;
use crate::queue::{ProcessOutcome, QUEUE_CRITICAL, TaskOptions};
use crate::worker::{PayloadSendVerifyEmail, TASK_SEND_VERIFY_EMAIL, distribute_send_verify_email};

#[tokio::test]
async fn test_unknown_user_is_archived_after_one_delivery() {
    let bank = TestBank::new();
    let processor = bank.processor();

    distribute_send_verify_email(
        &bank.distributor,
        &PayloadSendVerifyEmail {
            username: "ghost".to_string(),
        },
        TaskOptions::default().queue(QUEUE_CRITICAL).max_retry(25),
    )
    .expect("enqueue");

    let outcome = processor.process_next().await.expect("poll");
    assert!(matches!(outcome, Some(ProcessOutcome::Archived { .. })));

    bank.time.advance(TimeDelta::days(1));
    assert_eq!(processor.process_next().await.expect("poll"), None);

    let archived = bank.broker.archived(QUEUE_CRITICAL);
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].retried, 0);
}

#[tokio::test]
async fn test_malformed_payload_is_archived_after_one_delivery() {
    let bank = TestBank::new();
    let processor = bank.processor();

    bank.distributor
        .enqueue(TASK_SEND_VERIFY_EMAIL, &[1, 2, 3], TaskOptions::default())
        .expect("enqueue");

    let outcome = processor.process_next().await.expect("poll");
    assert!(matches!(outcome, Some(ProcessOutcome::Archived { .. })));
    bank.time.advance(TimeDelta::days(1));
    assert_eq!(processor.process_next().await.expect("poll"), None);
}
