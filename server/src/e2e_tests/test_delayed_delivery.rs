//! Registration schedules the verification email ten seconds out on the
//! critical queue.

use chrono::TimeDelta;

use crate::e2e_tests::helpers::*;
use crate::identity::{VERIFY_EMAIL_MAX_RETRY, register_user};
use crate::queue::{Broker, ProcessOutcome, QUEUE_CRITICAL};
use crate::storage::TimeSource;
use crate::worker::TASK_SEND_VERIFY_EMAIL;

#[tokio::test]
async fn test_task_invisible_until_not_before() {
    let bank = TestBank::new();
    let registered_at = bank.time.now();

    register_user(&bank.store, &user_params("alice"))
        .await
        .expect("register");
    assert!(bank.store.pending_outbox().await.expect("outbox").is_empty());

    let processor = bank.processor();

    bank.time.advance(TimeDelta::seconds(5));
    assert_eq!(processor.process_next().await.expect("poll"), None);

    bank.time.advance(TimeDelta::seconds(6));
    let leased = processor.lease_next().expect("lease").expect("task due");
    assert_eq!(leased.record.task_type, TASK_SEND_VERIFY_EMAIL);
    assert_eq!(leased.record.queue, QUEUE_CRITICAL);
    assert_eq!(leased.record.max_retry, VERIFY_EMAIL_MAX_RETRY);
    assert_eq!(leased.record.not_before, registered_at + TimeDelta::seconds(10));
    assert_eq!(leased.record.payload, br#"{"username":"alice"}"#.to_vec());

    let id = leased.record.id;
    let outcome = processor.execute(leased).await.expect("execute");
    assert_eq!(outcome, ProcessOutcome::Acked);

    // Exactly one delivery
    assert_eq!(processor.process_next().await.expect("poll"), None);
    assert_eq!(bank.broker.get(QUEUE_CRITICAL, id).expect("get"), None);
}
