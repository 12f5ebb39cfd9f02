//! Racing registrations for one username commit exactly once.

use std::sync::Arc;

use chrono::TimeDelta;

use crate::e2e_tests::helpers::*;
use crate::errors::ErrorKind;
use crate::identity::register_user;
use crate::queue::{ProcessOutcome, QUEUE_CRITICAL};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_registration_wins() {
    let bank = TestBank::new();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&bank.store);
        handles.push(tokio::spawn(async move {
            register_user(&store, &user_params("alice")).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.expect("join") {
            Ok(_) => created += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::AlreadyExists),
        }
    }
    assert_eq!(created, 1);

    let processor = bank.processor();
    bank.time.advance(TimeDelta::seconds(11));
    assert_eq!(
        processor.process_next().await.expect("poll"),
        Some(ProcessOutcome::Acked)
    );
    assert_eq!(processor.process_next().await.expect("poll"), None);
    assert!(bank.broker.archived(QUEUE_CRITICAL).is_empty());
}
