//! A task that always fails transiently runs `max_retry + 1` times and is
//! then archived for good.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::TimeDelta;

use crate::e2e_tests::helpers::*;
use crate::queue::{
    ProcessOutcome, QUEUE_DEFAULT, ServeMux, Task, TaskError, TaskOptions, TaskState, handler_fn,
};

#[tokio::test]
async fn test_max_retry_three_runs_four_times_then_archives() {
    let bank = TestBank::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut mux = ServeMux::new();
    let counter = calls.clone();
    mux.handle(
        "task:flaky",
        handler_fn(move |_task: Task| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TaskError::retry("downstream unavailable"))
            }
        }),
    );
    let processor = bank.processor_with(mux);

    let info = bank
        .distributor
        .enqueue("task:flaky", &"payload", TaskOptions::default().max_retry(3))
        .expect("enqueue");

    let mut outcomes = Vec::new();
    for _ in 0..20 {
        if let Some(outcome) = processor.process_next().await.expect("poll") {
            outcomes.push(outcome);
        }
        bank.time.advance(TimeDelta::minutes(1));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let retried: Vec<u32> = outcomes
        .iter()
        .filter_map(|o| match o {
            ProcessOutcome::Retried { retried, .. } => Some(*retried),
            _ => None,
        })
        .collect();
    assert_eq!(retried, vec![1, 2, 3]);
    assert!(matches!(outcomes.last(), Some(ProcessOutcome::Archived { .. })));

    let archived = bank.broker.archived(QUEUE_DEFAULT);
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].id, info.id);
    assert_eq!(archived[0].retried, 3);
    assert!(matches!(archived[0].state, TaskState::Archived { .. }));
    assert_eq!(
        archived[0].last_error.as_deref(),
        Some("downstream unavailable")
    );
}
