//! Task consumer.
//!
//! A [`Processor`] leases tasks from the broker in weighted order across
//! queues and dispatches each to the handler registered for its type.
//!
//! # Outcomes
//! - `Ok(())`: the task is acknowledged and removed.
//! - [`TaskError::Retry`]: the task is rescheduled after a backoff, until
//!   `retried` reaches `max_retry`; the next failure archives it. A task with
//!   `max_retry = n` therefore runs at most `n + 1` times.
//! - [`TaskError::SkipRetry`]: archived at once, whatever retries remain.
//!
//! # Invariants
//! - At most `concurrency` handlers run at once.
//! - While a handler runs its lease is extended, so a slow handler is not
//!   redelivered; a crashed worker stops extending and the lease expires.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use rand::Rng;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

use crate::queue::broker::{Broker, BrokerError};
use crate::queue::scheduler::WeightedScheduler;
use crate::queue::task::{LeasedTask, QUEUE_CRITICAL, QUEUE_DEFAULT, Task, TaskError};
use crate::storage::TimeSource;

/// Handles tasks of one type.
pub trait TaskHandler: Send + Sync {
    fn process<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<(), TaskError>>;
}

/// A [`TaskHandler`] backed by a closure.
pub struct HandlerFn<F>(F);

/// Wrap an async closure as a handler.
pub const fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    HandlerFn(f)
}

impl<F, Fut> TaskHandler for HandlerFn<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn process<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<(), TaskError>> {
        (self.0)(task.clone()).boxed()
    }
}

/// Routes task types to handlers.
#[derive(Default)]
pub struct ServeMux {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl ServeMux {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `task_type`, replacing any previous one.
    pub fn handle(&mut self, task_type: &str, handler: impl TaskHandler + 'static) {
        self.handlers.insert(task_type.to_string(), Arc::new(handler));
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    fn handler(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).map(Arc::clone)
    }
}

/// Backoff before retry `retried + 1`.
pub type RetryDelayFn = Arc<dyn Fn(u32, &Task) -> TimeDelta + Send + Sync>;

/// `retried^4` seconds, plus 15 seconds, plus up to `30 * (retried + 1)`
/// seconds of jitter.
#[must_use]
pub fn default_retry_delay(retried: u32, _task: &Task) -> TimeDelta {
    let n = i64::from(retried.min(1_000));
    let jitter = rand::rng().random_range(0..30 * (n + 1));
    TimeDelta::seconds(n.pow(4) + 15 + jitter)
}

/// Processor settings.
#[derive(Clone)]
pub struct ProcessorConfig {
    /// Queue names and their relative weights.
    pub queues: Vec<(String, u32)>,
    /// Maximum handlers running at once.
    pub concurrency: usize,
    /// How long a lease lasts without being extended.
    pub lease_duration: TimeDelta,
    /// Sleep between polls when every queue is empty.
    pub poll_interval: Duration,
    /// How long `shutdown` waits for running handlers.
    pub shutdown_timeout: Duration,
    pub retry_delay: RetryDelayFn,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            queues: vec![
                (QUEUE_CRITICAL.to_string(), 10),
                (QUEUE_DEFAULT.to_string(), 5),
            ],
            concurrency: 10,
            lease_duration: TimeDelta::seconds(30),
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(8),
            retry_delay: Arc::new(default_retry_delay),
        }
    }
}

/// What happened to a delivered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Acked,
    Retried { retried: u32, run_at: DateTime<Utc> },
    Archived { reason: String },
}

/// Leases tasks and runs their handlers.
pub struct Processor {
    broker: Arc<dyn Broker>,
    mux: ServeMux,
    scheduler: Mutex<WeightedScheduler>,
    config: ProcessorConfig,
    time: Arc<dyn TimeSource>,
}

impl Processor {
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        mux: ServeMux,
        config: ProcessorConfig,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let scheduler = Mutex::new(WeightedScheduler::new(&config.queues));
        Self {
            broker,
            mux,
            scheduler,
            config,
            time,
        }
    }

    /// Lease the next task, trying the weighted pick first and the other
    /// queues after it.
    pub fn lease_next(&self) -> Result<Option<LeasedTask>, BrokerError> {
        let order = self
            .scheduler
            .lock()
            .map_err(|_| BrokerError::Unavailable("scheduler lock poisoned".to_string()))?
            .poll_order();
        let now = self.time.now();
        for queue in order {
            if let Some(leased) = self.broker.lease(&queue, now, self.config.lease_duration)? {
                return Ok(Some(leased));
            }
        }
        Ok(None)
    }

    /// Poll once and run the task found, if any.
    pub async fn process_next(&self) -> Result<Option<ProcessOutcome>, BrokerError> {
        let Some(leased) = self.lease_next()? else {
            return Ok(None);
        };
        self.execute(leased).await.map(Some)
    }

    /// Run the handler for a leased task and settle it with the broker.
    pub async fn execute(&self, leased: LeasedTask) -> Result<ProcessOutcome, BrokerError> {
        let task = leased.record.to_task();
        let result = self.run_handler(&task, &leased).await;
        let lease = &leased.lease;
        let now = self.time.now();

        match result {
            Ok(()) => {
                self.broker.ack(lease)?;
                tracing::info!(task_type = %task.task_type, task_id = %task.id, "processed task");
                Ok(ProcessOutcome::Acked)
            }
            Err(TaskError::SkipRetry(reason)) => {
                self.broker.archive(lease, now, &reason)?;
                tracing::warn!(
                    task_type = %task.task_type,
                    task_id = %task.id,
                    "archived task without retry: {reason}"
                );
                Ok(ProcessOutcome::Archived { reason })
            }
            Err(TaskError::Retry(reason)) if leased.record.retries_exhausted() => {
                self.broker.archive(lease, now, &reason)?;
                tracing::error!(
                    task_type = %task.task_type,
                    task_id = %task.id,
                    retried = task.retried,
                    "archived task after exhausting retries: {reason}"
                );
                Ok(ProcessOutcome::Archived { reason })
            }
            Err(TaskError::Retry(reason)) => {
                let delay = (self.config.retry_delay)(task.retried, &task);
                let run_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
                self.broker.retry(lease, run_at, &reason)?;
                tracing::warn!(
                    task_type = %task.task_type,
                    task_id = %task.id,
                    retried = task.retried + 1,
                    "failed to process task: {reason}"
                );
                Ok(ProcessOutcome::Retried {
                    retried: task.retried + 1,
                    run_at,
                })
            }
        }
    }

    /// Run the handler, extending the lease at half its duration until it
    /// finishes. A panic counts as a retryable failure.
    async fn run_handler(&self, task: &Task, leased: &LeasedTask) -> Result<(), TaskError> {
        let Some(handler) = self.mux.handler(&task.task_type) else {
            return Err(TaskError::retry(format!(
                "handler not found for task type {}",
                task.task_type
            )));
        };

        let mut work = AssertUnwindSafe(handler.process(task)).catch_unwind();
        let period = (self.config.lease_duration / 2)
            .to_std()
            .unwrap_or_default()
            .max(Duration::from_millis(100));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut lease = leased.lease.clone();

        loop {
            tokio::select! {
                result = &mut work => {
                    return result.unwrap_or_else(|_| Err(TaskError::retry("handler panicked")));
                }
                _ = heartbeat.tick() => {
                    let until = self.time.now() + self.config.lease_duration;
                    match self.broker.extend_lease(&lease, until) {
                        Ok(extended) => lease = extended,
                        Err(e) => tracing::warn!(task_id = %task.id, "failed to extend lease: {e}"),
                    }
                }
            }
        }
    }

    /// Start the worker loop on the current tokio runtime.
    pub fn start(self: Arc<Self>) -> ProcessorHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        ProcessorHandle { shutdown, join }
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let concurrency = self.config.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        tracing::info!(
            "processor started: concurrency={concurrency}, queues={:?}",
            self.config.queues
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.lease_next() {
                Ok(Some(leased)) => {
                    let processor = Arc::clone(&self);
                    tokio::spawn(async move {
                        let task_id = leased.record.id;
                        if let Err(e) = processor.execute(leased).await {
                            tracing::warn!(%task_id, "failed to settle task: {e}");
                        }
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("failed to lease task: {e}"),
            }
            drop(permit);

            tokio::select! {
                _ = shutdown.changed() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        let all = u32::try_from(concurrency).unwrap_or(u32::MAX);
        match tokio::time::timeout(self.config.shutdown_timeout, permits.acquire_many(all)).await {
            Ok(_) => tracing::info!("processor stopped"),
            Err(_) => tracing::warn!(
                "processor stopped with handlers still running; their tasks will be redelivered"
            ),
        }
    }
}

/// Handle to a running processor.
pub struct ProcessorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Stop leasing and wait for running handlers, up to the shutdown timeout.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::error!("processor task failed: {e}");
        }
    }
}
