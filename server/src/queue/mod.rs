//! Durable task queue.
//!
//! - [`Distributor`] serializes task payloads and writes them to a [`Broker`].
//! - [`Processor`] leases tasks in weighted order across queues and runs the
//!   handler registered for each task type.
//! - [`OutboxRelay`] moves outbox entries that missed their post-commit
//!   dispatch into the broker.
//!
//! Delivery is at least once: a task whose worker dies is redelivered after
//! its lease expires, so handlers must be idempotent.

mod broker;
mod distributor;
mod processor;
mod relay;
mod scheduler;
mod task;

pub use broker::{Broker, BrokerError, StoreBroker};
pub use distributor::{Distributor, EnqueueError};
pub use processor::{
    HandlerFn, ProcessOutcome, Processor, ProcessorConfig, ProcessorHandle, RetryDelayFn,
    ServeMux, TaskHandler, default_retry_delay, handler_fn,
};
pub use relay::{OutboxRelay, RelayHandle};
pub use scheduler::WeightedScheduler;
pub use task::{
    DEFAULT_MAX_RETRY, Lease, LeasedTask, NewTask, QUEUE_CRITICAL, QUEUE_DEFAULT, Task,
    TaskError, TaskId, TaskInfo, TaskOptions, TaskRecord, TaskState,
};
