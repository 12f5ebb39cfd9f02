//! Task producer.

use std::sync::Arc;

use serde::Serialize;

use crate::errors::ErrorKind;
use crate::queue::broker::{Broker, BrokerError};
use crate::queue::task::{NewTask, TaskInfo, TaskOptions, TaskRecord};
use crate::storage::TimeSource;

/// Error returned when a task cannot be enqueued.
///
/// There is no local buffering: the caller sees every failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    /// The payload could not be serialized.
    Serialization(String),
    /// The broker rejected or could not store the task.
    Broker(BrokerError),
}

impl std::fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "failed to marshal task payload: {e}"),
            Self::Broker(e) => write!(f, "failed to enqueue task: {e}"),
        }
    }
}

impl std::error::Error for EnqueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialization(_) => None,
            Self::Broker(e) => Some(e),
        }
    }
}

impl From<BrokerError> for EnqueueError {
    fn from(e: BrokerError) -> Self {
        Self::Broker(e)
    }
}

impl From<serde_json::Error> for EnqueueError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl EnqueueError {
    /// Outward error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::EnqueueFailed
    }
}

/// Writes tasks to the broker.
pub struct Distributor {
    broker: Arc<dyn Broker>,
    time: Arc<dyn TimeSource>,
}

impl Distributor {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, time: Arc<dyn TimeSource>) -> Self {
        Self { broker, time }
    }

    /// Serialize `payload` as JSON and enqueue it as a `task_type` task.
    pub fn enqueue<P: Serialize>(
        &self,
        task_type: &str,
        payload: &P,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        let task = NewTask::json(task_type, payload, options)?;
        self.enqueue_task(task)
    }

    /// Enqueue an already serialized task.
    ///
    /// Delays in `options` are resolved against the clock now.
    pub fn enqueue_task(&self, task: NewTask) -> Result<TaskInfo, EnqueueError> {
        let record = TaskRecord::pending(task, self.time.now());
        self.broker.enqueue(&record)?;

        let info = TaskInfo::from(&record);
        tracing::info!(
            task_type = %info.task_type,
            queue = %info.queue,
            max_retry = info.max_retry,
            task_id = %info.id,
            "enqueued task"
        );
        Ok(info)
    }
}
