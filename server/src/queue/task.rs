//! Task model shared by the distributor, the broker and the processor.
//!
//! # Invariants
//! - `retried <= max_retry` while a task is pending or active.
//! - A pending task is not delivered before `not_before`.
//! - Terminal states: acknowledged (the row is removed) or archived.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ErrorKind;

/// Task identifier.
pub type TaskId = Uuid;

/// Queue for work that should drain first.
pub const QUEUE_CRITICAL: &str = "critical";

/// Queue used when none is specified.
pub const QUEUE_DEFAULT: &str = "default";

/// Retry budget when none is specified.
pub const DEFAULT_MAX_RETRY: u32 = 25;

/// Enqueue options.
///
/// `not_before` is absolute; `process_in` is resolved against the clock at
/// the moment the task reaches the broker. When both are set the later one
/// wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub queue: String,
    pub max_retry: u32,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub not_before: Option<DateTime<Utc>>,
    pub process_in_ms: Option<i64>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            queue: QUEUE_DEFAULT.to_string(),
            max_retry: DEFAULT_MAX_RETRY,
            not_before: None,
            process_in_ms: None,
        }
    }
}

impl TaskOptions {
    #[must_use]
    pub fn queue(mut self, queue: &str) -> Self {
        self.queue = queue.to_string();
        self
    }

    #[must_use]
    pub const fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    #[must_use]
    pub const fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    #[must_use]
    pub const fn process_in(mut self, delay: TimeDelta) -> Self {
        self.process_in_ms = Some(delay.num_milliseconds());
        self
    }

    /// Earliest delivery time for a task enqueued at `now`.
    #[must_use]
    pub fn resolve_not_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let delayed = self
            .process_in_ms
            .and_then(|ms| now.checked_add_signed(TimeDelta::milliseconds(ms)))
            .unwrap_or(now);
        self.not_before.map_or(delayed, |at| at.max(delayed))
    }
}

/// A task that has been serialized but not yet handed to the broker.
///
/// This is also the form staged in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Vec<u8>,
    pub options: TaskOptions,
}

impl NewTask {
    /// Serialize `payload` as JSON into a new task with a fresh id.
    pub fn json<P: Serialize>(
        task_type: &str,
        payload: &P,
        options: TaskOptions,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            task_type: task_type.to_string(),
            payload: serde_json::to_vec(payload)?,
            options,
        })
    }
}

/// Broker-side task state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for `not_before`, then for a worker.
    Pending,
    /// Leased to one worker until `expires_at`.
    Active {
        lease_id: Uuid,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        expires_at: DateTime<Utc>,
    },
    /// Out of retries or explicitly skipped; never delivered again.
    Archived {
        #[serde(with = "chrono::serde::ts_milliseconds")]
        archived_at: DateTime<Utc>,
    },
}

/// The task wire record held by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Vec<u8>,
    pub queue: String,
    pub max_retry: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub not_before: DateTime<Utc>,
    pub retried: u32,
    pub state: TaskState,
    pub last_error: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub enqueued_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Build the pending record for `task` enqueued at `now`.
    #[must_use]
    pub fn pending(task: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id: task.id,
            not_before: task.options.resolve_not_before(now),
            task_type: task.task_type,
            payload: task.payload,
            queue: task.options.queue,
            max_retry: task.options.max_retry,
            retried: 0,
            state: TaskState::Pending,
            last_error: None,
            enqueued_at: now,
        }
    }

    /// Time from which the task may be handed to a worker, or `None` if it
    /// is archived.
    #[must_use]
    pub const fn ready_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            TaskState::Pending => Some(self.not_before),
            TaskState::Active { expires_at, .. } => Some(*expires_at),
            TaskState::Archived { .. } => None,
        }
    }

    /// Whether no retries are left.
    #[must_use]
    pub const fn retries_exhausted(&self) -> bool {
        self.retried >= self.max_retry
    }

    /// The handler's view of this task.
    #[must_use]
    pub fn to_task(&self) -> Task {
        Task {
            id: self.id,
            task_type: self.task_type.clone(),
            payload: self.payload.clone(),
            queue: self.queue.clone(),
            retried: self.retried,
            max_retry: self.max_retry,
        }
    }
}

/// What a handler sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub payload: Vec<u8>,
    pub queue: String,
    /// Previous failed attempts.
    pub retried: u32,
    pub max_retry: u32,
}

/// An exclusive, time-bounded claim on a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub task_id: TaskId,
    pub queue: String,
    pub lease_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A task together with the lease under which it was delivered.
#[derive(Debug, Clone)]
pub struct LeasedTask {
    pub record: TaskRecord,
    pub lease: Lease,
}

/// Result of a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub task_type: String,
    pub queue: String,
    pub max_retry: u32,
    pub not_before: DateTime<Utc>,
}

impl From<&TaskRecord> for TaskInfo {
    fn from(record: &TaskRecord) -> Self {
        Self {
            id: record.id,
            task_type: record.task_type.clone(),
            queue: record.queue.clone(),
            max_retry: record.max_retry,
            not_before: record.not_before,
        }
    }
}

/// Error returned by a task handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Transient failure; retry with backoff.
    Retry(String),
    /// Permanent failure; archive without consuming further retries.
    SkipRetry(String),
}

impl TaskError {
    pub fn retry(reason: impl std::fmt::Display) -> Self {
        Self::Retry(reason.to_string())
    }

    pub fn skip(reason: impl std::fmt::Display) -> Self {
        Self::SkipRetry(reason.to_string())
    }

    /// Outward error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Retry(_) => ErrorKind::TaskTransientFailure,
            Self::SkipRetry(_) => ErrorKind::TaskMalformed,
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retry(reason) => write!(f, "{reason}"),
            Self::SkipRetry(reason) => write!(f, "{reason}: skip retry"),
        }
    }
}

impl std::error::Error for TaskError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).expect("valid timestamp")
    }

    #[test]
    fn test_resolve_not_before() {
        let now = at(1_700_000_000_000);

        assert_eq!(TaskOptions::default().resolve_not_before(now), now);
        assert_eq!(
            TaskOptions::default()
                .process_in(TimeDelta::seconds(10))
                .resolve_not_before(now),
            now + TimeDelta::seconds(10)
        );

        let later = now + TimeDelta::minutes(5);
        assert_eq!(
            TaskOptions::default()
                .process_in(TimeDelta::seconds(10))
                .not_before(later)
                .resolve_not_before(now),
            later
        );
    }

    #[test]
    fn test_record_json_uses_type_tag() {
        let task = NewTask::json(
            "task:test",
            &serde_json::json!({"username": "alice"}),
            TaskOptions::default().queue(QUEUE_CRITICAL).max_retry(3),
        )
        .expect("encode");
        let record = TaskRecord::pending(task, at(1_000));

        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["type"], "task:test");
        assert_eq!(value["queue"], "critical");
        assert_eq!(value["max_retry"], 3);
        assert_eq!(value["state"]["state"], "pending");

        let decoded: TaskRecord = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_task_error_kinds() {
        assert_eq!(TaskError::retry("db down").kind(), ErrorKind::TaskTransientFailure);
        assert_eq!(TaskError::skip("bad json").kind(), ErrorKind::TaskMalformed);
        assert_eq!(TaskError::skip("bad json").to_string(), "bad json: skip retry");
    }
}
