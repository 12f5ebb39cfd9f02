//! Durable task broker.
//!
//! [`StoreBroker`] keeps one table per queue in its own [`Database`], so
//! tasks survive restarts through the write-ahead log. Every state change
//! runs in a serializable transaction; two workers racing for the same task
//! conflict at commit and only one of them gets the lease.
//!
//! # Invariants
//! - A task is leased to at most one worker at a time.
//! - Ack, retry, archive and lease extension require the current lease.
//! - An active task whose lease has expired is eligible again; reclaiming it
//!   counts as a failed attempt.
//! - Archived tasks move to a separate `archived:{queue}` table, so leasing
//!   never scans them. That table is pruned by age and size on every archive.

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::errors::ErrorKind;
use crate::queue::task::{Lease, LeasedTask, TaskId, TaskRecord, TaskState};
use crate::storage::{Database, Transaction, TransactionError};

/// Attempts at a broker transaction before reporting contention.
const MAX_TXN_ATTEMPTS: usize = 8;

/// Archived tasks kept per queue by default.
pub const DEFAULT_ARCHIVE_MAX_SIZE: usize = 10_000;

/// Archived tasks older than this are dropped by default.
pub const DEFAULT_ARCHIVE_MAX_AGE: TimeDelta = TimeDelta::days(90);

/// Error returned by broker operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The caller no longer holds the task's lease.
    LeaseLost,
    /// Too many concurrent writers; try again later.
    Contended,
    /// A stored record could not be encoded or decoded.
    Encoding(String),
    /// The broker cannot be reached or cannot persist.
    Unavailable(String),
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LeaseLost => write!(f, "task lease lost"),
            Self::Contended => write!(f, "broker is contended"),
            Self::Encoding(e) => write!(f, "task record encoding error: {e}"),
            Self::Unavailable(e) => write!(f, "broker unavailable: {e}"),
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encoding(e.to_string())
    }
}

impl BrokerError {
    /// Outward error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::LeaseLost | Self::Encoding(_) => ErrorKind::Internal,
            Self::Contended | Self::Unavailable(_) => ErrorKind::Unavailable,
        }
    }
}

/// Storage for tasks.
///
/// Implementations must be durable: once `enqueue` returns `Ok`, the task is
/// eventually delivered or archived.
pub trait Broker: Send + Sync {
    /// Store a pending task. Enqueueing an id that is already stored is a no-op.
    fn enqueue(&self, record: &TaskRecord) -> Result<(), BrokerError>;

    /// Lease the next eligible task on `queue` until `now + lease_for`.
    fn lease(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        lease_for: TimeDelta,
    ) -> Result<Option<LeasedTask>, BrokerError>;

    /// Push the lease deadline out to `until`.
    fn extend_lease(&self, lease: &Lease, until: DateTime<Utc>) -> Result<Lease, BrokerError>;

    /// The handler succeeded; remove the task.
    fn ack(&self, lease: &Lease) -> Result<(), BrokerError>;

    /// The handler failed; make the task pending again at `run_at` with one
    /// more retry counted.
    fn retry(&self, lease: &Lease, run_at: DateTime<Utc>, error: &str) -> Result<(), BrokerError>;

    /// Stop delivering the task.
    fn archive(&self, lease: &Lease, now: DateTime<Utc>, error: &str) -> Result<(), BrokerError>;

    /// Look up a task, archived ones included.
    fn get(&self, queue: &str, id: TaskId) -> Result<Option<TaskRecord>, BrokerError>;
}

/// [`Broker`] on a dedicated storage database.
#[derive(Clone)]
pub struct StoreBroker {
    database: Database,
    archive_max_size: usize,
    archive_max_age: TimeDelta,
}

impl StoreBroker {
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self {
            database,
            archive_max_size: DEFAULT_ARCHIVE_MAX_SIZE,
            archive_max_age: DEFAULT_ARCHIVE_MAX_AGE,
        }
    }

    /// Keep at most `max_size` archived tasks per queue, none older than
    /// `max_age`.
    #[must_use]
    pub const fn with_archive_limits(mut self, max_size: usize, max_age: TimeDelta) -> Self {
        self.archive_max_size = max_size;
        self.archive_max_age = max_age;
        self
    }

    fn table(queue: &str) -> String {
        format!("queue:{queue}")
    }

    fn archive_table(queue: &str) -> String {
        format!("archived:{queue}")
    }

    /// Archived tasks on `queue`, oldest first.
    pub fn archived(&self, queue: &str) -> Result<Vec<TaskRecord>, BrokerError> {
        self.run(|txn| {
            let mut archived = Self::scan_archive(txn, queue)?;
            archived.sort_by_key(|(archived_at, _)| *archived_at);
            Ok(archived.into_iter().map(|(_, record)| record).collect())
        })
    }

    fn scan_archive(
        txn: &mut Transaction,
        queue: &str,
    ) -> Result<Vec<(DateTime<Utc>, TaskRecord)>, BrokerError> {
        let rows = txn.scan(&Self::archive_table(queue)).map_err(unavailable)?;
        let mut archived = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            let record: TaskRecord = serde_json::from_slice(&value)?;
            if let TaskState::Archived { archived_at } = record.state {
                archived.push((archived_at, record));
            }
        }
        Ok(archived)
    }

    /// Move `record` out of its queue into the archive, then prune the
    /// archive.
    fn move_to_archive(
        &self,
        txn: &mut Transaction,
        mut record: TaskRecord,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<(), BrokerError> {
        record.state = TaskState::Archived { archived_at: now };
        record.last_error = Some(error.to_string());
        txn.delete(&Self::table(&record.queue), record.id.as_bytes());
        txn.put(
            &Self::archive_table(&record.queue),
            record.id.as_bytes(),
            serde_json::to_vec(&record)?,
        );
        self.prune_archive(txn, &record.queue, now)
    }

    /// Drop archived tasks older than the age limit, then the oldest ones
    /// beyond the size limit.
    fn prune_archive(
        &self,
        txn: &mut Transaction,
        queue: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BrokerError> {
        let table = Self::archive_table(queue);
        let cutoff = now.checked_sub_signed(self.archive_max_age);
        let mut archived = Self::scan_archive(txn, queue)?;
        archived.sort_by_key(|(archived_at, _)| *archived_at);

        let expired = archived.partition_point(|(archived_at, _)| {
            cutoff.is_some_and(|cutoff| *archived_at < cutoff)
        });
        let excess = archived.len().saturating_sub(self.archive_max_size);
        let dropped = expired.max(excess);
        for (_, record) in &archived[..dropped] {
            txn.delete(&table, record.id.as_bytes());
        }
        if dropped > 0 {
            tracing::debug!(queue, dropped, "pruned archived tasks");
        }
        Ok(())
    }

    /// Run `body` in a transaction, retrying on commit conflicts.
    fn run<T>(
        &self,
        mut body: impl FnMut(&mut Transaction) -> Result<T, BrokerError>,
    ) -> Result<T, BrokerError> {
        for attempt in 1..=MAX_TXN_ATTEMPTS {
            let mut txn = self.database.begin();
            let value = body(&mut txn)?;
            match txn.commit() {
                Ok(()) => return Ok(value),
                Err(TransactionError::Conflict) => {
                    tracing::debug!(attempt, "broker transaction conflict, retrying");
                }
                Err(e) => return Err(unavailable(e)),
            }
        }
        Err(BrokerError::Contended)
    }

    /// Load the task behind `lease` and check the lease is still current.
    fn leased_record(txn: &mut Transaction, lease: &Lease) -> Result<TaskRecord, BrokerError> {
        let value = txn
            .get(&Self::table(&lease.queue), lease.task_id.as_bytes())
            .map_err(unavailable)?
            .ok_or(BrokerError::LeaseLost)?;
        let record: TaskRecord = serde_json::from_slice(&value)?;
        match record.state {
            TaskState::Active { lease_id, .. } if lease_id == lease.lease_id => Ok(record),
            _ => Err(BrokerError::LeaseLost),
        }
    }

    fn put(txn: &mut Transaction, record: &TaskRecord) -> Result<(), BrokerError> {
        txn.put(
            &Self::table(&record.queue),
            record.id.as_bytes(),
            serde_json::to_vec(record)?,
        );
        Ok(())
    }
}

fn unavailable(e: impl std::fmt::Display) -> BrokerError {
    BrokerError::Unavailable(e.to_string())
}

impl Broker for StoreBroker {
    fn enqueue(&self, record: &TaskRecord) -> Result<(), BrokerError> {
        self.run(|txn| {
            let key = record.id.as_bytes();
            let queued = txn.get(&Self::table(&record.queue), key).map_err(unavailable)?;
            let archived = txn
                .get(&Self::archive_table(&record.queue), key)
                .map_err(unavailable)?;
            if queued.is_none() && archived.is_none() {
                Self::put(txn, record)?;
            }
            Ok(())
        })
    }

    fn lease(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        lease_for: TimeDelta,
    ) -> Result<Option<LeasedTask>, BrokerError> {
        self.run(|txn| {
            let mut ready = Vec::new();
            for (_, value) in txn.scan(&Self::table(queue)).map_err(unavailable)? {
                let record: TaskRecord = serde_json::from_slice(&value)?;
                if record.ready_at().is_some_and(|at| at <= now) {
                    ready.push(record);
                }
            }
            ready.sort_by_key(|r| (r.ready_at(), r.enqueued_at));

            for mut record in ready {
                if let TaskState::Active { lease_id, .. } = record.state {
                    // The previous holder never finished
                    if record.retries_exhausted() {
                        tracing::warn!(
                            task_id = %record.id,
                            task_type = %record.task_type,
                            retried = record.retried,
                            "archiving task after lease {lease_id} expired with no retries left"
                        );
                        self.move_to_archive(txn, record, now, "lease expired")?;
                        continue;
                    }
                    record.retried += 1;
                    record.last_error = Some("lease expired".to_string());
                }

                let lease = Lease {
                    task_id: record.id,
                    queue: record.queue.clone(),
                    lease_id: Uuid::new_v4(),
                    expires_at: now + lease_for,
                };
                record.state = TaskState::Active {
                    lease_id: lease.lease_id,
                    expires_at: lease.expires_at,
                };
                Self::put(txn, &record)?;
                return Ok(Some(LeasedTask { record, lease }));
            }
            Ok(None)
        })
    }

    fn extend_lease(&self, lease: &Lease, until: DateTime<Utc>) -> Result<Lease, BrokerError> {
        self.run(|txn| {
            let mut record = Self::leased_record(txn, lease)?;
            record.state = TaskState::Active {
                lease_id: lease.lease_id,
                expires_at: until,
            };
            Self::put(txn, &record)?;
            Ok(Lease {
                expires_at: until,
                ..lease.clone()
            })
        })
    }

    fn ack(&self, lease: &Lease) -> Result<(), BrokerError> {
        self.run(|txn| {
            Self::leased_record(txn, lease)?;
            txn.delete(&Self::table(&lease.queue), lease.task_id.as_bytes());
            Ok(())
        })
    }

    fn retry(&self, lease: &Lease, run_at: DateTime<Utc>, error: &str) -> Result<(), BrokerError> {
        self.run(|txn| {
            let mut record = Self::leased_record(txn, lease)?;
            record.retried += 1;
            record.not_before = run_at;
            record.state = TaskState::Pending;
            record.last_error = Some(error.to_string());
            Self::put(txn, &record)
        })
    }

    fn archive(&self, lease: &Lease, now: DateTime<Utc>, error: &str) -> Result<(), BrokerError> {
        self.run(|txn| {
            let record = Self::leased_record(txn, lease)?;
            self.move_to_archive(txn, record, now, error)
        })
    }

    fn get(&self, queue: &str, id: TaskId) -> Result<Option<TaskRecord>, BrokerError> {
        self.run(|txn| {
            let value = match txn.get(&Self::table(queue), id.as_bytes()).map_err(unavailable)? {
                Some(value) => Some(value),
                None => txn
                    .get(&Self::archive_table(queue), id.as_bytes())
                    .map_err(unavailable)?,
            };
            value
                .map(|value| serde_json::from_slice(&value).map_err(BrokerError::from))
                .transpose()
        })
    }
}
