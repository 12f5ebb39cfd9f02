//! Transactional store.
//!
//! [`Store`] runs units of work against the bank database. Each unit of work
//! checks out a slot from a bounded pool, runs its body against [`Queries`]
//! in one serializable transaction, and commits.
//!
//! # Pre-conditions
//! - Bodies are deterministic in their writes for a given database state:
//!   a body may be run again from scratch after a conflict.
//!
//! # Post-conditions
//! - On `Ok`, every write of the body is durable and visible.
//! - On `Err`, none of them are, and nothing staged in the outbox was
//!   handed to the broker.
//!
//! # Invariants
//! - A serialization conflict is retried at most `tx_max_retries` times.
//! - Waiting for a pool slot is bounded by `pool_timeout`.
//! - Tasks staged in the outbox are dispatched only after their
//!   transaction commits.

mod models;
mod outbox;
mod queries;
mod tx_create_user;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use uuid::Uuid;

pub use models::{CreateSessionParams, CreateUserParams, OutboxEntry, Session, User};
pub use outbox::Outbox;
pub use queries::Queries;

use crate::errors::ErrorKind;
use crate::queue::{Distributor, EnqueueError};
use crate::storage::{Database, TimeSource, TransactionError};

/// Pool and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum concurrent units of work.
    pub pool_size: usize,
    /// How long to wait for a free slot.
    pub pool_timeout: Duration,
    /// Retries after a serialization conflict.
    pub tx_max_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            pool_timeout: Duration::from_secs(5),
            tx_max_retries: 3,
        }
    }
}

/// Error returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No row with that key.
    NotFound,
    /// A row with that key already exists.
    UniqueViolation(String),
    /// Serialization conflicts outlasted the retry budget.
    Conflict,
    /// No pool slot became free in time.
    PoolTimeout,
    /// A post-write callback failed; the whole unit of work was rolled back.
    Aborted(String),
    /// A staged task could not be encoded; the unit of work was rolled back.
    Enqueue(EnqueueError),
    /// A row could not be encoded or decoded.
    Encoding(String),
    /// The storage engine failed.
    Storage(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "no rows in result set"),
            Self::UniqueViolation(detail) => write!(f, "unique violation: {detail}"),
            Self::Conflict => write!(f, "transaction conflict: retries exhausted"),
            Self::PoolTimeout => write!(f, "timed out waiting for a database connection"),
            Self::Aborted(reason) => write!(f, "transaction aborted: {reason}"),
            Self::Enqueue(e) => write!(f, "{e}"),
            Self::Encoding(e) => write!(f, "row encoding error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Enqueue(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransactionError> for StoreError {
    fn from(e: TransactionError) -> Self {
        match e {
            TransactionError::Conflict => Self::Conflict,
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<EnqueueError> for StoreError {
    fn from(e: EnqueueError) -> Self {
        Self::Enqueue(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encoding(e.to_string())
    }
}

impl StoreError {
    /// Outward error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::UniqueViolation(_) => ErrorKind::AlreadyExists,
            Self::Conflict => ErrorKind::TransactionConflict,
            Self::PoolTimeout => ErrorKind::Unavailable,
            Self::Aborted(_) => ErrorKind::TransactionAborted,
            Self::Enqueue(_) => ErrorKind::EnqueueFailed,
            Self::Encoding(_) | Self::Storage(_) => ErrorKind::Internal,
        }
    }
}

/// Pooled access to the bank database.
pub struct Store {
    database: Database,
    pool: Semaphore,
    config: StoreConfig,
    time: Arc<dyn TimeSource>,
    distributor: Option<Arc<Distributor>>,
}

impl Store {
    #[must_use]
    pub fn new(database: Database, config: StoreConfig, time: Arc<dyn TimeSource>) -> Self {
        Self {
            database,
            pool: Semaphore::new(config.pool_size.max(1)),
            config,
            time,
            distributor: None,
        }
    }

    /// Dispatch staged tasks through `distributor` as soon as their unit of
    /// work commits. Without one, staged tasks wait for the outbox relay.
    #[must_use]
    pub fn with_distributor(mut self, distributor: Arc<Distributor>) -> Self {
        self.distributor = Some(distributor);
        self
    }

    /// Run `body` as one unit of work.
    ///
    /// The body is re-run from scratch after a serialization conflict. Its
    /// error rolls the transaction back and is returned unchanged. Tasks it
    /// staged are dispatched after commit; a dispatch failure is logged and
    /// left for the relay.
    pub async fn exec_tx<T, F>(&self, body: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut Queries<'_>) -> Result<T, StoreError>,
    {
        let (value, staged) = self.exec_tx_staged(body).await?;
        if !staged.is_empty()
            && let Some(distributor) = &self.distributor
        {
            self.dispatch(distributor, staged).await;
        }
        Ok(value)
    }

    /// [`Store::exec_tx`] without the post-commit dispatch.
    async fn exec_tx_staged<T, F>(&self, mut body: F) -> Result<(T, Vec<OutboxEntry>), StoreError>
    where
        F: FnMut(&mut Queries<'_>) -> Result<T, StoreError>,
    {
        let _slot = tokio::time::timeout(self.config.pool_timeout, self.pool.acquire())
            .await
            .map_err(|_| StoreError::PoolTimeout)?
            .map_err(|_| StoreError::PoolTimeout)?;

        let mut attempt = 0;
        loop {
            let mut txn = self.database.begin();
            let mut queries = Queries::new(&mut txn, self.time.now());
            let value = body(&mut queries)?;
            let staged = queries.into_staged();

            match txn.commit() {
                Ok(()) => return Ok((value, staged)),
                Err(TransactionError::Conflict) if attempt < self.config.tx_max_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, "transaction conflict, retrying unit of work");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        self.exec_tx(|q| q.get_user(username)).await
    }

    pub async fn create_session(&self, params: &CreateSessionParams) -> Result<Session, StoreError> {
        self.exec_tx(|q| q.create_session(params)).await
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Session, StoreError> {
        self.exec_tx(|q| q.get_session(id)).await
    }

    /// Administrative block or unblock of a session.
    pub async fn set_session_blocked(&self, id: Uuid, blocked: bool) -> Result<Session, StoreError> {
        self.exec_tx(|q| q.set_session_blocked(id, blocked)).await
    }

    /// Entries still waiting in the outbox.
    pub async fn pending_outbox(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        self.exec_tx(|q| q.list_outbox()).await
    }
}
