//! High-level database interface.
//!
//! Provides a clean API for opening, creating, and managing databases.
//!
//! A `Database` is a set of named tables mapping byte keys to byte values.
//! The committed state lives in memory; durability comes from the
//! write-ahead log, which is replayed on open. The log is compacted into a
//! snapshot of the committed state once enough commits pile up; see
//! [`checkpoint`](crate::storage::checkpoint).
//!
//! # Thread Safety
//!
//! `Database` is a cheap handle (`Arc` inside) and may be cloned into any
//! number of tasks. Committed state sits behind an `RwLock`: readers share it,
//! a commit takes it exclusively for validation, logging and apply.
//!
//! # Invariants
//!
//! - Every committed write carries the global version of its commit.
//! - A table's version is the version of the last commit that touched it.
//! - A commit is visible in memory only after its log record is synced.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::storage::checkpoint::{self, CheckpointConfig, CheckpointState};
use crate::storage::transaction::{Transaction, TransactionError};
use crate::storage::wal::{LogRecord, TxnId, Wal, WalError, WalWrite};

/// A committed value together with the version of the commit that wrote it.
#[derive(Debug, Clone)]
pub(crate) struct Versioned {
    pub(crate) version: u64,
    pub(crate) value: Vec<u8>,
}

/// A single table.
#[derive(Debug, Default)]
pub(crate) struct Table {
    pub(crate) rows: BTreeMap<Vec<u8>, Versioned>,
    pub(crate) version: u64,
}

/// Committed state shared by every handle.
#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) tables: HashMap<String, Table>,
    /// Version of the latest commit.
    pub(crate) version: u64,
}

impl State {
    /// Current version of `key` in `table`, 0 when absent.
    pub(crate) fn row_version(&self, table: &str, key: &[u8]) -> u64 {
        self.tables
            .get(table)
            .and_then(|t| t.rows.get(key))
            .map_or(0, |row| row.version)
    }

    /// Current version of `table`, 0 when it was never written.
    pub(crate) fn table_version(&self, table: &str) -> u64 {
        self.tables.get(table).map_or(0, |t| t.version)
    }

    /// Apply one commit's writes at a fresh version.
    pub(crate) fn apply(&mut self, writes: &[WalWrite]) {
        self.version += 1;
        let version = self.version;
        for write in writes {
            match write {
                WalWrite::Put { table, key, value } => {
                    let table = self.tables.entry(table.clone()).or_default();
                    table.rows.insert(
                        key.clone(),
                        Versioned {
                            version,
                            value: value.clone(),
                        },
                    );
                    table.version = version;
                }
                WalWrite::Delete { table, key } => {
                    let table = self.tables.entry(table.clone()).or_default();
                    table.rows.remove(key);
                    table.version = version;
                }
            }
        }
    }
}

/// The log of a durable database and its checkpoint counters.
pub(crate) struct Log {
    wal: Wal,
    counters: CheckpointState,
}

impl Log {
    /// Rewrite the log as a snapshot of `state`.
    fn checkpoint(&mut self, state: &State, txn_id: TxnId) -> Result<(), WalError> {
        let records = checkpoint::snapshot(state, txn_id);
        let before = self.wal.len();
        self.wal.rewrite(&records)?;
        self.counters.reset();
        tracing::debug!(
            "checkpointed log at txn {txn_id}: {before} -> {} bytes in {} records",
            self.wal.len(),
            records.len()
        );
        Ok(())
    }
}

pub(crate) struct Shared {
    pub(crate) state: RwLock<State>,
    /// `None` for in-memory databases.
    pub(crate) log: Mutex<Option<Log>>,
    pub(crate) next_txn_id: AtomicU64,
}

/// A database instance.
///
/// This is the main entry point for working with the storage engine.
/// It owns the committed state and the log, and provides methods for
/// creating transactions.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("next_txn_id", &self.shared.next_txn_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Create a database that keeps nothing on disk.
    ///
    /// Used by tests and by collaborators that do not need durability.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_parts(State::default(), None, 1)
    }

    /// Open the database logged at `path`, creating the log if it doesn't exist.
    ///
    /// Every intact log record is replayed; a torn tail is discarded.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::open_with(path, CheckpointConfig::default())
    }

    /// Like [`Database::open`], with explicit checkpoint triggers.
    pub fn open_with(path: &Path, config: CheckpointConfig) -> Result<Self, DatabaseError> {
        let (wal, replay) = Wal::open(path)?;

        let mut state = State::default();
        let mut last_txn_id = 0;
        for record in &replay.records {
            state.apply(&record.writes);
            last_txn_id = last_txn_id.max(record.txn_id);
        }

        tracing::info!(
            "Database recovery for '{}': {} transactions replayed, {} bytes discarded",
            path.display(),
            replay.records.len(),
            replay.truncated_bytes
        );

        // Replayed history counts toward the next automatic checkpoint
        let replayed = u64::try_from(replay.records.len()).unwrap_or(u64::MAX);
        let counters = CheckpointState::new(config).with_backlog(replayed, wal.len());
        let log = Log { wal, counters };

        Ok(Self::from_parts(state, Some(log), last_txn_id + 1))
    }

    fn from_parts(state: State, log: Option<Log>, next_txn_id: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                log: Mutex::new(log),
                next_txn_id: AtomicU64::new(next_txn_id),
            }),
        }
    }

    /// Begin a new transaction.
    ///
    /// Any number of transactions may be open at once; conflicts are
    /// detected when they commit.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn begin(&self) -> Transaction {
        let txn_id = self.shared.next_txn_id.fetch_add(1, Ordering::SeqCst);
        Transaction::new(Arc::clone(&self.shared), txn_id)
    }

    /// Version of the latest commit.
    pub fn version(&self) -> Result<u64, DatabaseError> {
        let state = self
            .shared
            .state
            .read()
            .map_err(|_| DatabaseError::LockPoisoned)?;
        Ok(state.version)
    }

    /// Rewrite the log as a snapshot of the committed state.
    ///
    /// Commits wait until the snapshot is in place. A no-op for in-memory
    /// databases.
    pub fn checkpoint(&self) -> Result<(), DatabaseError> {
        let state = self
            .shared
            .state
            .read()
            .map_err(|_| DatabaseError::LockPoisoned)?;
        let mut log = self
            .shared
            .log
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned)?;
        if let Some(log) = log.as_mut() {
            log.checkpoint(&state, self.shared.last_txn_id())?;
        }
        Ok(())
    }
}

impl Shared {
    /// Validate, log and apply a transaction.
    ///
    /// `reads` and `scans` hold the versions the transaction observed.
    pub(crate) fn commit(
        &self,
        txn_id: u64,
        reads: &HashMap<(String, Vec<u8>), u64>,
        scans: &HashMap<String, u64>,
        writes: Vec<WalWrite>,
    ) -> Result<(), TransactionError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| TransactionError::LockPoisoned)?;

        let stale_read = reads
            .iter()
            .any(|((table, key), observed)| state.row_version(table, key) != *observed);
        let stale_scan = scans
            .iter()
            .any(|(table, observed)| state.table_version(table) != *observed);
        if stale_read || stale_scan {
            return Err(TransactionError::Conflict);
        }

        if writes.is_empty() {
            return Ok(());
        }

        let record = LogRecord { txn_id, writes };
        let mut log = self
            .log
            .lock()
            .map_err(|_| TransactionError::LockPoisoned)?;
        if let Some(log) = log.as_mut() {
            let before = log.wal.len();
            log.wal.append(&record)?;
            log.counters.record_commit(log.wal.len() - before);
        }

        state.apply(&record.writes);

        if let Some(log) = log.as_mut().filter(|log| log.counters.should_checkpoint()) {
            // The commit is already durable in the old log
            if let Err(e) = log.checkpoint(&state, self.last_txn_id()) {
                tracing::warn!("automatic checkpoint failed: {e}");
            }
        }
        Ok(())
    }

    /// Highest transaction id handed out so far.
    fn last_txn_id(&self) -> TxnId {
        self.next_txn_id.load(Ordering::SeqCst).saturating_sub(1)
    }
}

/// Errors that can occur during database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// Write-ahead log error.
    Wal(WalError),
    /// Transaction error.
    Transaction(TransactionError),
    /// A lock protecting shared state was poisoned.
    LockPoisoned,
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wal(e) => write!(f, "log error: {e}"),
            Self::Transaction(e) => write!(f, "transaction error: {e}"),
            Self::LockPoisoned => write!(f, "database lock poisoned"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Wal(e) => Some(e),
            Self::Transaction(e) => Some(e),
            Self::LockPoisoned => None,
        }
    }
}

impl From<WalError> for DatabaseError {
    fn from(e: WalError) -> Self {
        Self::Wal(e)
    }
}

impl From<TransactionError> for DatabaseError {
    fn from(e: TransactionError) -> Self {
        Self::Transaction(e)
    }
}
