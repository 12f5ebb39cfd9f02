//! Optimistic serializable transactions.
//!
//! A transaction buffers its writes privately, so nothing it does is visible
//! to other transactions until it commits. Every read records the version of
//! what it saw; commit re-checks those versions under the database's write
//! lock and fails with [`TransactionError::Conflict`] if anything read has
//! since been overwritten by another commit. Callers retry the whole body on
//! conflict.
//!
//! Dropping a transaction without committing rolls it back.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::storage::database::Shared;
use crate::storage::wal::{TxnId, WalError, WalWrite};

/// Key of a buffered write: (table, key).
type WriteKey = (String, Vec<u8>);

/// An open transaction.
pub struct Transaction {
    shared: Arc<Shared>,
    txn_id: TxnId,
    /// Versions observed by point reads. First observation wins.
    reads: HashMap<(String, Vec<u8>), u64>,
    /// Table versions observed by scans.
    scans: HashMap<String, u64>,
    /// Buffered writes; `None` is a delete.
    writes: BTreeMap<WriteKey, Option<Vec<u8>>>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(shared: Arc<Shared>, txn_id: TxnId) -> Self {
        Self {
            shared,
            txn_id,
            reads: HashMap::new(),
            scans: HashMap::new(),
            writes: BTreeMap::new(),
            finished: false,
        }
    }

    /// Get the transaction ID.
    #[must_use]
    pub const fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Look up a single row.
    ///
    /// Sees this transaction's own buffered writes first.
    pub fn get(&mut self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, TransactionError> {
        if let Some(buffered) = self.writes.get(&(table.to_string(), key.to_vec())) {
            return Ok(buffered.clone());
        }

        let state = self
            .shared
            .state
            .read()
            .map_err(|_| TransactionError::LockPoisoned)?;
        let row = state.tables.get(table).and_then(|t| t.rows.get(key));
        self.reads
            .entry((table.to_string(), key.to_vec()))
            .or_insert_with(|| row.map_or(0, |r| r.version));
        Ok(row.map(|r| r.value.clone()))
    }

    /// Read every row of a table, in key order.
    ///
    /// The scan conflicts with any later commit to the same table, which also
    /// covers rows inserted after the scan (phantoms).
    pub fn scan(&mut self, table: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, TransactionError> {
        let mut rows: BTreeMap<Vec<u8>, Vec<u8>> = {
            let state = self
                .shared
                .state
                .read()
                .map_err(|_| TransactionError::LockPoisoned)?;
            self.scans
                .entry(table.to_string())
                .or_insert_with(|| state.table_version(table));
            state
                .tables
                .get(table)
                .map(|t| {
                    t.rows
                        .iter()
                        .map(|(k, v)| (k.clone(), v.value.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        for ((write_table, key), value) in &self.writes {
            if write_table != table {
                continue;
            }
            match value {
                Some(value) => {
                    rows.insert(key.clone(), value.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }

        Ok(rows.into_iter().collect())
    }

    /// Insert or overwrite a row.
    pub fn put(&mut self, table: &str, key: &[u8], value: Vec<u8>) {
        self.writes
            .insert((table.to_string(), key.to_vec()), Some(value));
    }

    /// Delete a row. Deleting an absent row is a no-op at commit.
    pub fn delete(&mut self, table: &str, key: &[u8]) {
        self.writes.insert((table.to_string(), key.to_vec()), None);
    }

    /// Whether the transaction has buffered any writes.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    /// Commit the transaction.
    ///
    /// On success every buffered write is durable and visible. On
    /// `Conflict` nothing was written and the caller may retry.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        self.finished = true;
        let writes = std::mem::take(&mut self.writes)
            .into_iter()
            .map(|((table, key), value)| match value {
                Some(value) => WalWrite::Put { table, key, value },
                None => WalWrite::Delete { table, key },
            })
            .collect();
        self.shared
            .commit(self.txn_id, &self.reads, &self.scans, writes)
    }

    /// Abort the transaction, discarding every buffered write.
    pub fn rollback(mut self) {
        self.finished = true;
        self.writes.clear();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && !self.writes.is_empty() {
            tracing::debug!(
                txn_id = self.txn_id,
                writes = self.writes.len(),
                "transaction dropped without commit; rolled back"
            );
        }
    }
}

/// Errors that can occur during transaction operations.
#[derive(Debug)]
pub enum TransactionError {
    /// Another transaction committed a newer version of something read.
    Conflict,
    /// Write-ahead log error.
    Wal(WalError),
    /// A lock protecting shared state was poisoned.
    LockPoisoned,
}

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict => write!(f, "serialization conflict"),
            Self::Wal(e) => write!(f, "log error: {e}"),
            Self::LockPoisoned => write!(f, "database lock poisoned"),
        }
    }
}

impl std::error::Error for TransactionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Wal(e) => Some(e),
            Self::Conflict | Self::LockPoisoned => None,
        }
    }
}

impl From<WalError> for TransactionError {
    fn from(e: WalError) -> Self {
        Self::Wal(e)
    }
}
