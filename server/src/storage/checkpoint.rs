//! Checkpointing to keep the write-ahead log bounded.
//!
//! Every commit appends to the log, so without checkpoints recovery time and
//! disk use grow with the full history. A checkpoint rewrites the log as a
//! snapshot of the committed state: one `Put` per live row, nothing else.
//!
//! # Checkpoint Triggers
//!
//! - Transaction count threshold (default: 1000 transactions)
//! - Bytes written threshold (default: 4MB)
//! - Manual trigger via [`Database::checkpoint`](crate::storage::Database::checkpoint)
//!
//! # Recovery
//!
//! A snapshot replays like any other log, so recovery does not distinguish
//! a checkpointed log from one that was never compacted.

use crate::storage::database::State;
use crate::storage::wal::{LogRecord, MAX_WRITES_SIZE, TxnId, WalWrite};

/// Default number of transactions between checkpoints.
pub const DEFAULT_TXN_THRESHOLD: u64 = 1000;

/// Default number of bytes written between checkpoints (4MB).
pub const DEFAULT_BYTES_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Checkpoint configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Number of transactions between automatic checkpoints.
    /// Set to 0 to disable transaction-based checkpoints.
    pub txn_threshold: u64,

    /// Number of bytes appended to the log between automatic checkpoints.
    /// Set to 0 to disable byte-based checkpoints.
    pub bytes_threshold: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            txn_threshold: DEFAULT_TXN_THRESHOLD,
            bytes_threshold: DEFAULT_BYTES_THRESHOLD,
        }
    }
}

impl CheckpointConfig {
    /// Create a new checkpoint configuration.
    #[must_use]
    pub const fn new(txn_threshold: u64, bytes_threshold: u64) -> Self {
        Self {
            txn_threshold,
            bytes_threshold,
        }
    }

    /// Disable automatic checkpoints (manual only).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            txn_threshold: 0,
            bytes_threshold: 0,
        }
    }
}

/// Counters behind the automatic trigger.
#[derive(Debug)]
pub(crate) struct CheckpointState {
    config: CheckpointConfig,
    txns_since_checkpoint: u64,
    bytes_since_checkpoint: u64,
}

impl CheckpointState {
    pub(crate) const fn new(config: CheckpointConfig) -> Self {
        Self {
            config,
            txns_since_checkpoint: 0,
            bytes_since_checkpoint: 0,
        }
    }

    /// Start from `txns` commits and `bytes` already in the log.
    pub(crate) const fn with_backlog(mut self, txns: u64, bytes: u64) -> Self {
        self.txns_since_checkpoint = txns;
        self.bytes_since_checkpoint = bytes;
        self
    }

    /// Record a commit that appended `bytes` to the log.
    pub(crate) const fn record_commit(&mut self, bytes: u64) {
        self.txns_since_checkpoint += 1;
        self.bytes_since_checkpoint += bytes;
    }

    #[must_use]
    pub(crate) const fn should_checkpoint(&self) -> bool {
        if self.config.txn_threshold > 0 && self.txns_since_checkpoint >= self.config.txn_threshold
        {
            return true;
        }

        self.config.bytes_threshold > 0
            && self.bytes_since_checkpoint >= self.config.bytes_threshold
    }

    /// Reset counters after a successful checkpoint.
    pub(crate) const fn reset(&mut self) {
        self.txns_since_checkpoint = 0;
        self.bytes_since_checkpoint = 0;
    }
}

/// Encode `state` as log records stamped with `txn_id`.
///
/// Always yields at least one record, so a reopened database resumes
/// transaction ids after `txn_id` even when the state is empty.
pub(crate) fn snapshot(state: &State, txn_id: TxnId) -> Vec<LogRecord> {
    snapshot_chunked(state, txn_id, MAX_WRITES_SIZE)
}

fn snapshot_chunked(state: &State, txn_id: TxnId, max_chunk: usize) -> Vec<LogRecord> {
    let mut names: Vec<&String> = state.tables.keys().collect();
    names.sort();

    let mut records = Vec::new();
    let mut writes = Vec::new();
    let mut chunk_len = 0;
    for name in names {
        for (key, row) in &state.tables[name].rows {
            let write = WalWrite::Put {
                table: name.clone(),
                key: key.clone(),
                value: row.value.clone(),
            };
            let len = write.encoded_len();
            if !writes.is_empty() && chunk_len + len > max_chunk {
                records.push(LogRecord {
                    txn_id,
                    writes: std::mem::take(&mut writes),
                });
                chunk_len = 0;
            }
            chunk_len += len;
            writes.push(write);
        }
    }
    if !writes.is_empty() || records.is_empty() {
        records.push(LogRecord { txn_id, writes });
    }
    records
}
