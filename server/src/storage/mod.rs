//! Transactional storage engine.
//!
//! A small key/value engine backing both the bank store and the task broker.
//!
//! # Layout
//!
//! - Named tables map byte keys to byte values; rows are encoded by the
//!   layers above.
//! - Committed state is held in memory and made durable by an append-only
//!   write-ahead log with one checksummed record per commit.
//! - The log is periodically rewritten as a snapshot; see [`checkpoint`].
//! - Transactions are optimistic and serializable; see [`transaction`].
//!
//! # Usage
//!
//! ```ignore
//! use storage::Database;
//!
//! let db = Database::open(path)?;
//! let mut txn = db.begin();
//! txn.put("users", b"alice", bytes);
//! txn.commit()?;
//! ```

pub mod checkpoint;
mod database;
pub mod time;
pub mod transaction;
pub mod wal;

pub use checkpoint::CheckpointConfig;
pub use database::{Database, DatabaseError};
pub use time::{SimulatedTimeSource, SystemTimeSource, TimeSource};
pub use transaction::{Transaction, TransactionError};
pub use wal::{ReplayResult, WalError};
