//! Write-Ahead Log (WAL) implementation.
//!
//! The WAL provides durability for the storage engine. Every committed
//! transaction is appended as exactly one log record before its writes become
//! visible, so a crash either loses the whole transaction or none of it.
//!
//! # Log Record Format
//!
//! Each record has the following layout:
//! ```text
//! +----------+--------------------------------------------------+
//! | 0-3      | record_length (4 bytes, includes header+payload) |
//! | 4-11     | transaction_id (8 bytes)                         |
//! | 12-15    | write_count (4 bytes)                            |
//! | 16-N     | writes (variable)                                |
//! | N-N+3    | CRC32 checksum (4 bytes)                         |
//! +----------+--------------------------------------------------+
//! ```
//!
//! Each write is encoded as:
//! ```text
//! op (1) | table_len (2) | table | key_len (4) | key | [value_len (4) | value]
//! ```
//! The value is only present for `Put`.
//!
//! # Recovery
//!
//! Records are replayed in order on open. A record that is truncated or fails
//! its checksum marks the end of the log; the file is truncated to the last
//! intact record so that later appends do not follow garbage.
//!
//! # Rewrite
//!
//! A checkpoint replaces the whole log with a snapshot. The snapshot is
//! written and synced to a sibling `.tmp` file, then renamed over the log.

// record lengths fit in u32, checked before encoding
#![allow(clippy::cast_possible_truncation)]

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Log record header size (before writes).
/// `record_length` (4) + `txn_id` (8) + `write_count` (4) = 16 bytes
const RECORD_HEADER_SIZE: usize = 16;

/// CRC32 checksum size at end of record.
const CHECKSUM_SIZE: usize = 4;

/// Largest record the log accepts: 64MB.
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Room left for encoded writes in a record of maximum size.
pub(crate) const MAX_WRITES_SIZE: usize = MAX_RECORD_SIZE - RECORD_HEADER_SIZE - CHECKSUM_SIZE;

/// Transaction identifier.
pub type TxnId = u64;

const OP_PUT: u8 = 0x01;
const OP_DELETE: u8 = 0x02;

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalWrite {
    /// Insert or overwrite `key` in `table`.
    Put {
        table: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Remove `key` from `table`.
    Delete { table: String, key: Vec<u8> },
}

impl WalWrite {
    /// Bytes this write takes inside a record.
    pub(crate) fn encoded_len(&self) -> usize {
        let (table, key, value_len) = match self {
            Self::Put { table, key, value } => (table, key, 4 + value.len()),
            Self::Delete { table, key } => (table, key, 0),
        };
        1 + 2 + table.len() + 4 + key.len() + value_len
    }

    fn encode_into(&self, bytes: &mut Vec<u8>) {
        let (op, table, key) = match self {
            Self::Put { table, key, .. } => (OP_PUT, table, key),
            Self::Delete { table, key } => (OP_DELETE, table, key),
        };
        bytes.push(op);
        bytes.extend_from_slice(&(table.len() as u16).to_le_bytes());
        bytes.extend_from_slice(table.as_bytes());
        bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
        bytes.extend_from_slice(key);
        if let Self::Put { value, .. } = self {
            bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
            bytes.extend_from_slice(value);
        }
    }

    fn decode(reader: &mut SliceReader<'_>) -> Result<Self, WalError> {
        let op = reader.u8()?;
        let table_len = reader.u16()? as usize;
        let table = String::from_utf8(reader.take(table_len)?.to_vec())
            .map_err(|_| WalError::CorruptRecord)?;
        let key_len = reader.u32()? as usize;
        let key = reader.take(key_len)?.to_vec();
        match op {
            OP_PUT => {
                let value_len = reader.u32()? as usize;
                let value = reader.take(value_len)?.to_vec();
                Ok(Self::Put { table, key, value })
            }
            OP_DELETE => Ok(Self::Delete { table, key }),
            other => Err(WalError::InvalidOperation(other)),
        }
    }
}

/// A complete log record: all writes of one committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Transaction ID that wrote this record.
    pub txn_id: TxnId,
    /// The writes, in the order they were buffered.
    pub writes: Vec<WalWrite>,
}

impl LogRecord {
    /// Serialize this record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WalError> {
        let mut bytes = Vec::with_capacity(RECORD_HEADER_SIZE + CHECKSUM_SIZE);
        // Length placeholder, patched once the payload size is known
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&self.txn_id.to_le_bytes());
        bytes.extend_from_slice(&(self.writes.len() as u32).to_le_bytes());
        for write in &self.writes {
            write.encode_into(&mut bytes);
        }

        let total_len = bytes.len() + CHECKSUM_SIZE;
        if total_len > MAX_RECORD_SIZE {
            return Err(WalError::RecordTooLarge {
                size: total_len,
                max: MAX_RECORD_SIZE,
            });
        }
        bytes[0..4].copy_from_slice(&(total_len as u32).to_le_bytes());

        // CRC32 checksum - computed over everything before it
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());
        Ok(bytes)
    }

    /// Deserialize a record from bytes.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), WalError> {
        if bytes.len() < RECORD_HEADER_SIZE + CHECKSUM_SIZE {
            return Err(WalError::CorruptRecord);
        }

        let record_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if record_len < RECORD_HEADER_SIZE + CHECKSUM_SIZE || record_len > bytes.len() {
            return Err(WalError::CorruptRecord);
        }

        let stored_checksum = u32::from_le_bytes([
            bytes[record_len - 4],
            bytes[record_len - 3],
            bytes[record_len - 2],
            bytes[record_len - 1],
        ]);
        let computed_checksum = crc32fast::hash(&bytes[..record_len - CHECKSUM_SIZE]);
        if stored_checksum != computed_checksum {
            return Err(WalError::ChecksumMismatch {
                expected: stored_checksum,
                actual: computed_checksum,
            });
        }

        let mut reader = SliceReader::new(&bytes[4..record_len - CHECKSUM_SIZE]);
        let txn_id = reader.u64()?;
        let write_count = reader.u32()? as usize;
        let mut writes = Vec::with_capacity(write_count.min(1024));
        for _ in 0..write_count {
            writes.push(WalWrite::decode(&mut reader)?);
        }
        if !reader.is_empty() {
            return Err(WalError::CorruptRecord);
        }

        Ok((Self { txn_id, writes }, record_len))
    }
}

/// Append-only log file.
pub struct Wal {
    path: PathBuf,
    file: File,
    /// Byte offset of the end of the last intact record.
    len: u64,
}

/// Outcome of opening a log.
#[derive(Debug, Default)]
pub struct ReplayResult {
    /// Intact records, in log order.
    pub records: Vec<LogRecord>,
    /// Bytes discarded from a torn or corrupt tail.
    pub truncated_bytes: u64,
}

impl Wal {
    /// Open (or create) the log at `path` and read back every intact record.
    pub fn open(path: &Path) -> Result<(Self, ReplayResult), WalError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let mut offset = 0usize;
        let mut records = Vec::new();
        while offset < contents.len() {
            match LogRecord::from_bytes(&contents[offset..]) {
                Ok((record, consumed)) => {
                    records.push(record);
                    offset += consumed;
                }
                Err(e) => {
                    tracing::warn!(
                        "write-ahead log {} has a bad record at offset {offset}: {e}; truncating",
                        path.display()
                    );
                    break;
                }
            }
        }

        let truncated_bytes = (contents.len() - offset) as u64;
        if truncated_bytes > 0 {
            file.set_len(offset as u64)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(offset as u64))?;

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                len: offset as u64,
            },
            ReplayResult {
                records,
                truncated_bytes,
            },
        ))
    }

    /// Append a record and fsync it.
    ///
    /// On failure the file is cut back to its previous length so a partial
    /// record never precedes a later successful one.
    pub fn append(&mut self, record: &LogRecord) -> Result<(), WalError> {
        let bytes = record.to_bytes()?;
        let result = self
            .file
            .write_all(&bytes)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = result {
            // Best effort: the caller reports the original error either way
            let _ = self.file.set_len(self.len);
            let _ = self.file.seek(SeekFrom::Start(self.len));
            return Err(WalError::Io(e));
        }
        self.len += bytes.len() as u64;
        Ok(())
    }

    /// Replace the whole log with `records`.
    ///
    /// Until the rename the old log stays intact. On failure this handle
    /// keeps appending to the old log.
    pub fn rewrite(&mut self, records: &[LogRecord]) -> Result<(), WalError> {
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let result = Self::write_synced(&tmp_path, records).and_then(|written| {
            std::fs::rename(&tmp_path, &self.path)?;
            Ok(written)
        });
        let (file, len) = match result {
            Ok(written) => written,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        // The rename is durable once the directory entry is synced
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
                tracing::warn!("failed to sync directory {}: {e}", dir.display());
            }
        }

        self.file = file;
        self.len = len;
        Ok(())
    }

    fn write_synced(path: &Path, records: &[LogRecord]) -> Result<(File, u64), WalError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut len = 0u64;
        for record in records {
            let bytes = record.to_bytes()?;
            file.write_all(&bytes)?;
            len += bytes.len() as u64;
        }
        file.sync_all()?;
        Ok((file, len))
    }

    /// Current size of the log in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Whether the log holds no records.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Bounds-checked little-endian reader over a byte slice.
struct SliceReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WalError> {
        let end = self.pos.checked_add(n).ok_or(WalError::CorruptRecord)?;
        let slice = self.bytes.get(self.pos..end).ok_or(WalError::CorruptRecord)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WalError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WalError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, WalError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, WalError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    const fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

/// Errors that can occur during WAL operations.
#[derive(Debug)]
pub enum WalError {
    /// I/O error.
    Io(std::io::Error),
    /// Record is truncated or structurally invalid.
    CorruptRecord,
    /// Checksum does not match the record contents.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Unknown write operation tag.
    InvalidOperation(u8),
    /// Record exceeds the maximum size.
    RecordTooLarge { size: usize, max: usize },
}

impl std::fmt::Display for WalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::CorruptRecord => write!(f, "corrupt log record"),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
            ),
            Self::InvalidOperation(op) => write!(f, "invalid write operation: {op:#04x}"),
            Self::RecordTooLarge { size, max } => {
                write!(f, "log record of {size} bytes exceeds maximum of {max}")
            }
        }
    }
}

impl std::error::Error for WalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WalError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
