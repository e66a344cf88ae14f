//! Append-only commit log.
//!
//! Every committed write attempt becomes one record. Replaying the records
//! in order rebuilds the keyspace.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | length (4) | payload (length) | crc32 (4) |
//! ```
//!
//! The payload is:
//!
//! ```text
//! | sequence (8) | op_count (4) | ops... |
//! op = | tag (1) | key_len (4) | key | [value_len (4) | value]   (value only for puts)
//! ```
//!
//! All integers are little-endian. The CRC covers header and payload.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// Magic bytes identifying a commit record.
const LOG_MAGIC: [u8; 4] = *b"SKCL";
/// Current record format version.
const LOG_VERSION: u16 = 1;
/// magic (4) + version (2) + length (4)
const HEADER_SIZE: usize = 10;
const CRC_SIZE: usize = 4;

const TAG_PUT: u8 = 1;
const TAG_DELETE: u8 = 2;

/// One mutation inside a commit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    /// Key set to value.
    Put {
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Key removed.
    Delete {
        /// Key bytes.
        key: Vec<u8>,
    },
}

/// The writes of one committed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// Commit sequence number.
    pub sequence: u64,
    /// Mutations, applied in order.
    pub ops: Vec<LogOp>,
}

impl CommitRecord {
    fn encode_payload(&self) -> StorageResult<Vec<u8>> {
        let mut out = Vec::with_capacity(12 + self.ops.len() * 16);
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&len_u32(self.ops.len())?.to_le_bytes());

        for op in &self.ops {
            match op {
                LogOp::Put { key, value } => {
                    out.push(TAG_PUT);
                    put_bytes(&mut out, key)?;
                    put_bytes(&mut out, value)?;
                }
                LogOp::Delete { key } => {
                    out.push(TAG_DELETE);
                    put_bytes(&mut out, key)?;
                }
            }
        }
        Ok(out)
    }

    fn decode_payload(payload: &[u8]) -> StorageResult<Self> {
        let mut cursor = Cursor { data: payload, pos: 0 };
        let sequence = u64::from_le_bytes(cursor.array::<8>()?);
        let count = u32::from_le_bytes(cursor.array::<4>()?) as usize;

        let mut ops = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let tag = cursor.array::<1>()?[0];
            let key = cursor.bytes()?;
            match tag {
                TAG_PUT => {
                    let value = cursor.bytes()?;
                    ops.push(LogOp::Put { key, value });
                }
                TAG_DELETE => ops.push(LogOp::Delete { key }),
                other => {
                    return Err(StorageError::corrupted(format!(
                        "unknown commit op tag {other}"
                    )))
                }
            }
        }

        if cursor.pos != payload.len() {
            return Err(StorageError::corrupted("trailing bytes in commit record"));
        }

        Ok(Self { sequence, ops })
    }
}

/// Commit log over a [`StorageBackend`].
pub struct CommitLog {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
    /// Set when a failed append could not be rolled back.
    failure: Option<String>,
}

impl CommitLog {
    /// Wraps a backend. With `sync_on_commit` every append is synced to disk.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
            failure: None,
        }
    }

    /// Appends one record and makes it durable according to the sync policy.
    ///
    /// If the write, flush or sync fails, the log is cut back to where the
    /// record began, so a record whose append returned an error is never
    /// replayed. When that cut fails too, the log refuses every later append.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is too large or the write fails, and
    /// [`StorageError::LogFailed`] once a rollback has failed.
    pub fn append(&mut self, record: &CommitRecord) -> StorageResult<u64> {
        if let Some(failure) = &self.failure {
            return Err(StorageError::LogFailed(failure.clone()));
        }

        let payload = record.encode_payload()?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.extend_from_slice(&len_u32(payload.len())?.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        let start = self.backend.size()?;
        match self.write_durably(&data) {
            Ok(()) => Ok(start),
            Err(err) => {
                self.roll_back(start, &err);
                Err(err)
            }
        }
    }

    /// Returns true once a failed append could not be rolled back.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    fn write_durably(&mut self, data: &[u8]) -> StorageResult<()> {
        self.backend.append(data)?;
        if self.sync_on_commit {
            self.backend.sync()
        } else {
            self.backend.flush()
        }
    }

    fn roll_back(&mut self, start: u64, cause: &StorageError) {
        let restored = self
            .backend
            .truncate(start)
            .and_then(|()| self.backend.sync());
        match restored {
            Ok(()) => tracing::warn!(offset = start, error = %cause, "rolled back failed commit record"),
            Err(err) => {
                tracing::error!(
                    offset = start,
                    error = %cause,
                    rollback_error = %err,
                    "cannot roll back failed commit record, log closed for writes"
                );
                self.failure = Some(format!("{cause}; rollback failed: {err}"));
            }
        }
    }

    /// Reads every record in the log.
    ///
    /// A trailing record that is cut short (a torn write) is dropped and the
    /// log truncated to the last complete record. Anything else that fails
    /// validation is reported as corruption.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] on bad magic, version, CRC,
    /// payload or sequence ordering, and I/O errors from the backend.
    pub fn replay(&mut self) -> StorageResult<Vec<CommitRecord>> {
        let size = self.backend.size()?;
        let data = self.backend.read_at(0, size as usize)?;

        let mut records = Vec::new();
        let mut offset = 0usize;
        let mut last_sequence = 0u64;

        while offset < data.len() {
            let rest = &data[offset..];
            if rest.len() < HEADER_SIZE {
                self.drop_torn_tail(offset as u64, size)?;
                break;
            }
            if rest[0..4] != LOG_MAGIC {
                return Err(StorageError::corrupted(format!(
                    "bad commit record magic at offset {offset}"
                )));
            }
            let version = u16::from_le_bytes([rest[4], rest[5]]);
            if version != LOG_VERSION {
                return Err(StorageError::corrupted(format!(
                    "unsupported commit log version {version}"
                )));
            }
            let len = u32::from_le_bytes([rest[6], rest[7], rest[8], rest[9]]) as usize;
            let total = HEADER_SIZE + len + CRC_SIZE;
            if rest.len() < total {
                self.drop_torn_tail(offset as u64, size)?;
                break;
            }

            let body = &rest[..HEADER_SIZE + len];
            let crc_bytes = &rest[HEADER_SIZE + len..total];
            let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
            let computed = compute_crc32(body);
            if stored != computed {
                return Err(StorageError::corrupted(format!(
                    "commit record checksum mismatch at offset {offset}: expected {stored:08x}, got {computed:08x}"
                )));
            }

            let record = CommitRecord::decode_payload(&body[HEADER_SIZE..])?;
            if record.sequence <= last_sequence {
                return Err(StorageError::corrupted(format!(
                    "commit sequence {} does not follow {}",
                    record.sequence, last_sequence
                )));
            }
            last_sequence = record.sequence;
            records.push(record);
            offset += total;
        }

        Ok(records)
    }

    /// Syncs the log to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.backend.sync()
    }

    fn drop_torn_tail(&mut self, valid_len: u64, size: u64) -> StorageResult<()> {
        tracing::warn!(
            valid_len,
            dropped = size - valid_len,
            "dropping torn commit record at end of log"
        );
        self.backend.truncate(valid_len)
    }
}

impl std::fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLog")
            .field("sync_on_commit", &self.sync_on_commit)
            .field("failed", &self.is_failed())
            .finish_non_exhaustive()
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn array<const N: usize>(&mut self) -> StorageResult<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| StorageError::corrupted("commit record payload truncated"))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    fn bytes(&mut self) -> StorageResult<Vec<u8>> {
        let len = u32::from_le_bytes(self.array::<4>()?) as usize;
        let end = self.pos + len;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| StorageError::corrupted("commit record payload truncated"))?;
        self.pos = end;
        Ok(slice.to_vec())
    }
}

fn len_u32(len: usize) -> StorageResult<u32> {
    u32::try_from(len).map_err(|_| {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "commit record component exceeds 4 GiB",
        ))
    })
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> StorageResult<()> {
    out.extend_from_slice(&len_u32(bytes.len())?.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// Computes the CRC32 (IEEE) of `data`.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
