pub mod sqlite;

use crate::{core::store::CacheSnapshotV1, op::StoredOp, types::OpSeq};

/// Failures raised by journal sinks.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// SQLite driver error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload encoding or decoding error.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// Any other persistence failure.
    #[error("{0}")]
    Message(String),
}

/// Result of sink operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Destination for confirmed cache ops and snapshots.
pub trait OpSink: Send {
    /// Appends `ops` in order; returns the highest durable seq.
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq>;
    /// Forces buffered writes to storage.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    /// Stores `snapshot` as covering every op up to `last_seq`.
    fn write_snapshot(&mut self, _snapshot: &CacheSnapshotV1, _last_seq: OpSeq) -> PersistResult<()> {
        Ok(())
    }
    /// Drops journaled ops up to `seq`; returns how many were removed.
    fn compact_through(&mut self, _seq: OpSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
