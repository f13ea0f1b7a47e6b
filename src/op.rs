//! Journaled cache operations and persistence wrappers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{OpSeq, QueryKey, Version};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// Confirmed cache change appended to the journal.
///
/// Optimistic writes never appear here; only values the server confirmed or
/// pre-mutation values restored by a rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheOp {
    /// Replace the value stored under `key`.
    Write {
        /// Target key.
        key: QueryKey,
        /// New value.
        value: Value,
        /// Version assigned to the new value.
        version: Version,
    },
    /// Drop the entry stored under `key`.
    Remove {
        /// Target key.
        key: QueryKey,
    },
    /// Mark `key` as needing revalidation.
    Invalidate {
        /// Target key.
        key: QueryKey,
    },
}

impl CacheOp {
    /// Key touched by this op.
    pub fn key(&self) -> &QueryKey {
        match self {
            Self::Write { key, .. } | Self::Remove { key } | Self::Invalidate { key } => key,
        }
    }
}

/// Journal row metadata plus operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation timestamp in milliseconds.
    pub ts_ms: u64,
    /// Operation body.
    pub op: CacheOp,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub stored: StoredOp,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(stored: StoredOp) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            stored,
        }
    }
}
