//! Runtime event stream payloads.

use crate::types::{OpSeq, QueryKey, Version};

/// Events emitted from the single-writer cache loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A confirmed value was written.
    Written {
        /// Written key.
        key: QueryKey,
        /// Version assigned to the value.
        version: Version,
    },
    /// An entry was dropped.
    Removed {
        /// Removed key.
        key: QueryKey,
    },
    /// An optimistic value is now visible under `key`.
    OptimisticApplied {
        /// Affected key.
        key: QueryKey,
    },
    /// The optimistic value was replaced by the server-confirmed one.
    Committed {
        /// Affected key.
        key: QueryKey,
    },
    /// The optimistic value was replaced by the pre-mutation snapshot.
    RolledBack {
        /// Affected key.
        key: QueryKey,
    },
    /// The entry was marked for revalidation.
    Invalidated {
        /// Affected key.
        key: QueryKey,
    },
    /// A fetch result arrived after its key was cancelled and was dropped.
    FetchDiscarded {
        /// Affected key.
        key: QueryKey,
    },
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
}
