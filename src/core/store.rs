use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    op::{CacheOp, StoredOp},
    types::{Generation, OpSeq, QueryKey, Version},
};

/// Contract violations detected by [`CacheStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A second optimistic apply was attempted before the first settled.
    #[error("optimistic write already in effect for {0}")]
    OptimisticInEffect(QueryKey),
    /// Commit or rollback without a matching optimistic apply.
    #[error("no optimistic write in effect for {0}")]
    NoOptimisticWrite(QueryKey),
}

/// Value stored under a key plus its version marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cached JSON value.
    pub value: Value,
    /// Monotonic version assigned when the value was written.
    pub version: Version,
    /// True once the entry was invalidated and awaits a refetch.
    pub stale: bool,
    /// Wall-clock write time in milliseconds.
    pub updated_at_ms: u64,
}

/// Proof that a fetch for `key` started at `generation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    /// Key being fetched.
    pub key: QueryKey,
    /// Generation observed when the fetch started.
    pub generation: Generation,
}

/// One persisted entry of a [`CacheSnapshotV1`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Entry key.
    pub key: QueryKey,
    /// Confirmed entry.
    pub entry: CacheEntry,
}

/// Serializable image of the confirmed cache contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshotV1 {
    /// Next version to hand out.
    pub next_version: Version,
    /// Next journal sequence.
    pub next_op_seq: OpSeq,
    /// Confirmed entries sorted by key.
    pub entries: Vec<SnapshotEntry>,
}

/// Cache of last known-good values keyed by [`QueryKey`].
///
/// Keys with an optimistic value in effect keep their last confirmed entry in
/// a shadow map until the mutation commits or rolls back. Snapshots and the
/// journal only ever see confirmed values.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: HashMap<QueryKey, CacheEntry>,
    shadow: HashMap<QueryKey, Option<CacheEntry>>,
    // Outlives removed entries: resetting a key to generation 0 would re-arm
    // tickets issued before the removal. Bounded by the keys of one session.
    generations: HashMap<QueryKey, Generation>,
    // Pruned by `remove`.
    invalidations: HashMap<QueryKey, u64>,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
    next_version: Version,
}

impl CacheStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            next_op_seq: 1,
            next_version: 1,
            ..Self::default()
        }
    }

    /// Rebuilds a store from an exported snapshot.
    pub fn from_snapshot(snapshot: CacheSnapshotV1) -> Self {
        let mut store = Self {
            next_op_seq: snapshot.next_op_seq.max(1),
            next_version: snapshot.next_version.max(1),
            ..Self::default()
        };
        for SnapshotEntry { key, entry } in snapshot.entries {
            store.next_version = store.next_version.max(entry.version.saturating_add(1));
            store.entries.insert(key, entry);
        }
        store
    }

    /// Exports confirmed entries; optimistic values are replaced by their shadow.
    pub fn export_snapshot(&self) -> CacheSnapshotV1 {
        let mut entries: Vec<SnapshotEntry> = self
            .entries
            .iter()
            .filter(|(key, _)| !self.shadow.contains_key(*key))
            .map(|(key, entry)| SnapshotEntry {
                key: key.clone(),
                entry: entry.clone(),
            })
            .chain(self.shadow.iter().filter_map(|(key, entry)| {
                entry.as_ref().map(|entry| SnapshotEntry {
                    key: key.clone(),
                    entry: entry.clone(),
                })
            }))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        CacheSnapshotV1 {
            next_version: self.next_version,
            next_op_seq: self.next_op_seq,
            entries,
        }
    }

    /// Current entry under `key`, optimistic or confirmed.
    pub fn get(&self, key: &QueryKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Owned copy of [`CacheStore::get`].
    pub fn get_cloned(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.get(key).cloned()
    }

    /// Replaces the value under `key` with a confirmed value.
    pub fn write(&mut self, key: QueryKey, value: Value) -> Result<StoredOp, StoreError> {
        if self.shadow.contains_key(&key) {
            return Err(StoreError::OptimisticInEffect(key));
        }
        let stored = self.apply_write(key, value);
        self.pending_ops.push(stored.clone());
        Ok(stored)
    }

    /// Drops the entry under `key`; `None` when nothing was stored.
    ///
    /// Fetches in flight for the key are disarmed so they cannot bring the
    /// entry back, and its invalidation count is forgotten.
    pub fn remove(&mut self, key: &QueryKey) -> Result<Option<StoredOp>, StoreError> {
        if self.shadow.contains_key(key) {
            return Err(StoreError::OptimisticInEffect(key.clone()));
        }
        self.cancel_fetches(key);
        self.invalidations.remove(key);
        if !self.entries.contains_key(key) {
            return Ok(None);
        }
        let stored = self.apply_remove(key.clone());
        self.pending_ops.push(stored.clone());
        Ok(Some(stored))
    }

    /// Marks `key` stale so the next read refetches it.
    pub fn invalidate(&mut self, key: &QueryKey) -> StoredOp {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.stale = true;
        }
        *self.invalidations.entry(key.clone()).or_insert(0) += 1;

        let stored = StoredOp {
            seq: self.take_next_op_seq(),
            ts_ms: now_ms(),
            op: CacheOp::Invalidate { key: key.clone() },
        };
        self.pending_ops.push(stored.clone());
        stored
    }

    /// Disarms pending fetches for `key` and returns the new generation.
    pub fn cancel_fetches(&mut self, key: &QueryKey) -> Generation {
        let generation = self.generations.entry(key.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Registers a fetch for `key` against the current generation.
    pub fn begin_fetch(&self, key: QueryKey) -> FetchTicket {
        let generation = self.generation(&key);
        FetchTicket { key, generation }
    }

    /// Stores a fetch result unless it went stale while in flight.
    ///
    /// Returns `None` when the result was discarded, either because the key
    /// was cancelled after the ticket was issued or because an optimistic
    /// value is in effect.
    pub fn complete_fetch(&mut self, ticket: FetchTicket, value: Value) -> Option<StoredOp> {
        if self.shadow.contains_key(&ticket.key) || self.generation(&ticket.key) != ticket.generation {
            return None;
        }
        let stored = self.apply_write(ticket.key, value);
        self.pending_ops.push(stored.clone());
        Some(stored)
    }

    /// Installs an optimistic value and returns the rollback snapshot.
    ///
    /// Cancels in-flight fetches for the key. `next == None` removes the
    /// entry. Nothing is journaled.
    pub fn begin_optimistic(
        &mut self,
        key: QueryKey,
        next: Option<Value>,
    ) -> Result<Option<CacheEntry>, StoreError> {
        if self.shadow.contains_key(&key) {
            return Err(StoreError::OptimisticInEffect(key));
        }
        self.cancel_fetches(&key);

        let snapshot = self.entries.get(&key).cloned();
        self.shadow.insert(key.clone(), snapshot.clone());
        match next {
            Some(value) => {
                let entry = CacheEntry {
                    value,
                    version: self.take_next_version(),
                    stale: false,
                    updated_at_ms: now_ms(),
                };
                self.entries.insert(key, entry);
            }
            None => {
                self.entries.remove(&key);
            }
        }
        Ok(snapshot)
    }

    /// Replaces an optimistic value with the server-confirmed one.
    ///
    /// Fetches started while the optimistic value was in effect read state
    /// from before the commit, so their tickets are disarmed.
    pub fn commit(&mut self, key: QueryKey, confirmed: Option<Value>) -> Result<StoredOp, StoreError> {
        self.shadow
            .remove(&key)
            .ok_or_else(|| StoreError::NoOptimisticWrite(key.clone()))?;
        self.cancel_fetches(&key);
        let stored = match confirmed {
            Some(value) => self.apply_write(key, value),
            None => self.apply_remove(key),
        };
        self.pending_ops.push(stored.clone());
        Ok(stored)
    }

    /// Restores the value captured before the optimistic apply.
    pub fn rollback(
        &mut self,
        key: QueryKey,
        snapshot: Option<CacheEntry>,
    ) -> Result<StoredOp, StoreError> {
        self.shadow
            .remove(&key)
            .ok_or_else(|| StoreError::NoOptimisticWrite(key.clone()))?;
        self.cancel_fetches(&key);
        let stored = match snapshot {
            Some(entry) => {
                let stored = self.apply_write(key.clone(), entry.value);
                if entry.stale {
                    if let Some(restored) = self.entries.get_mut(&key) {
                        restored.stale = true;
                    }
                }
                stored
            }
            None => self.apply_remove(key),
        };
        self.pending_ops.push(stored.clone());
        Ok(stored)
    }

    /// Replays a journaled op during recovery.
    pub fn apply_replayed_op(&mut self, stored: StoredOp) {
        self.bump_next_seq_from(stored.seq);
        match stored.op {
            CacheOp::Write {
                key,
                value,
                version,
            } => {
                self.next_version = self.next_version.max(version.saturating_add(1));
                self.entries.insert(
                    key,
                    CacheEntry {
                        value,
                        version,
                        stale: false,
                        updated_at_ms: stored.ts_ms,
                    },
                );
            }
            CacheOp::Remove { key } => {
                self.entries.remove(&key);
            }
            CacheOp::Invalidate { key } => {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.stale = true;
                }
            }
        }
    }

    /// True while `key` holds an unreconciled optimistic value.
    pub fn is_optimistic(&self, key: &QueryKey) -> bool {
        self.shadow.contains_key(key)
    }

    /// Current fetch generation of `key`.
    pub fn generation(&self, key: &QueryKey) -> Generation {
        self.generations.get(key).copied().unwrap_or(0)
    }

    /// Number of invalidations recorded for `key` since the store was created.
    pub fn invalidation_count(&self, key: &QueryKey) -> u64 {
        self.invalidations.get(key).copied().unwrap_or(0)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored keys in order.
    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Takes the ops journaled since the last drain.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    /// Sequence of the last journaled op.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn apply_write(&mut self, key: QueryKey, value: Value) -> StoredOp {
        let version = self.take_next_version();
        let ts_ms = now_ms();
        self.entries.insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                version,
                stale: false,
                updated_at_ms: ts_ms,
            },
        );
        StoredOp {
            seq: self.take_next_op_seq(),
            ts_ms,
            op: CacheOp::Write {
                key,
                value,
                version,
            },
        }
    }

    fn apply_remove(&mut self, key: QueryKey) -> StoredOp {
        self.entries.remove(&key);
        StoredOp {
            seq: self.take_next_op_seq(),
            ts_ms: now_ms(),
            op: CacheOp::Remove { key },
        }
    }

    fn take_next_version(&mut self) -> Version {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }

    fn bump_next_seq_from(&mut self, seq: OpSeq) {
        self.next_op_seq = self.next_op_seq.max(seq.saturating_add(1));
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
