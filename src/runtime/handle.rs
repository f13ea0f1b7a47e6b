use std::{collections::VecDeque, sync::Arc};

use serde_json::Value;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};

use crate::{
    core::store::{CacheEntry, CacheSnapshotV1, CacheStore, FetchTicket, StoreError},
    op::{CacheOp, StoredOp},
    persist::{OpSink, PersistError},
    types::{Generation, OpSeq, QueryKey, Version},
};

use super::events::CacheEvent;

/// Failures surfaced by [`CacheHandle`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The store rejected the operation.
    #[error("store: {0}")]
    Store(#[from] StoreError),
    /// The journal sink or its queue failed.
    #[error("persist: {0}")]
    Persist(#[from] PersistError),
    /// An optimistic transform could not produce a value.
    #[error("optimistic transform failed: {0}")]
    Transform(String),
    /// The runtime task is gone.
    #[error("cache runtime channel closed")]
    ChannelClosed,
}

/// Tuning for the cache runtime and its persistence worker.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Flush the journal as soon as a confirmed write is queued.
    pub flush_on_write: bool,
    /// Flush once this many ops are buffered.
    pub batch_max_ops: usize,
    /// Flush buffered ops after this many milliseconds.
    pub batch_max_latency_ms: u64,
    /// Bound of the queue between the cache loop and the persistence worker.
    pub persist_queue_bound: usize,
    /// Write a snapshot every N journaled ops; `0` disables auto snapshots.
    pub snapshot_every_ops: usize,
    /// Drop journaled events covered by a snapshot.
    pub compact_after_snapshot: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_write: false,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            snapshot_every_ops: 2000,
            compact_after_snapshot: false,
        }
    }
}

/// Observable state of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStatus {
    /// Current entry, optimistic or confirmed.
    pub entry: Option<CacheEntry>,
    /// True while an optimistic value is unreconciled.
    pub optimistic: bool,
    /// Current fetch generation.
    pub generation: Generation,
    /// Invalidations recorded so far.
    pub invalidations: u64,
}

/// Speculative transform run inside the cache loop, atomically with the snapshot.
pub type OptimisticFn =
    Box<dyn FnOnce(Option<&Value>) -> Result<Option<Value>, String> + Send + 'static>;

/// Cloneable handle to the single-writer cache runtime.
///
/// The runtime owns the [`CacheStore`]; every read and write goes through
/// its command loop, so operations on the store never interleave.
#[derive(Clone)]
pub struct CacheHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<CacheEvent>,
}

enum Command {
    Read {
        key: QueryKey,
        resp: oneshot::Sender<Option<CacheEntry>>,
    },
    Inspect {
        key: QueryKey,
        resp: oneshot::Sender<KeyStatus>,
    },
    Write {
        key: QueryKey,
        value: Value,
        resp: oneshot::Sender<Result<Version, RuntimeError>>,
    },
    Remove {
        key: QueryKey,
        resp: oneshot::Sender<Result<bool, RuntimeError>>,
    },
    Invalidate {
        key: QueryKey,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    BeginMutation {
        key: QueryKey,
        apply: OptimisticFn,
        resp: oneshot::Sender<Result<Option<CacheEntry>, RuntimeError>>,
    },
    Commit {
        key: QueryKey,
        confirmed: Option<Value>,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Rollback {
        key: QueryKey,
        snapshot: Option<CacheEntry>,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    BeginFetch {
        key: QueryKey,
        resp: oneshot::Sender<FetchTicket>,
    },
    CompleteFetch {
        ticket: FetchTicket,
        value: Value,
        resp: oneshot::Sender<Result<bool, RuntimeError>>,
    },
    Flush {
        resp: oneshot::Sender<Result<OpSeq, RuntimeError>>,
    },
    Checkpoint {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Op(StoredOp),
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: CacheSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

struct LoopState {
    store: CacheStore,
    events_tx: broadcast::Sender<CacheEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    backlog: VecDeque<StoredOp>,
    config: RuntimeConfig,
    ops_since_snapshot: usize,
}

/// Moves `store` into a new runtime task and returns its handle.
///
/// Must be called from within a tokio runtime.
pub fn spawn_cache(
    store: CacheStore,
    sink: Option<Box<dyn OpSink>>,
    config: RuntimeConfig,
) -> CacheHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<CacheEvent>(1024);

    let (persist_tx, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound);
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<OpSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let mut state = LoopState {
        store,
        events_tx: events_tx.clone(),
        persist_tx,
        backlog: VecDeque::new(),
        config,
        ops_since_snapshot: 0,
    };

    tokio::spawn(async move {
        loop {
            if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        if handle_command(cmd, &mut state).await {
                            break;
                        }
                    }
                    durable = rx.recv() => {
                        match durable {
                            Some(Ok(op_seq)) => {
                                let _ = state.events_tx.send(CacheEvent::DurableUpTo { op_seq });
                            }
                            Some(Err(err)) => tracing::error!(error = %err, "cache journal append failed"),
                            None => durable_rx = None,
                        }
                    }
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                if handle_command(cmd, &mut state).await {
                    break;
                }
            }
        }
        tracing::debug!("cache runtime stopped");
    });

    CacheHandle { cmd_tx, events_tx }
}

impl CacheHandle {
    /// New receiver of [`CacheEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events_tx.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Current entry, optimistic or confirmed.
    pub async fn read(&self, key: QueryKey) -> Result<Option<CacheEntry>, RuntimeError> {
        self.request(|resp| Command::Read { key, resp }).await
    }

    /// Entry plus optimistic flag, generation and invalidation count.
    pub async fn inspect(&self, key: QueryKey) -> Result<KeyStatus, RuntimeError> {
        self.request(|resp| Command::Inspect { key, resp }).await
    }

    /// Stores a confirmed value. Fails while an optimistic value is in effect.
    pub async fn write(&self, key: QueryKey, value: Value) -> Result<Version, RuntimeError> {
        self.request(|resp| Command::Write { key, value, resp }).await?
    }

    /// Drops the entry; returns false when nothing was stored.
    pub async fn remove(&self, key: QueryKey) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::Remove { key, resp }).await?
    }

    /// Marks `key` stale and journals the invalidation.
    pub async fn invalidate(&self, key: QueryKey) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Invalidate { key, resp }).await?
    }

    /// Cancels in-flight fetches, snapshots `key` and installs `apply(snapshot)`
    /// in one step of the cache loop. Returns the rollback snapshot.
    pub async fn begin_mutation(
        &self,
        key: QueryKey,
        apply: OptimisticFn,
    ) -> Result<Option<CacheEntry>, RuntimeError> {
        self.request(|resp| Command::BeginMutation { key, apply, resp })
            .await?
    }

    /// Replaces the optimistic value with `confirmed`; `None` removes the entry.
    pub async fn commit(&self, key: QueryKey, confirmed: Option<Value>) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Commit {
            key,
            confirmed,
            resp,
        })
        .await?
    }

    /// Restores `snapshot` after a failed mutation.
    pub async fn rollback(
        &self,
        key: QueryKey,
        snapshot: Option<CacheEntry>,
    ) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Rollback {
            key,
            snapshot,
            resp,
        })
        .await?
    }

    /// Ticket for a fetch started now.
    pub async fn begin_fetch(&self, key: QueryKey) -> Result<FetchTicket, RuntimeError> {
        self.request(|resp| Command::BeginFetch { key, resp }).await
    }

    /// Stores a fetch result; returns false when it was discarded as stale.
    pub async fn complete_fetch(&self, ticket: FetchTicket, value: Value) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::CompleteFetch {
            ticket,
            value,
            resp,
        })
        .await?
    }

    /// Waits until every queued op is durable; returns the last durable seq.
    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        self.request(|resp| Command::Flush { resp }).await?
    }

    /// Writes a snapshot of confirmed entries.
    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Checkpoint { resp }).await?
    }

    /// Delivers pending ops and stops the runtime.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }
}

async fn handle_command(cmd: Command, state: &mut LoopState) -> bool {
    match cmd {
        Command::Read { key, resp } => {
            let _ = resp.send(state.store.get_cloned(&key));
        }
        Command::Inspect { key, resp } => {
            let status = KeyStatus {
                entry: state.store.get_cloned(&key),
                optimistic: state.store.is_optimistic(&key),
                generation: state.store.generation(&key),
                invalidations: state.store.invalidation_count(&key),
            };
            let _ = resp.send(status);
        }
        Command::Write { key, value, resp } => {
            let res = state
                .store
                .write(key, value)
                .map_err(RuntimeError::from)
                .and_then(|stored| {
                    let version = written_version(&stored);
                    state.publish()?;
                    Ok(version)
                });
            let _ = resp.send(res);
        }
        Command::Remove { key, resp } => {
            let res = state
                .store
                .remove(&key)
                .map_err(RuntimeError::from)
                .and_then(|stored| {
                    let removed = stored.is_some();
                    state.publish()?;
                    Ok(removed)
                });
            let _ = resp.send(res);
        }
        Command::Invalidate { key, resp } => {
            state.store.invalidate(&key);
            tracing::debug!(key = %key, "cache entry invalidated");
            let res = state.publish_confirmed().await;
            let _ = resp.send(res);
        }
        Command::BeginMutation { key, apply, resp } => {
            let res = begin_mutation(&mut state.store, key.clone(), apply);
            if res.is_ok() {
                tracing::debug!(key = %key, "optimistic value applied");
                let _ = state.events_tx.send(CacheEvent::OptimisticApplied { key });
            }
            let _ = resp.send(res);
        }
        Command::Commit {
            key,
            confirmed,
            resp,
        } => {
            let res = match state.store.commit(key.clone(), confirmed) {
                Ok(_) => {
                    let _ = state.events_tx.send(CacheEvent::Committed { key });
                    state.publish_confirmed().await
                }
                Err(err) => Err(err.into()),
            };
            let _ = resp.send(res);
        }
        Command::Rollback {
            key,
            snapshot,
            resp,
        } => {
            let res = match state.store.rollback(key.clone(), snapshot) {
                Ok(_) => {
                    let _ = state.events_tx.send(CacheEvent::RolledBack { key });
                    state.publish_confirmed().await
                }
                Err(err) => Err(err.into()),
            };
            let _ = resp.send(res);
        }
        Command::BeginFetch { key, resp } => {
            let _ = resp.send(state.store.begin_fetch(key));
        }
        Command::CompleteFetch {
            ticket,
            value,
            resp,
        } => {
            let key = ticket.key.clone();
            let res = match state.store.complete_fetch(ticket, value) {
                Some(_) => state.publish().map(|_| true),
                None => {
                    tracing::warn!(key = %key, "stale fetch result discarded");
                    let _ = state.events_tx.send(CacheEvent::FetchDiscarded { key });
                    Ok(false)
                }
            };
            let _ = resp.send(res);
        }
        Command::Flush { resp } => {
            let out = if let Err(err) = state.deliver_backlog().await {
                Err(err)
            } else if let Some(tx) = state.persist_tx.as_ref() {
                let (flush_tx, flush_rx) = oneshot::channel();
                if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    flush_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(state.store.latest_op_seq())
            };
            let _ = resp.send(out);
        }
        Command::Checkpoint { resp } => {
            let out = state.checkpoint().await;
            let _ = resp.send(out);
        }
        Command::Shutdown { resp } => {
            if let Err(err) = state.deliver_backlog().await {
                tracing::error!(error = %err, backlog = state.backlog.len(), "journal backlog lost at shutdown");
            }
            let out = if let Some(tx) = state.persist_tx.as_ref() {
                let (done_tx, done_rx) = oneshot::channel();
                if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    done_rx.await.map_err(|_| RuntimeError::ChannelClosed)
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
            return true;
        }
    }

    state.maybe_auto_checkpoint().await;
    false
}

fn begin_mutation(
    store: &mut CacheStore,
    key: QueryKey,
    apply: OptimisticFn,
) -> Result<Option<CacheEntry>, RuntimeError> {
    if store.is_optimistic(&key) {
        return Err(StoreError::OptimisticInEffect(key).into());
    }
    let next = apply(store.get(&key).map(|entry| &entry.value)).map_err(RuntimeError::Transform)?;
    Ok(store.begin_optimistic(key, next)?)
}

fn written_version(stored: &StoredOp) -> Version {
    match &stored.op {
        CacheOp::Write { version, .. } => *version,
        _ => 0,
    }
}

impl LoopState {
    /// Emits events for freshly journaled ops and queues them for the sink.
    ///
    /// Ops the bounded queue cannot take stay in the backlog, in order, and
    /// go out ahead of the next batch. The error only reports the pressure.
    fn publish(&mut self) -> Result<(), RuntimeError> {
        if !self.announce() {
            return Ok(());
        }
        let Some(tx) = self.persist_tx.as_ref() else {
            return Ok(());
        };
        while let Some(stored) = self.backlog.pop_front() {
            match tx.try_send(PersistMsg::Op(stored)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(PersistMsg::Op(stored))) => {
                    self.backlog.push_front(stored);
                    tracing::warn!(backlog = self.backlog.len(), "persist queue full; journal ops deferred");
                    return Err(PersistError::Message(format!(
                        "persist queue full, {} ops deferred",
                        self.backlog.len()
                    ))
                    .into());
                }
                Err(_) => return Err(RuntimeError::ChannelClosed),
            }
        }
        Ok(())
    }

    /// Like [`LoopState::publish`], but waits for queue room so commits,
    /// rollbacks and invalidations reach the journal before the caller resumes.
    async fn publish_confirmed(&mut self) -> Result<(), RuntimeError> {
        if !self.announce() {
            return Ok(());
        }
        self.deliver_backlog().await
    }

    async fn deliver_backlog(&mut self) -> Result<(), RuntimeError> {
        let Some(tx) = self.persist_tx.as_ref() else {
            return Ok(());
        };
        while let Some(stored) = self.backlog.pop_front() {
            if let Err(mpsc::error::SendError(PersistMsg::Op(stored))) =
                tx.send(PersistMsg::Op(stored)).await
            {
                self.backlog.push_front(stored);
                return Err(RuntimeError::ChannelClosed);
            }
        }
        Ok(())
    }

    /// Broadcasts events for pending ops and moves them to the backlog.
    /// Returns false when there is no sink behind the runtime.
    fn announce(&mut self) -> bool {
        let ops = self.store.drain_pending_ops();
        for stored in &ops {
            let event = match &stored.op {
                CacheOp::Write { key, version, .. } => CacheEvent::Written {
                    key: key.clone(),
                    version: *version,
                },
                CacheOp::Remove { key } => CacheEvent::Removed { key: key.clone() },
                CacheOp::Invalidate { key } => CacheEvent::Invalidated { key: key.clone() },
            };
            let _ = self.events_tx.send(event);
        }
        self.ops_since_snapshot += ops.len();

        if self.persist_tx.is_none() {
            let _ = self.events_tx.send(CacheEvent::DurableUpTo {
                op_seq: self.store.latest_op_seq(),
            });
            return false;
        }
        self.backlog.extend(ops);
        true
    }

    async fn checkpoint(&mut self) -> Result<(), RuntimeError> {
        self.deliver_backlog().await?;
        let Some(tx) = self.persist_tx.as_ref() else {
            return Ok(());
        };
        let snapshot = self.store.export_snapshot();
        let last_seq = self.store.latest_op_seq();
        let (cp_tx, cp_rx) = oneshot::channel();
        tx.send(PersistMsg::Checkpoint {
            snapshot,
            last_seq,
            compact: self.config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .map_err(|_| RuntimeError::ChannelClosed)?;
        cp_rx.await.map_err(|_| RuntimeError::ChannelClosed)??;
        self.ops_since_snapshot = 0;
        Ok(())
    }

    async fn maybe_auto_checkpoint(&mut self) {
        if self.config.snapshot_every_ops == 0
            || self.ops_since_snapshot < self.config.snapshot_every_ops
        {
            return;
        }
        if let Err(err) = self.checkpoint().await {
            tracing::error!(error = %err, "automatic cache checkpoint failed");
        }
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn OpSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredOp>::new();
        let latency = Duration::from_millis(config.batch_max_latency_ms);
        let mut deadline = Instant::now() + latency;
        let mut last_durable: OpSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Op(stored) => {
                            let is_write = matches!(stored.op, CacheOp::Write { .. });
                            buf.push(stored);

                            if buf.len() >= config.batch_max_ops || (config.flush_on_write && is_write) {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + latency;
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let result = match flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await {
                                Err(err) => Err(err),
                                Ok(()) => {
                                    let sink_ref = Arc::clone(&sink);
                                    match tokio::task::spawn_blocking(move || {
                                        let mut sink = sink_ref.blocking_lock();
                                        sink.write_snapshot(&snapshot, last_seq)?;
                                        if compact {
                                            sink.compact_through(last_seq)?;
                                        }
                                        Result::<(), PersistError>::Ok(())
                                    }).await {
                                        Ok(inner) => inner,
                                        Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
                                    }
                                }
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + latency;
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn OpSink>>>,
    buf: &mut Vec<StoredOp>,
    last_durable: &mut OpSeq,
    durable_tx: &mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let ops = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let append_res: Result<OpSeq, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let seq = sink.append_ops(&ops)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match append_res {
        Ok(seq) => {
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            let _ = durable_tx.send(Err(PersistError::Message(format!("append failed: {err}"))));
            Err(err)
        }
    }
}
