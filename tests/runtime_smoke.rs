use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::{Value, json};

use optiq::{
    core::store::CacheStore,
    op::{CacheOp, StoredOp},
    persist::{OpSink, PersistResult},
    runtime::{
        events::CacheEvent,
        handle::{CacheHandle, OptimisticFn, RuntimeConfig, RuntimeError, spawn_cache},
    },
    types::{OpSeq, QueryKey},
};

struct SlowSink {
    seen: Arc<Mutex<Vec<StoredOp>>>,
    delay: Duration,
}

impl OpSink for SlowSink {
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        std::thread::sleep(self.delay);
        let mut seen = self.seen.lock().expect("lock");
        seen.extend_from_slice(ops);
        Ok(ops.last().map(|o| o.seq).unwrap_or(0))
    }
}

fn set_to(value: Value) -> OptimisticFn {
    Box::new(move |_: Option<&Value>| Ok(Some(value)))
}

async fn next_events(sub: &mut tokio::sync::broadcast::Receiver<CacheEvent>, n: usize) -> Vec<CacheEvent> {
    let mut seen = Vec::new();
    while seen.len() < n {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if !matches!(evt, CacheEvent::DurableUpTo { .. }) {
            seen.push(evt);
        }
    }
    seen
}

async fn seeded(key: &QueryKey) -> CacheHandle {
    let handle = spawn_cache(CacheStore::new(), None, RuntimeConfig::default());
    handle.write(key.clone(), json!({"name": "Alice"})).await.expect("write");
    handle
}

#[tokio::test]
async fn mutation_lifecycle_events_are_ordered() {
    let key = QueryKey::new("userProfile").with(1u64);
    let handle = seeded(&key).await;
    let mut sub = handle.subscribe();

    let snapshot = handle
        .begin_mutation(key.clone(), set_to(json!({"name": "Bob"})))
        .await
        .expect("begin");
    assert_eq!(snapshot.expect("snapshot").value["name"], "Alice");
    handle
        .commit(key.clone(), Some(json!({"name": "Bob", "updatedAt": 7})))
        .await
        .expect("commit");
    handle.invalidate(key.clone()).await.expect("invalidate");

    let seen = next_events(&mut sub, 4).await;
    assert_eq!(seen[0], CacheEvent::OptimisticApplied { key: key.clone() });
    assert_eq!(seen[1], CacheEvent::Committed { key: key.clone() });
    assert!(matches!(&seen[2], CacheEvent::Written { key: k, .. } if *k == key));
    assert_eq!(seen[3], CacheEvent::Invalidated { key: key.clone() });

    let status = handle.inspect(key).await.expect("inspect");
    assert!(!status.optimistic);
    assert!(status.entry.expect("entry").stale);
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn rollback_emits_event_and_restores_value() {
    let key = QueryKey::new("userProfile").with(1u64);
    let handle = seeded(&key).await;
    let mut sub = handle.subscribe();

    let snapshot = handle
        .begin_mutation(key.clone(), set_to(json!({"name": "Bob"})))
        .await
        .expect("begin");
    handle.rollback(key.clone(), snapshot).await.expect("rollback");

    let seen = next_events(&mut sub, 2).await;
    assert_eq!(seen[1], CacheEvent::RolledBack { key: key.clone() });
    let entry = handle.read(key).await.expect("read").expect("entry");
    assert_eq!(entry.value["name"], "Alice");
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn transform_error_leaves_cache_untouched() {
    let key = QueryKey::new("users");
    let handle = seeded(&key).await;

    let err = handle
        .begin_mutation(key.clone(), Box::new(|_: Option<&Value>| Err("bad shape".to_string())))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Transform(msg) if msg == "bad shape"));
    assert!(!handle.inspect(key).await.expect("inspect").optimistic);
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn stale_fetch_is_discarded_with_event() {
    let key = QueryKey::new("users");
    let handle = seeded(&key).await;
    let mut sub = handle.subscribe();

    let ticket = handle.begin_fetch(key.clone()).await.expect("ticket");
    let snapshot = handle
        .begin_mutation(key.clone(), set_to(json!(["optimistic"])))
        .await
        .expect("begin");
    assert!(!handle.complete_fetch(ticket, json!(["stale"])).await.expect("complete"));
    handle.rollback(key.clone(), snapshot).await.expect("rollback");

    let seen = next_events(&mut sub, 2).await;
    assert_eq!(seen[1], CacheEvent::FetchDiscarded { key: key.clone() });
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn durable_event_advances_and_slow_sink_surfaces_queue_pressure() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = SlowSink {
        seen: Arc::clone(&seen),
        delay: Duration::from_millis(250),
    };

    let cfg = RuntimeConfig {
        flush_on_write: true,
        batch_max_ops: 16,
        batch_max_latency_ms: 500,
        persist_queue_bound: 1,
        snapshot_every_ops: 0,
        compact_after_snapshot: false,
    };

    let handle = spawn_cache(CacheStore::new(), Some(Box::new(sink)), cfg);
    let mut sub = handle.subscribe();

    let version = handle
        .write(QueryKey::new("users"), json!([]))
        .await
        .expect("write");
    assert_eq!(version, 1);

    let mut durable_seen = false;
    for _ in 0..5 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("recv timeout")
            .expect("recv");
        if matches!(evt, CacheEvent::DurableUpTo { .. }) {
            durable_seen = true;
            break;
        }
    }
    assert!(durable_seen, "expected DurableUpTo event");

    let mut queue_error_seen = false;
    for i in 0..12u64 {
        let r = handle.write(QueryKey::new("userProfile").with(i), json!({"id": i})).await;
        if let Err(RuntimeError::Persist(_)) = r {
            queue_error_seen = true;
            break;
        }
    }
    assert!(queue_error_seen, "expected persistence queue pressure to surface as error");

    handle.shutdown().await.expect("shutdown");
    assert!(!seen.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn confirmed_ops_reach_journal_despite_queue_pressure() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = SlowSink {
        seen: Arc::clone(&seen),
        delay: Duration::from_millis(50),
    };
    let cfg = RuntimeConfig {
        flush_on_write: true,
        batch_max_ops: 16,
        batch_max_latency_ms: 500,
        persist_queue_bound: 1,
        snapshot_every_ops: 0,
        compact_after_snapshot: false,
    };
    let handle = spawn_cache(CacheStore::new(), Some(Box::new(sink)), cfg);

    for i in 0..3u64 {
        // A full queue defers the op; the write itself still lands.
        let _ = handle.write(QueryKey::new("filler").with(i), json!(i)).await;
    }

    let key = QueryKey::new("userProfile").with(1u64);
    handle
        .begin_mutation(key.clone(), set_to(json!({"name": "Bob"})))
        .await
        .expect("begin");
    handle
        .commit(key.clone(), Some(json!({"name": "Bob", "updatedAt": 7})))
        .await
        .expect("commit waits for queue room");
    handle.invalidate(key.clone()).await.expect("settle");
    handle.shutdown().await.expect("shutdown");

    let journal = seen.lock().expect("lock");
    let seqs: Vec<u64> = journal.iter().map(|op| op.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5], "every op journaled once, in order");

    let for_key: Vec<&CacheOp> = journal
        .iter()
        .map(|stored| &stored.op)
        .filter(|op| op.key() == &key)
        .collect();
    assert_eq!(
        for_key,
        vec![
            &CacheOp::Write {
                key: key.clone(),
                value: json!({"name": "Bob", "updatedAt": 7}),
                version: 5,
            },
            &CacheOp::Invalidate { key: key.clone() },
        ]
    );
}
