//! Integration tests for the full propagation pipeline.
//!
//! Tests: Producer → EventLog → Consumer → Dispatcher → CacheSynchronizer → CacheStore
//!
//! Verifies ordering, idempotence, error classification, cursor handling,
//! and cooperative shutdown against the in-memory stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tokio::sync::Semaphore;

use shopsync_core::ProductId;
use shopsync_events::{Dispatcher, EventKind, ProductEvent, ProductEventHandler};

use crate::cache::{CacheStore, InMemoryCacheStore};
use crate::cursor::{CursorStore, InMemoryCursorStore};
use crate::log_store::{EventLog, InMemoryEventLog, LogError};
use crate::producer::Producer;
use crate::synchronizer::CacheSynchronizer;
use crate::workers::{Consumer, ConsumerHandle, ConsumerOptions};

const STREAM: &str = "sync:products";

fn fast_options() -> ConsumerOptions {
    ConsumerOptions {
        batch_size: 10,
        block: Duration::from_millis(50),
        read_timeout: Duration::from_millis(100),
        backoff: Duration::from_millis(20),
        heartbeat: Duration::from_secs(60),
    }
}

fn spawn_synchronizing_consumer(
    log: Arc<InMemoryEventLog>,
    cache: Arc<InMemoryCacheStore>,
    cursors: Arc<InMemoryCursorStore>,
) -> ConsumerHandle {
    let synchronizer = CacheSynchronizer::new(cache);
    Consumer::new(log, Dispatcher::new(synchronizer), cursors, STREAM)
        .with_options(fast_options())
        .spawn()
}

async fn wait_until(mut condition: impl AsyncFnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn product(id: &str) -> ProductId {
    ProductId::new(id).unwrap()
}

/// Handler that records dispatch order for assertions.
#[derive(Default)]
struct RecordingHandler {
    applied: Mutex<Vec<(EventKind, String)>>,
}

impl RecordingHandler {
    fn applied(&self) -> Vec<(EventKind, String)> {
        self.applied.lock().unwrap().clone()
    }

    fn count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }
}

#[async_trait]
impl ProductEventHandler for RecordingHandler {
    type Error = String;

    async fn on_create(
        &self,
        product_id: &ProductId,
        _snapshot: &JsonValue,
    ) -> Result<(), Self::Error> {
        self.applied
            .lock()
            .unwrap()
            .push((EventKind::Create, product_id.to_string()));
        Ok(())
    }

    async fn on_update(
        &self,
        product_id: &ProductId,
        _snapshot: &JsonValue,
    ) -> Result<(), Self::Error> {
        self.applied
            .lock()
            .unwrap()
            .push((EventKind::Update, product_id.to_string()));
        Ok(())
    }

    async fn on_delete(&self, product_id: &ProductId) -> Result<(), Self::Error> {
        self.applied
            .lock()
            .unwrap()
            .push((EventKind::Delete, product_id.to_string()));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn create_update_delete_leaves_the_key_absent() {
    let log = Arc::new(InMemoryEventLog::new());
    let cache = Arc::new(InMemoryCacheStore::new());
    let cursors = Arc::new(InMemoryCursorStore::new());
    let handle = spawn_synchronizing_consumer(log.clone(), cache.clone(), cursors);

    let (producer, producer_handle) = Producer::spawn(log.clone(), STREAM, 16);
    producer.publish_create(product("42"), json!({"name": "Widget"}));
    producer.publish_update(product("42"), json!({"name": "Widget Pro"}));

    let snapshot_cache = cache.clone();
    wait_until(async || {
        snapshot_cache.get("entity:42").await.unwrap()
            == Some(r#"{"name":"Widget Pro"}"#.to_owned())
    })
    .await;

    producer.publish_delete(product("42"));
    drop(producer);
    producer_handle.join().await;

    let absent_cache = cache.clone();
    wait_until(async || absent_cache.get("entity:42").await.unwrap().is_none()).await;

    handle.shutdown().await;
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn entries_dispatch_in_ascending_id_order() {
    let log = Arc::new(InMemoryEventLog::new());
    let handler = Arc::new(RecordingHandler::default());
    let cursors = Arc::new(InMemoryCursorStore::new());

    // All five entries are in the log before the consumer starts, so they
    // arrive in a single batch.
    for i in 1..=5 {
        log.append(STREAM, &ProductEvent::create(product(&i.to_string()), json!({})))
            .await
            .unwrap();
    }

    let handle = Consumer::new(log, Dispatcher::new(handler.clone()), cursors, STREAM)
        .with_options(fast_options())
        .spawn();

    let recorded = handler.clone();
    wait_until(async || recorded.count() == 5).await;
    handle.shutdown().await;

    let applied: Vec<String> = handler.applied().into_iter().map(|(_, id)| id).collect();
    assert_eq!(applied, vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test(start_paused = true)]
async fn replaying_the_stream_twice_yields_identical_cache_state() {
    let log = Arc::new(InMemoryEventLog::new());
    let cache = Arc::new(InMemoryCacheStore::new());

    log.append(STREAM, &ProductEvent::create(product("1"), json!({"name": "A"})))
        .await
        .unwrap();
    log.append(STREAM, &ProductEvent::update(product("1"), json!({"name": "A2"})))
        .await
        .unwrap();
    log.append(STREAM, &ProductEvent::create(product("2"), json!({"name": "B"})))
        .await
        .unwrap();
    log.append(STREAM, &ProductEvent::delete(product("2")))
        .await
        .unwrap();

    let first_pass = cache.clone();
    let handle =
        spawn_synchronizing_consumer(log.clone(), cache.clone(), Arc::new(InMemoryCursorStore::new()));
    wait_until(async || first_pass.get("entity:1").await.unwrap().is_some()).await;
    handle.shutdown().await;
    let after_once = cache.snapshot();

    // Fresh cursor store: the second consumer replays from the beginning.
    // A batch is applied in full before the next read is issued, so two
    // more read calls mean the replayed batch has landed.
    let reads_before = log.read_calls();
    let handle =
        spawn_synchronizing_consumer(log.clone(), cache.clone(), Arc::new(InMemoryCursorStore::new()));
    let polled = log.clone();
    wait_until(async || polled.read_calls() >= reads_before + 2).await;
    handle.shutdown().await;

    assert_eq!(cache.snapshot(), after_once);
    assert_eq!(after_once.get("entity:1").cloned(), Some(r#"{"name":"A2"}"#.to_owned()));
    assert!(!after_once.contains_key("entity:2"));
}

#[tokio::test(start_paused = true)]
async fn unknown_kind_is_ignored_and_the_loop_continues() {
    let log = Arc::new(InMemoryEventLog::new());
    let cache = Arc::new(InMemoryCacheStore::new());
    let cursors = Arc::new(InMemoryCursorStore::new());

    let mut fields = HashMap::new();
    fields.insert(
        "event".to_owned(),
        r#"{"type":"archive","productId":"9","timestamp":"2024-05-01T00:00:00Z"}"#.to_owned(),
    );
    let unknown_id = log.append_raw_fields(STREAM, fields);
    log.append(STREAM, &ProductEvent::create(product("10"), json!({"name": "After"})))
        .await
        .unwrap();

    let handle = spawn_synchronizing_consumer(log.clone(), cache.clone(), cursors.clone());

    let applied_cache = cache.clone();
    wait_until(async || applied_cache.get("entity:10").await.unwrap().is_some()).await;
    handle.shutdown().await;

    // The unknown entry changed nothing, but its id was consumed.
    assert_eq!(cache.len(), 1);
    let cursor = cursors.load(STREAM).await.unwrap().unwrap();
    assert!(cursor > unknown_id);
}

#[tokio::test(start_paused = true)]
async fn undecodable_entries_are_skipped_and_the_cursor_advances() {
    let log = Arc::new(InMemoryEventLog::new());
    let cache = Arc::new(InMemoryCacheStore::new());
    let cursors = Arc::new(InMemoryCursorStore::new());

    // Entry with no "event" field, then one with malformed JSON.
    log.append_raw_fields(STREAM, HashMap::new());
    let mut fields = HashMap::new();
    fields.insert("event".to_owned(), "{not json".to_owned());
    log.append_raw_fields(STREAM, fields);
    log.append(STREAM, &ProductEvent::create(product("11"), json!({"name": "Valid"})))
        .await
        .unwrap();

    let handle = spawn_synchronizing_consumer(log.clone(), cache.clone(), cursors);

    let applied_cache = cache.clone();
    wait_until(async || applied_cache.get("entity:11").await.unwrap().is_some()).await;
    handle.shutdown().await;
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_reads_never_advance_the_cursor() {
    let log = Arc::new(InMemoryEventLog::new());
    let cache = Arc::new(InMemoryCacheStore::new());
    let cursors = Arc::new(InMemoryCursorStore::new());
    let handle = spawn_synchronizing_consumer(log.clone(), cache.clone(), cursors.clone());

    let polled = log.clone();
    wait_until(async || polled.read_calls() >= 3).await;
    handle.shutdown().await;

    assert_eq!(cursors.load(STREAM).await.unwrap(), None);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn transport_errors_back_off_and_the_loop_recovers() {
    let log = Arc::new(InMemoryEventLog::new());
    let cache = Arc::new(InMemoryCacheStore::new());
    let cursors = Arc::new(InMemoryCursorStore::new());

    log.fail_next_read(LogError::Transport("connection reset".into()));
    log.append(STREAM, &ProductEvent::create(product("12"), json!({"name": "Recovered"})))
        .await
        .unwrap();

    let handle = spawn_synchronizing_consumer(log.clone(), cache.clone(), cursors);

    let applied_cache = cache.clone();
    wait_until(async || applied_cache.get("entity:12").await.unwrap().is_some()).await;
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn closed_log_stops_the_loop() {
    let log = Arc::new(InMemoryEventLog::new());
    let cache = Arc::new(InMemoryCacheStore::new());
    let handle =
        spawn_synchronizing_consumer(log.clone(), cache, Arc::new(InMemoryCursorStore::new()));

    let polled = log.clone();
    wait_until(async || polled.read_calls() >= 1).await;
    log.close();

    // The loop exits on its own, without a shutdown signal.
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("consumer did not stop after the log closed");
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_idle_issues_no_further_reads() {
    let log = Arc::new(InMemoryEventLog::new());
    let cache = Arc::new(InMemoryCacheStore::new());
    let options = ConsumerOptions {
        block: Duration::from_secs(5),
        read_timeout: Duration::from_secs(6),
        heartbeat: Duration::from_secs(60),
        ..fast_options()
    };
    let synchronizer = CacheSynchronizer::new(cache);
    let handle = Consumer::new(
        log.clone(),
        Dispatcher::new(synchronizer),
        Arc::new(InMemoryCursorStore::new()),
        STREAM,
    )
    .with_options(options)
    .spawn();

    let polled = log.clone();
    wait_until(async || polled.read_calls() >= 1).await;

    handle.shutdown().await;
    let reads_at_shutdown = log.read_calls();

    // Long after the heartbeat would have fired, still no new reads.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(log.read_calls(), reads_at_shutdown);
}

/// Handler whose applies park until released; exposes how many completed.
struct GatedHandler {
    gate: Semaphore,
    completed: AtomicUsize,
}

#[async_trait]
impl ProductEventHandler for GatedHandler {
    type Error = String;

    async fn on_create(
        &self,
        _product_id: &ProductId,
        _snapshot: &JsonValue,
    ) -> Result<(), Self::Error> {
        let permit = self.gate.acquire().await;
        drop(permit);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_update(
        &self,
        _product_id: &ProductId,
        _snapshot: &JsonValue,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn on_delete(&self, _product_id: &ProductId) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn an_inflight_batch_finishes_before_shutdown() {
    let log = Arc::new(InMemoryEventLog::new());
    for i in 1..=3 {
        log.append(STREAM, &ProductEvent::create(product(&i.to_string()), json!({})))
            .await
            .unwrap();
    }

    let handler = Arc::new(GatedHandler {
        gate: Semaphore::new(0),
        completed: AtomicUsize::new(0),
    });
    let handle = Consumer::new(
        log.clone(),
        Dispatcher::new(handler.clone()),
        Arc::new(InMemoryCursorStore::new()),
        STREAM,
    )
    .with_options(fast_options())
    .spawn();

    // Wait until the batch is being dispatched (first apply is parked).
    let parked = log.clone();
    wait_until(async || parked.read_calls() >= 1).await;
    tokio::task::yield_now().await;

    // Shutdown fires mid-batch; the whole batch must still apply.
    handle.trigger_shutdown();
    handler.gate.add_permits(16);

    let done = handler.clone();
    wait_until(async || done.completed.load(Ordering::SeqCst) == 3).await;
}

#[tokio::test(start_paused = true)]
async fn persisted_cursor_resumes_after_restart() {
    let log = Arc::new(InMemoryEventLog::new());
    let cursors = Arc::new(InMemoryCursorStore::new());

    log.append(STREAM, &ProductEvent::create(product("1"), json!({})))
        .await
        .unwrap();
    log.append(STREAM, &ProductEvent::create(product("2"), json!({})))
        .await
        .unwrap();

    let first = Arc::new(RecordingHandler::default());
    let handle = Consumer::new(
        log.clone(),
        Dispatcher::new(first.clone()),
        cursors.clone(),
        STREAM,
    )
    .with_options(fast_options())
    .spawn();
    let recorded = first.clone();
    wait_until(async || recorded.count() == 2).await;
    handle.shutdown().await;

    log.append(STREAM, &ProductEvent::create(product("3"), json!({})))
        .await
        .unwrap();
    log.append(STREAM, &ProductEvent::delete(product("1")))
        .await
        .unwrap();

    // Same cursor store: the restarted consumer must not re-apply 1 and 2.
    let second = Arc::new(RecordingHandler::default());
    let handle = Consumer::new(
        log.clone(),
        Dispatcher::new(second.clone()),
        cursors,
        STREAM,
    )
    .with_options(fast_options())
    .spawn();
    let recorded = second.clone();
    wait_until(async || recorded.count() == 2).await;
    handle.shutdown().await;

    assert_eq!(
        second.applied(),
        vec![
            (EventKind::Create, "3".to_owned()),
            (EventKind::Delete, "1".to_owned()),
        ]
    );
}

mod last_write_wins {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Create(String),
        Update(String),
        Delete,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            "[a-z]{1,8}".prop_map(Op::Create),
            "[a-z]{1,8}".prop_map(Op::Update),
            Just(Op::Delete),
        ]
    }

    fn expected_state(ops: &[Op]) -> Option<String> {
        let mut state = None;
        for op in ops {
            state = match op {
                Op::Create(name) | Op::Update(name) => {
                    Some(json!({"name": name}).to_string())
                }
                Op::Delete => None,
            };
        }
        state
    }

    async fn apply_all(
        sync: &CacheSynchronizer<Arc<InMemoryCacheStore>>,
        id: &ProductId,
        ops: &[Op],
    ) {
        for op in ops {
            match op {
                Op::Create(name) => sync.on_create(id, &json!({"name": name})).await.unwrap(),
                Op::Update(name) => sync.on_update(id, &json!({"name": name})).await.unwrap(),
                Op::Delete => sync.on_delete(id).await.unwrap(),
            }
        }
    }

    proptest! {
        /// Applying an ordered per-subject sequence equals applying only
        /// its final effective operation, and replaying the sequence is a
        /// no-op.
        #[test]
        fn ordered_apply_equals_last_write(ops in proptest::collection::vec(op_strategy(), 1..20)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();

            runtime.block_on(async {
                let sync = CacheSynchronizer::new(Arc::new(InMemoryCacheStore::new()));
                let id = ProductId::new("42").unwrap();

                apply_all(&sync, &id, &ops).await;
                let once = sync.cache().get("entity:42").await.unwrap();
                prop_assert_eq!(&once, &expected_state(&ops));

                apply_all(&sync, &id, &ops).await;
                let twice = sync.cache().get("entity:42").await.unwrap();
                prop_assert_eq!(&twice, &once);
                Ok(())
            })?;
        }
    }
}
