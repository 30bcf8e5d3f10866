use std::sync::Arc;
use std::time::Duration;

use keel_primitives::{ManualClock, TargetKey};
use keel_transport::mock::{MockReply, MockTransport};
use keel_transport::{RequestDeduplicator, RequestOptions, RetryingClient};
use serde_json::{Value, json};
use tokio::sync::broadcast;

use super::*;
use crate::{ConnectivityMonitor, MemoryStorage, Storage};

const BATCH_PATH: &str = "/api/content/batch";

struct Harness {
	queue: LocalChangeQueue,
	transport: MockTransport,
	storage: Arc<MemoryStorage>,
	connectivity: Arc<ConnectivityMonitor>,
}

fn harness(config: QueueConfig, online: bool) -> Harness {
	let transport = MockTransport::default();
	let storage = Arc::new(MemoryStorage::new());
	let connectivity = Arc::new(ConnectivityMonitor::new(online));
	let client = RetryingClient::new(
		Arc::new(transport.clone()),
		RequestOptions {
			timeout: Duration::from_secs(1),
			retries: 0,
			retry_delay: Duration::from_millis(10),
		},
	);
	let queue = LocalChangeQueue::new(
		config,
		QueueParts {
			client,
			dedup: RequestDeduplicator::new(),
			storage: storage.clone(),
			connectivity: connectivity.clone(),
			clock: Arc::new(ManualClock::default()),
		},
	);
	Harness {
		queue,
		transport,
		storage,
		connectivity,
	}
}

fn config() -> QueueConfig {
	QueueConfig {
		batch_path: BATCH_PATH.to_string(),
		..QueueConfig::default()
	}
}

fn edit(target: &str, value: Value, previous: Value) -> NewChange {
	NewChange::update(target, value, Some(previous))
}

fn epoch() -> chrono::DateTime<chrono::Utc> {
	chrono::DateTime::<chrono::Utc>::UNIX_EPOCH
}

fn drain(rx: &mut broadcast::Receiver<QueueEvent>) -> Vec<QueueEvent> {
	let mut events = Vec::new();
	while let Ok(event) = rx.try_recv() {
		events.push(event);
	}
	events
}

fn sent_operations(transport: &MockTransport) -> Vec<Vec<keel_primitives::EditOperation>> {
	transport
		.requests_to(BATCH_PATH)
		.iter()
		.map(|r| r.json::<BatchPayload>().unwrap().operations)
		.collect()
}

fn persisted(storage: &MemoryStorage) -> Vec<QueuedChange> {
	let bytes = storage.read("keel-change-queue").unwrap().unwrap();
	serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test(start_paused = true)]
async fn repeated_edits_to_one_target_coalesce() {
	let h = harness(config(), false);

	let first = h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();
	let second = h.queue.add(edit("t1", json!("v2"), json!("v1"))).unwrap();

	assert!(matches!(first, AddOutcome::Queued { .. }));
	assert_eq!(
		second,
		AddOutcome::Coalesced {
			id: second.id().to_string(),
			replaced: first.id().to_string()
		}
	);
	let entries = h.queue.pending();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].payload, json!("v2"));
	assert_eq!(entries[0].previous_value, Some(json!("v0")));
	assert_eq!(entries[0].status, ChangeStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn coalescing_keeps_absent_first_previous_value() {
	let h = harness(config(), false);

	h.queue.add(NewChange::update("t1", json!("v1"), None)).unwrap();
	h.queue.add(edit("t1", json!("v2"), json!("v1"))).unwrap();

	let entries = h.queue.pending();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].payload, json!("v2"));
	assert_eq!(entries[0].previous_value, None);
	assert_eq!(persisted(&h.storage)[0].previous_value, None);
}

#[tokio::test(start_paused = true)]
async fn distinct_targets_keep_insertion_order() {
	let h = harness(config(), false);
	for target in ["a", "b", "c"] {
		h.queue.add(edit(target, json!(1), json!(0))).unwrap();
	}
	h.queue.add(edit("a", json!(2), json!(1))).unwrap();

	let targets: Vec<_> = h.queue.pending().into_iter().map(|c| c.target_key).collect();
	assert_eq!(targets, [TargetKey::from("a"), TargetKey::from("b"), TargetKey::from("c")]);
}

#[tokio::test(start_paused = true)]
async fn every_mutation_is_persisted() {
	let h = harness(config(), false);

	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();
	assert_eq!(persisted(&h.storage).len(), 1);

	h.queue.add(edit("t2", json!("x"), json!(null))).unwrap();
	assert_eq!(persisted(&h.storage).len(), 2);

	h.queue.clear().unwrap();
	assert!(persisted(&h.storage).is_empty());
}

#[tokio::test(start_paused = true)]
async fn full_queue_rejects_new_targets() {
	let h = harness(config(), false);
	for i in 0..1000 {
		h.queue.add(edit(&format!("t{i}"), json!(i), json!(null))).unwrap();
	}
	let mut events = h.queue.subscribe();

	let err = h.queue.add(edit("t1000", json!(1000), json!(null))).unwrap_err();

	assert!(matches!(err, QueueError::Full { capacity: 1000 }));
	assert_eq!(h.queue.len(), 1000);
	assert_eq!(
		drain(&mut events),
		[QueueEvent::QueueFull {
			target_key: TargetKey::from("t1000"),
			capacity: 1000
		}]
	);

	// Coalescing does not grow the queue and is still accepted.
	let outcome = h.queue.add(edit("t5", json!("again"), json!(5))).unwrap();
	assert!(outcome.is_coalesced());
	assert_eq!(h.queue.len(), 1000);
}

#[tokio::test(start_paused = true)]
async fn add_surfaces_persist_failure_but_keeps_edit() {
	let h = harness(config(), false);
	h.storage.fail_writes(Some("disk full"));

	let err = h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap_err();

	assert!(matches!(err, QueueError::Storage(_)));
	assert_eq!(h.queue.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn flush_reports_idle_and_offline() {
	let h = harness(config(), false);
	assert_eq!(h.queue.flush().await, FlushReport::Idle);

	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();
	assert_eq!(h.queue.flush().await, FlushReport::Offline);
	assert_eq!(h.transport.calls(), 0);
	assert_eq!(h.queue.stats().pending, 1);
}

#[tokio::test(start_paused = true)]
async fn successful_flush_sends_one_batch_and_removes_entries() {
	let h = harness(config(), true);
	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();
	h.queue.add(edit("t2", json!({"title": "x"}), json!(null))).unwrap();
	let mut events = h.queue.subscribe();

	let report = h.queue.flush().await;

	assert_eq!(report, FlushReport::Delivered { count: 2, remaining: 0 });
	assert_eq!(h.transport.calls(), 1);
	let batches = sent_operations(&h.transport);
	assert_eq!(batches[0].len(), 2);
	assert_eq!(batches[0][0].target_key.as_str(), "t1");
	assert_eq!(batches[0][0].value, json!("v1"));
	assert_eq!(batches[0][0].previous_value, Some(json!("v0")));
	assert!(h.queue.is_empty());
	assert!(persisted(&h.storage).is_empty());
	assert_eq!(h.queue.stats().delivered, 2);
	assert_eq!(drain(&mut events), [QueueEvent::FlushStart(2), QueueEvent::FlushSuccess(2)]);
}

#[tokio::test(start_paused = true)]
async fn flush_respects_batch_size() {
	let h = harness(
		QueueConfig {
			max_batch_size: 2,
			..config()
		},
		true,
	);
	for target in ["a", "b", "c"] {
		h.queue.add(edit(target, json!(1), json!(0))).unwrap();
	}

	assert_eq!(h.queue.flush().await, FlushReport::Delivered { count: 2, remaining: 1 });
	assert_eq!(h.queue.flush().await, FlushReport::Delivered { count: 1, remaining: 0 });
	let sizes: Vec<_> = sent_operations(&h.transport).iter().map(Vec::len).collect();
	assert_eq!(sizes, [2, 1]);
}

#[tokio::test(start_paused = true)]
async fn failures_retry_then_dead_letter() {
	let h = harness(config(), true);
	h.transport.set_fallback(MockReply::Status(500));
	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();
	let mut events = h.queue.subscribe();

	for expected_retry in 1..3 {
		let report = h.queue.flush().await;
		assert!(matches!(report, FlushReport::Failed { dead_lettered: 0, remaining: 1, .. }));
		let entries = h.queue.pending();
		let entry = &entries[0];
		assert_eq!(entry.retry_count, expected_retry);
		assert_eq!(entry.status, ChangeStatus::Pending);
		assert_eq!(persisted(&h.storage)[0].retry_count, expected_retry);
	}

	let report = h.queue.flush().await;
	assert!(matches!(report, FlushReport::Failed { dead_lettered: 1, remaining: 0, .. }));
	assert!(h.queue.is_empty());
	assert_eq!(h.queue.stats().dead_lettered, 1);

	let dead: Vec<_> = drain(&mut events)
		.into_iter()
		.filter_map(|e| match e {
			QueueEvent::DeadLetter(change) => Some(change),
			_ => None,
		})
		.collect();
	assert_eq!(dead.len(), 1);
	assert_eq!(dead[0].target_key.as_str(), "t1");
	assert_eq!(dead[0].retry_count, 3);
}

#[tokio::test(start_paused = true)]
async fn flush_error_event_carries_request_error() {
	let h = harness(config(), true);
	h.transport.set_fallback(MockReply::Status(422));
	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();
	let mut events = h.queue.subscribe();

	h.queue.flush().await;

	let error = drain(&mut events).into_iter().find_map(|e| match e {
		QueueEvent::FlushError(err) => Some(err),
		_ => None,
	});
	match error {
		Some(FlushError::Request(err)) => assert_eq!(err.status(), Some(422)),
		other => panic!("expected request error, got {other:?}"),
	}
}

#[tokio::test(start_paused = true)]
async fn concurrent_flush_is_busy() {
	let h = harness(config(), true);
	h.transport.set_latency(Duration::from_millis(200));
	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();

	let first = {
		let queue = h.queue.clone();
		tokio::spawn(async move { queue.flush().await })
	};
	while !h.queue.is_processing() {
		tokio::task::yield_now().await;
	}

	assert_eq!(h.queue.flush().await, FlushReport::Busy);
	assert_eq!(h.queue.stats().processing, 1);
	assert_eq!(first.await.unwrap(), FlushReport::Delivered { count: 1, remaining: 0 });
	assert!(!h.queue.is_processing());
}

#[tokio::test(start_paused = true)]
async fn edit_during_failed_flush_folds_into_one_pending_entry() {
	let h = harness(config(), true);
	h.transport.set_fallback(MockReply::Status(503));
	h.transport.set_latency(Duration::from_millis(200));
	h.queue.add(edit("t1", json!({"a": 1, "b": 1}), json!("orig"))).unwrap();

	let flush = {
		let queue = h.queue.clone();
		tokio::spawn(async move { queue.flush().await })
	};
	while !h.queue.is_processing() {
		tokio::task::yield_now().await;
	}
	// The in-flight entry is processing, so this edit opens a second entry.
	h.queue.add(edit("t1", json!({"b": 2}), json!({"a": 1, "b": 1}))).unwrap();
	assert_eq!(h.queue.len(), 2);

	flush.await.unwrap();

	let entries = h.queue.pending();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].payload, json!({"a": 1, "b": 2}));
	assert_eq!(entries[0].previous_value, Some(json!("orig")));
	assert_eq!(entries[0].status, ChangeStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn in_flight_entries_count_toward_capacity() {
	let h = harness(
		QueueConfig {
			max_queue_size: 1,
			..config()
		},
		true,
	);
	h.transport.set_latency(Duration::from_millis(200));
	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();

	let flush = {
		let queue = h.queue.clone();
		tokio::spawn(async move { queue.flush().await })
	};
	while !h.queue.is_processing() {
		tokio::task::yield_now().await;
	}
	assert!(h.queue.has_unsent(&TargetKey::from("t1")));
	let err = h.queue.add(edit("t1", json!("v2"), json!("v1"))).unwrap_err();
	assert!(matches!(err, QueueError::Full { capacity: 1 }));

	assert!(matches!(flush.await.unwrap(), FlushReport::Delivered { count: 1, .. }));
	assert!(!h.queue.has_unsent(&TargetKey::from("t1")));
	let outcome = h.queue.add(edit("t1", json!("v2"), json!("v1"))).unwrap();
	assert!(matches!(outcome, AddOutcome::Queued { .. }));
}

#[tokio::test(start_paused = true)]
async fn cancelled_flush_returns_entries_to_pending() {
	let h = harness(config(), true);
	h.transport.set_fallback(MockReply::Hang);
	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();

	let flush = {
		let queue = h.queue.clone();
		tokio::spawn(async move { queue.flush().await })
	};
	while !h.queue.is_processing() {
		tokio::task::yield_now().await;
	}
	flush.abort();
	let _ = flush.await;

	assert!(!h.queue.is_processing());
	assert_eq!(h.queue.stats().pending, 1);
}

#[tokio::test(start_paused = true)]
async fn restore_resets_interrupted_entries() {
	let h = harness(config(), false);
	let mut snapshot = Vec::new();
	for (target, status) in [
		("a", ChangeStatus::Pending),
		("b", ChangeStatus::Processing),
		("c", ChangeStatus::Failed),
		("d", ChangeStatus::Completed),
	] {
		let mut change = QueuedChange::new(edit(target, json!(1), json!(0)), epoch());
		change.status = status;
		snapshot.push(change);
	}
	h.storage.write("keel-change-queue", &serde_json::to_vec(&snapshot).unwrap()).unwrap();
	let mut events = h.queue.subscribe();

	let count = h.queue.restore().unwrap();

	assert_eq!(count, 4);
	let entries = h.queue.pending();
	let targets: Vec<_> = entries.iter().map(|c| c.target_key.as_str()).collect();
	assert_eq!(targets, ["a", "b", "c"]);
	assert!(entries.iter().all(|c| c.status == ChangeStatus::Pending));
	assert_eq!(drain(&mut events), [QueueEvent::Restored(4)]);
	assert!(persisted(&h.storage).iter().all(|c| c.status == ChangeStatus::Pending));
}

#[tokio::test(start_paused = true)]
async fn restore_merges_interrupted_and_pending_for_one_target() {
	let h = harness(config(), false);
	let mut interrupted = QueuedChange::new(edit("t1", json!({"a": 1}), json!("orig")), epoch());
	interrupted.status = ChangeStatus::Processing;
	let newer = QueuedChange::new(edit("t1", json!({"b": 2}), json!({"a": 1})), epoch());
	h.storage
		.write("keel-change-queue", &serde_json::to_vec(&[interrupted, newer]).unwrap())
		.unwrap();

	h.queue.restore().unwrap();

	let entries = h.queue.pending();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].payload, json!({"a": 1, "b": 2}));
	assert_eq!(entries[0].previous_value, Some(json!("orig")));
}

#[tokio::test(start_paused = true)]
async fn restore_without_snapshot_is_empty() {
	let h = harness(config(), false);
	assert_eq!(h.queue.restore().unwrap(), 0);
	assert!(h.queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn restore_rejects_corrupt_snapshot() {
	let h = harness(config(), false);
	h.storage.write("keel-change-queue", b"{not json").unwrap();
	assert!(matches!(h.queue.restore(), Err(QueueError::Snapshot(_))));
}

#[tokio::test(start_paused = true)]
async fn suspend_sends_once_and_keeps_entries() {
	let h = harness(config(), true);
	h.transport.set_fallback(MockReply::Status(503));
	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();
	h.storage.remove("keel-change-queue").unwrap();

	let send = h.queue.suspend().expect("online queue with pending entries sends");
	send.await.unwrap();

	assert_eq!(h.transport.calls(), 1);
	assert_eq!(h.queue.len(), 1);
	assert_eq!(persisted(&h.storage).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn suspend_offline_only_persists() {
	let h = harness(config(), false);
	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();

	assert!(h.queue.suspend().is_none());
	assert_eq!(h.transport.calls(), 0);
	assert_eq!(persisted(&h.storage).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn offline_edits_flush_as_one_operation_on_reconnect() {
	let h = harness(config(), false);
	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();
	h.queue.add(edit("t1", json!("v2"), json!("v1"))).unwrap();
	let driver = h.queue.start();

	tokio::time::sleep(Duration::from_millis(10)).await;
	assert_eq!(h.transport.calls(), 0);

	h.connectivity.set_online(true);
	tokio::time::sleep(Duration::from_millis(10)).await;

	let batches = sent_operations(&h.transport);
	assert_eq!(batches.len(), 1);
	assert_eq!(batches[0].len(), 1);
	assert_eq!(batches[0][0].target_key.as_str(), "t1");
	assert_eq!(batches[0][0].value, json!("v2"));
	assert_eq!(batches[0][0].previous_value, Some(json!("v0")));
	assert!(h.queue.is_empty());

	driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn driver_retries_after_retry_delay() {
	let h = harness(
		QueueConfig {
			flush_interval_ms: 60_000,
			..config()
		},
		true,
	);
	h.transport.set_fallback(MockReply::Status(500));
	let driver = h.queue.start();

	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();
	tokio::time::sleep(Duration::from_millis(4_000)).await;
	assert_eq!(h.transport.calls(), 1);

	tokio::time::sleep(Duration::from_millis(2_000)).await;
	assert_eq!(h.transport.calls(), 2);

	h.transport.set_fallback(MockReply::Status(200));
	tokio::time::sleep(Duration::from_millis(5_000)).await;
	assert_eq!(h.transport.calls(), 3);
	assert!(h.queue.is_empty());

	driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn driver_drains_backlog_in_batches() {
	let h = harness(
		QueueConfig {
			max_batch_size: 2,
			..config()
		},
		false,
	);
	for target in ["a", "b", "c", "d", "e"] {
		h.queue.add(edit(target, json!(1), json!(0))).unwrap();
	}
	let driver = h.queue.start();

	h.connectivity.set_online(true);
	tokio::time::sleep(Duration::from_millis(1_000)).await;

	let sizes: Vec<_> = sent_operations(&h.transport).iter().map(Vec::len).collect();
	assert_eq!(sizes, [2, 2, 1]);
	assert!(h.queue.is_empty());

	driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn driver_flushes_restored_entries_on_interval() {
	let h = harness(config(), true);
	let change = QueuedChange::new(edit("t1", json!(1), json!(0)), epoch());
	h.storage.write("keel-change-queue", &serde_json::to_vec(&[change]).unwrap()).unwrap();
	h.queue.restore().unwrap();
	let driver = h.queue.start();

	tokio::time::sleep(Duration::from_millis(4_900)).await;
	assert_eq!(h.transport.calls(), 0);

	tokio::time::sleep(Duration::from_millis(200)).await;
	assert_eq!(h.transport.calls(), 1);
	assert!(h.queue.is_empty());

	driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn driver_stops_on_shutdown() {
	let h = harness(config(), true);
	let driver = h.queue.start();
	driver.shutdown().await;

	h.queue.add(edit("t1", json!("v1"), json!("v0"))).unwrap();
	tokio::time::sleep(Duration::from_secs(30)).await;
	assert_eq!(h.transport.calls(), 0);
}
