//! [`LocalChangeQueue`] and its flush driver.
//!
//! # Flush serialization
//!
//! Only one flush runs at a time. A flush takes the processing flag, marks up
//! to `max_batch_size` pending entries as processing, sends them as a single
//! batch request and then either removes them (delivered) or returns them to
//! pending with an incremented retry count (dead-lettering those at the
//! retry limit). Dropping a flush future mid-send returns its entries to
//! pending.
//!
//! # Scheduling
//!
//! [`LocalChangeQueue::flush`] never calls itself. Follow-up flushes (retry
//! after failure, backlog drain after success, flush-on-add) are recorded as a
//! deadline that the driver started by [`LocalChangeQueue::start`] services,
//! alongside its periodic tick and the offline to online transition.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use keel_primitives::{SharedClock, TargetKey};
use keel_transport::{Request, RequestDeduplicator, RequestOptions, RetryingClient, batch_key};
use keel_worker::{CancellationToken, TaskClass, WorkerHandle};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::{
	AddOutcome, BatchPayload, ChangeStatus, FlushError, NewChange, QueueConfig, QueueError, QueueEvent, QueuedChange, Result, SharedConnectivity,
	SharedStorage,
};

const EVENT_CAPACITY: usize = 256;

/// Outcome of one [`LocalChangeQueue::flush`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushReport {
	/// Another flush is in progress.
	Busy,
	/// Nothing is pending.
	Idle,
	/// Connectivity reports offline; nothing was sent.
	Offline,
	/// The batch was accepted and removed.
	Delivered { count: usize, remaining: usize },
	/// The batch failed; `dead_lettered` entries were dropped, the rest are pending again.
	Failed {
		attempted: usize,
		dead_lettered: usize,
		remaining: usize,
		error: FlushError,
	},
}

/// Entry counts per status plus cumulative counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
	pub total: usize,
	pub pending: usize,
	pub processing: usize,
	pub failed: usize,
	pub completed: usize,
	/// Entries delivered since the queue was created.
	pub delivered: u64,
	/// Entries dead-lettered since the queue was created.
	pub dead_lettered: u64,
}

/// Collaborators a queue is built from.
pub struct QueueParts {
	pub client: RetryingClient,
	pub dedup: RequestDeduplicator,
	pub storage: SharedStorage,
	pub connectivity: SharedConnectivity,
	pub clock: SharedClock,
}

#[derive(Debug, Default)]
struct QueueState {
	entries: Vec<QueuedChange>,
	delivered: u64,
	dead_lettered: u64,
}

impl QueueState {
	fn pending_count(&self) -> usize {
		self.entries.iter().filter(|c| c.status == ChangeStatus::Pending).count()
	}

	/// Returns the given entries to pending, folding each into a newer pending
	/// entry for the same target when one exists.
	fn requeue(&mut self, ids: &FxHashSet<String>) {
		let mut i = 0;
		while i < self.entries.len() {
			if !ids.contains(&self.entries[i].id) {
				i += 1;
				continue;
			}
			let target = &self.entries[i].target_key;
			let newer = self
				.entries
				.iter()
				.enumerate()
				.skip(i + 1)
				.find(|(_, c)| c.status == ChangeStatus::Pending && &c.target_key == target && !ids.contains(&c.id))
				.map(|(idx, _)| idx);
			match newer {
				Some(idx) => {
					let newer = self.entries.remove(idx);
					self.entries[i].absorb(newer);
				}
				None => self.entries[i].status = ChangeStatus::Pending,
			}
			i += 1;
		}
	}
}

struct Inner {
	config: QueueConfig,
	state: Mutex<QueueState>,
	processing: AtomicBool,
	client: RetryingClient,
	dedup: RequestDeduplicator,
	storage: SharedStorage,
	connectivity: SharedConnectivity,
	clock: SharedClock,
	events: broadcast::Sender<QueueEvent>,
	next_flush: Mutex<Option<Instant>>,
	wake: Notify,
}

/// Durable, coalescing buffer of pending writes.
///
/// Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct LocalChangeQueue {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for LocalChangeQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LocalChangeQueue")
			.field("len", &self.len())
			.field("processing", &self.is_processing())
			.finish_non_exhaustive()
	}
}

impl LocalChangeQueue {
	pub fn new(config: QueueConfig, parts: QueueParts) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self {
			inner: Arc::new(Inner {
				config,
				state: Mutex::new(QueueState::default()),
				processing: AtomicBool::new(false),
				client: parts.client,
				dedup: parts.dedup,
				storage: parts.storage,
				connectivity: parts.connectivity,
				clock: parts.clock,
				events,
				next_flush: Mutex::new(None),
				wake: Notify::new(),
			}),
		}
	}

	pub fn config(&self) -> &QueueConfig {
		&self.inner.config
	}

	pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
		self.inner.events.subscribe()
	}

	pub fn len(&self) -> usize {
		self.inner.state.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.state.lock().entries.is_empty()
	}

	pub fn is_processing(&self) -> bool {
		self.inner.processing.load(Ordering::Acquire)
	}

	/// Snapshot of every entry in insertion order.
	pub fn pending(&self) -> Vec<QueuedChange> {
		self.inner.state.lock().entries.clone()
	}

	/// Whether an edit to `target` is still waiting on, or in, a flush.
	pub fn has_unsent(&self, target: &TargetKey) -> bool {
		self.inner
			.state
			.lock()
			.entries
			.iter()
			.any(|c| c.status != ChangeStatus::Completed && &c.target_key == target)
	}

	pub fn stats(&self) -> QueueStats {
		let state = self.inner.state.lock();
		let mut stats = QueueStats {
			total: state.entries.len(),
			delivered: state.delivered,
			dead_lettered: state.dead_lettered,
			..QueueStats::default()
		};
		for change in &state.entries {
			match change.status {
				ChangeStatus::Pending => stats.pending += 1,
				ChangeStatus::Processing => stats.processing += 1,
				ChangeStatus::Failed => stats.failed += 1,
				ChangeStatus::Completed => stats.completed += 1,
			}
		}
		stats
	}

	/// Buffers an edit, merging it into the pending entry for its target if
	/// there is one.
	///
	/// # Errors
	///
	/// [`QueueError::Full`] when the queue is at `max_queue_size` and the edit
	/// would add an entry (entries in an in-flight batch count); a storage or
	/// encoding error if the snapshot could not be persisted (the edit stays
	/// buffered in memory).
	pub fn add(&self, change: NewChange) -> Result<AddOutcome> {
		let now = self.inner.clock.now();
		let target_key = change.target_key.clone();
		let capacity = self.inner.config.max_queue_size;

		let (outcome, persisted) = {
			let mut state = self.inner.state.lock();
			let existing = state
				.entries
				.iter()
				.position(|c| c.status == ChangeStatus::Pending && c.target_key == change.target_key);

			let outcome = match existing {
				Some(idx) => {
					let entry = &mut state.entries[idx];
					let replaced = entry.id.clone();
					entry.coalesce(change, now);
					AddOutcome::Coalesced {
						id: entry.id.clone(),
						replaced,
					}
				}
				None if state.entries.len() >= capacity => {
					drop(state);
					warn!(target_key = %target_key, capacity, "queue.full");
					self.emit(QueueEvent::QueueFull { target_key, capacity });
					return Err(QueueError::Full { capacity });
				}
				None => {
					let entry = QueuedChange::new(change, now);
					let id = entry.id.clone();
					state.entries.push(entry);
					AddOutcome::Queued { id }
				}
			};
			(outcome, self.persist_locked(&state))
		};

		debug!(target_key = %target_key, id = outcome.id(), coalesced = outcome.is_coalesced(), "queue.add");
		self.emit(QueueEvent::Queued {
			id: outcome.id().to_string(),
			target_key,
			coalesced: outcome.is_coalesced(),
		});
		persisted?;

		if self.inner.connectivity.is_online() {
			self.schedule_flush(Duration::ZERO);
		}
		Ok(outcome)
	}

	/// Sends up to `max_batch_size` pending entries as one batch.
	pub async fn flush(&self) -> FlushReport {
		let Some(guard) = ProcessingGuard::acquire(&self.inner) else {
			trace!("queue.flush_busy");
			return FlushReport::Busy;
		};

		if self.inner.state.lock().pending_count() == 0 {
			return FlushReport::Idle;
		}
		if !self.inner.connectivity.is_online() {
			debug!("queue.flush_offline");
			return FlushReport::Offline;
		}

		let batch = self.take_batch();
		let ids: FxHashSet<String> = batch.iter().map(|c| c.id.clone()).collect();
		info!(count = batch.len(), "queue.flush_start");
		self.emit(QueueEvent::FlushStart(batch.len()));

		let outcome = match self.batch_request(&batch) {
			Ok(request) => {
				let key = batch_key(batch.iter().map(|c| c.target_key.as_str()));
				let client = self.inner.client.clone();
				self.inner
					.dedup
					.call(key, move || async move { client.send(request).await })
					.await
					.map_err(FlushError::from)
			}
			Err(error) => Err(error),
		};

		let report = match outcome {
			Ok(_) => self.complete(&ids),
			Err(error) => self.fail(&ids, error),
		};
		drop(guard);

		match &report {
			FlushReport::Delivered { remaining, .. } if *remaining > 0 => self.schedule_flush(self.inner.config.backlog_delay()),
			FlushReport::Failed { remaining, .. } if *remaining > 0 => self.schedule_flush(self.inner.config.retry_delay()),
			_ => {}
		}
		report
	}

	/// Loads the persisted snapshot, returning interrupted entries to pending.
	///
	/// Restored entries are placed ahead of anything added since start-up.
	/// Returns the number of entries loaded.
	pub fn restore(&self) -> Result<usize> {
		let Some(bytes) = self.inner.storage.read(&self.inner.config.storage_key)? else {
			debug!("queue.restore_empty");
			self.emit(QueueEvent::Restored(0));
			return Ok(0);
		};
		let restored: Vec<QueuedChange> = serde_json::from_slice(&bytes)?;
		let count = restored.len();

		{
			let mut state = self.inner.state.lock();
			let current = std::mem::take(&mut state.entries);
			let mut interrupted = FxHashSet::default();
			for mut change in restored {
				match change.status {
					ChangeStatus::Completed => continue,
					ChangeStatus::Processing | ChangeStatus::Failed => {
						change.status = ChangeStatus::Processing;
						interrupted.insert(change.id.clone());
					}
					ChangeStatus::Pending => {}
				}
				state.entries.push(change);
			}
			state.entries.extend(current);
			state.requeue(&interrupted);
			self.collapse_duplicate_pending(&mut state);
			if let Err(err) = self.persist_locked(&state) {
				warn!(error = %err, "queue.persist_failed");
			}
		}

		info!(count, "queue.restored");
		self.emit(QueueEvent::Restored(count));
		Ok(count)
	}

	/// Persists the snapshot and fires one best-effort, single-attempt send of
	/// all pending entries.
	///
	/// Nothing is removed from the queue whatever the send's outcome; the
	/// entries are delivered again by the next confirmed flush. Returns the
	/// send task, or `None` when there is nothing to send or the queue is
	/// offline.
	pub fn suspend(&self) -> Option<JoinHandle<()>> {
		let pending: Vec<QueuedChange> = {
			let state = self.inner.state.lock();
			if let Err(err) = self.persist_locked(&state) {
				warn!(error = %err, "queue.persist_failed");
			}
			state.entries.iter().filter(|c| c.status == ChangeStatus::Pending).cloned().collect()
		};

		if pending.is_empty() || !self.inner.connectivity.is_online() {
			debug!(pending = pending.len(), "queue.suspend_skipped");
			return None;
		}

		let request = match self.batch_request(&pending) {
			Ok(request) => request,
			Err(err) => {
				warn!(error = %err, "queue.suspend_encode_failed");
				return None;
			}
		};
		let client = self.inner.client.clone();
		let options = RequestOptions::once(client.options().timeout);
		let count = pending.len();
		info!(count, "queue.suspend_send");
		Some(keel_worker::spawn(TaskClass::Background, async move {
			match client.send_with(request, options).await {
				Ok(_) => debug!(count, "queue.suspend_sent"),
				Err(err) => debug!(count, error = %err, "queue.suspend_send_failed"),
			}
		}))
	}

	/// Drops every entry and persists the empty snapshot.
	pub fn clear(&self) -> Result<()> {
		let mut state = self.inner.state.lock();
		state.entries.clear();
		self.persist_locked(&state)
	}

	/// Starts the flush driver.
	///
	/// The driver flushes on every `flush_interval` tick when the queue is
	/// non-empty, when a scheduled follow-up comes due, and immediately when
	/// connectivity goes from offline to online. It runs until the returned
	/// handle is shut down or dropped.
	pub fn start(&self) -> WorkerHandle {
		let queue = self.clone();
		keel_worker::spawn_cancellable(TaskClass::Background, "keel-queue-driver", move |cancel| async move {
			queue.drive(cancel).await;
		})
	}

	/// Requests a flush after `delay`, keeping any earlier pending request.
	pub fn schedule_flush(&self, delay: Duration) {
		let at = Instant::now() + delay;
		{
			let mut next = self.inner.next_flush.lock();
			if next.is_none_or(|current| at < current) {
				*next = Some(at);
			}
		}
		trace!(delay_ms = delay.as_millis() as u64, "queue.flush_scheduled");
		self.inner.wake.notify_one();
	}

	async fn drive(&self, cancel: CancellationToken) {
		let interval = self.inner.config.flush_interval();
		let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		let mut online_rx = Some(self.inner.connectivity.subscribe());
		let mut was_online = self.inner.connectivity.is_online();
		debug!(interval_ms = interval.as_millis() as u64, online = was_online, "queue.driver_start");

		loop {
			let deadline = *self.inner.next_flush.lock();
			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = ticker.tick() => {
					if !self.is_processing() && !self.is_empty() {
						trace!("queue.driver_tick");
						self.flush().await;
					}
				}
				_ = wait_until(deadline) => {
					{
						let mut next = self.inner.next_flush.lock();
						if next.is_some_and(|at| at <= Instant::now()) {
							*next = None;
						}
					}
					self.flush().await;
				}
				_ = self.inner.wake.notified() => {}
				online = next_transition(&mut online_rx) => match online {
					Some(online) => {
						if online && !was_online {
							info!("queue.reconnected");
							self.flush().await;
						}
						was_online = online;
					}
					None => {
						debug!("queue.connectivity_closed");
						online_rx = None;
					}
				},
			}
		}
		debug!("queue.driver_stop");
	}

	fn take_batch(&self) -> Vec<QueuedChange> {
		let mut state = self.inner.state.lock();
		let max = self.inner.config.max_batch_size.max(1);
		let mut batch = Vec::new();
		for change in state.entries.iter_mut().filter(|c| c.status == ChangeStatus::Pending).take(max) {
			change.status = ChangeStatus::Processing;
			batch.push(change.clone());
		}
		if let Err(err) = self.persist_locked(&state) {
			warn!(error = %err, "queue.persist_failed");
		}
		batch
	}

	fn batch_request(&self, batch: &[QueuedChange]) -> std::result::Result<Request, FlushError> {
		let payload = BatchPayload {
			operations: batch.iter().map(QueuedChange::to_operation).collect(),
		};
		Request::post_json(self.inner.config.batch_path.as_str(), &payload).map_err(|err| FlushError::Encode(err.to_string()))
	}

	fn complete(&self, ids: &FxHashSet<String>) -> FlushReport {
		let (count, remaining) = {
			let mut state = self.inner.state.lock();
			let before = state.entries.len();
			state.entries.retain(|c| !(c.status == ChangeStatus::Processing && ids.contains(&c.id)));
			let count = before - state.entries.len();
			state.delivered += count as u64;
			if let Err(err) = self.persist_locked(&state) {
				warn!(error = %err, "queue.persist_failed");
			}
			(count, state.pending_count())
		};
		info!(count, remaining, "queue.flush_success");
		self.emit(QueueEvent::FlushSuccess(count));
		FlushReport::Delivered { count, remaining }
	}

	fn fail(&self, ids: &FxHashSet<String>, error: FlushError) -> FlushReport {
		let max_retries = self.inner.config.max_retries;
		let (dead, remaining) = {
			let mut state = self.inner.state.lock();
			let mut dead = Vec::new();
			let mut retry = FxHashSet::default();
			let mut kept = Vec::with_capacity(state.entries.len());
			for mut change in std::mem::take(&mut state.entries) {
				if change.status != ChangeStatus::Processing || !ids.contains(&change.id) {
					kept.push(change);
					continue;
				}
				change.status = ChangeStatus::Failed;
				change.retry_count += 1;
				if change.retry_count >= max_retries {
					dead.push(change);
				} else {
					retry.insert(change.id.clone());
					kept.push(change);
				}
			}
			state.entries = kept;
			state.requeue(&retry);
			state.dead_lettered += dead.len() as u64;
			if let Err(err) = self.persist_locked(&state) {
				warn!(error = %err, "queue.persist_failed");
			}
			(dead, state.pending_count())
		};

		warn!(
			attempted = ids.len(),
			dead_lettered = dead.len(),
			remaining,
			error = %error,
			"queue.flush_failed"
		);
		let dead_lettered = dead.len();
		for change in dead {
			warn!(id = %change.id, target_key = %change.target_key, retries = change.retry_count, "queue.dead_letter");
			self.emit(QueueEvent::DeadLetter(change));
		}
		self.emit(QueueEvent::FlushError(error.clone()));
		FlushReport::Failed {
			attempted: ids.len(),
			dead_lettered,
			remaining,
			error,
		}
	}

	/// Merges pending entries that share a target, keeping the earliest position.
	fn collapse_duplicate_pending(&self, state: &mut QueueState) {
		let mut i = 0;
		while i < state.entries.len() {
			if state.entries[i].status == ChangeStatus::Pending {
				let target = state.entries[i].target_key.clone();
				let mut j = i + 1;
				while j < state.entries.len() {
					if state.entries[j].status == ChangeStatus::Pending && state.entries[j].target_key == target {
						let newer = state.entries.remove(j);
						state.entries[i].absorb(newer);
					} else {
						j += 1;
					}
				}
			}
			i += 1;
		}
	}

	fn persist_locked(&self, state: &QueueState) -> Result<()> {
		let bytes = serde_json::to_vec(&state.entries)?;
		self.inner.storage.write(&self.inner.config.storage_key, &bytes)?;
		trace!(entries = state.entries.len(), bytes = bytes.len(), "queue.persisted");
		Ok(())
	}

	fn emit(&self, event: QueueEvent) {
		let _ = self.inner.events.send(event);
	}
}

/// Holds the processing flag for one flush. On drop, entries still marked
/// processing (the flush was cancelled mid-send) go back to pending.
struct ProcessingGuard<'a> {
	inner: &'a Inner,
}

impl<'a> ProcessingGuard<'a> {
	fn acquire(inner: &'a Inner) -> Option<Self> {
		inner
			.processing
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| Self { inner })
	}
}

impl Drop for ProcessingGuard<'_> {
	fn drop(&mut self) {
		{
			let mut state = self.inner.state.lock();
			let stranded: FxHashSet<String> = state
				.entries
				.iter()
				.filter(|c| c.status == ChangeStatus::Processing)
				.map(|c| c.id.clone())
				.collect();
			if !stranded.is_empty() {
				debug!(count = stranded.len(), "queue.flush_abandoned");
				state.requeue(&stranded);
			}
		}
		self.inner.processing.store(false, Ordering::Release);
	}
}

async fn wait_until(deadline: Option<Instant>) {
	match deadline {
		Some(at) => tokio::time::sleep_until(at).await,
		None => std::future::pending().await,
	}
}

/// Next connectivity value, or `None` once the source is gone.
async fn next_transition(rx: &mut Option<watch::Receiver<bool>>) -> Option<bool> {
	match rx {
		Some(rx) => match rx.changed().await {
			Ok(()) => Some(*rx.borrow_and_update()),
			Err(_) => None,
		},
		None => std::future::pending().await,
	}
}

#[cfg(test)]
mod tests;
