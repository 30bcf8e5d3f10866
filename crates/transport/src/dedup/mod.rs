//! In-flight request collapsing.
//!
//! The first caller for a key becomes the leader: its future runs on a worker
//! task and the result is published through a `watch` channel. Callers that
//! arrive while the key is live join that channel instead of starting their
//! own call, so every participant observes the same outcome.
//!
//! The map entry is removed before the result is published, so a call that
//! starts after completion always issues a fresh request. A leader guard also
//! removes the entry if the leader task unwinds, and joined callers then fail
//! with [`RequestError::Abandoned`] instead of waiting forever.

use std::future::Future;
use std::hash::Hasher;
use std::sync::Arc;

use keel_primitives::TargetKey;
use keel_worker::TaskClass;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use tokio::sync::watch;
use tracing::trace;

use crate::{RequestError, Response, Result};

type Slot<T> = watch::Receiver<Option<Arc<Result<T>>>>;
type InFlightMap<T> = Arc<Mutex<FxHashMap<String, Slot<T>>>>;

/// Key under which a single-target save is deduplicated.
pub fn save_key(target: &TargetKey) -> String {
	format!("save:{target}")
}

/// Key under which a queue batch is deduplicated.
///
/// Independent of the order targets are given in.
pub fn batch_key<I>(targets: I) -> String
where
	I: IntoIterator,
	I::Item: AsRef<str>,
{
	let mut targets: Vec<I::Item> = targets.into_iter().collect();
	targets.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));

	let mut hasher = FxHasher::default();
	for target in &targets {
		hasher.write(target.as_ref().as_bytes());
		hasher.write_u8(0xff);
	}
	format!("batch:{:016x}", hasher.finish())
}

/// Collapses concurrent calls sharing a key into one underlying call.
pub struct RequestDeduplicator<T = Response> {
	inflight: InFlightMap<T>,
}

impl<T> Default for RequestDeduplicator<T> {
	fn default() -> Self {
		Self {
			inflight: Arc::new(Mutex::new(FxHashMap::default())),
		}
	}
}

impl<T> Clone for RequestDeduplicator<T> {
	fn clone(&self) -> Self {
		Self {
			inflight: Arc::clone(&self.inflight),
		}
	}
}

impl<T> std::fmt::Debug for RequestDeduplicator<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RequestDeduplicator").field("in_flight", &self.inflight.lock().len()).finish()
	}
}

impl<T> RequestDeduplicator<T>
where
	T: Clone + Send + Sync + 'static,
{
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of keys with a live call.
	pub fn in_flight(&self) -> usize {
		self.inflight.lock().len()
	}

	pub fn is_in_flight(&self, key: &str) -> bool {
		self.inflight.lock().contains_key(key)
	}

	/// Runs `start()` unless a call for `key` is already live, in which case
	/// the caller waits for and shares that call's outcome.
	///
	/// The leader future runs detached, so dropping the caller that started it
	/// does not cancel delivery to the others.
	pub async fn call<F, Fut>(&self, key: impl Into<String>, start: F) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		let key = key.into();
		let (rx, leader) = {
			let mut map = self.inflight.lock();
			match map.get(&key) {
				Some(rx) => (rx.clone(), None),
				None => {
					let (tx, rx) = watch::channel(None);
					map.insert(key.clone(), rx.clone());
					(rx, Some(tx))
				}
			}
		};

		match leader {
			Some(tx) => {
				trace!(key = %key, "dedup.lead");
				let guard = LeaderGuard {
					key: key.clone(),
					inflight: Arc::clone(&self.inflight),
					rx: rx.clone(),
				};
				let fut = start();
				keel_worker::spawn(TaskClass::Interactive, async move {
					let result = fut.await;
					drop(guard);
					let _ = tx.send(Some(Arc::new(result)));
				});
			}
			None => trace!(key = %key, "dedup.join"),
		}

		wait(&key, rx).await
	}
}

async fn wait<T: Clone>(key: &str, mut rx: Slot<T>) -> Result<T> {
	loop {
		let current = rx.borrow_and_update().clone();
		if let Some(result) = current {
			return (*result).clone();
		}
		if rx.changed().await.is_err() {
			let last = rx.borrow().clone();
			return match last {
				Some(result) => (*result).clone(),
				None => {
					trace!(key = %key, "dedup.abandoned");
					Err(RequestError::Abandoned { key: key.to_string() })
				}
			};
		}
	}
}

/// Removes the leader's map entry when the leader finishes or unwinds.
struct LeaderGuard<T> {
	key: String,
	inflight: InFlightMap<T>,
	rx: Slot<T>,
}

impl<T> Drop for LeaderGuard<T> {
	fn drop(&mut self) {
		let mut map = self.inflight.lock();
		if map.get(&self.key).is_some_and(|live| live.same_channel(&self.rx)) {
			map.remove(&self.key);
		}
	}
}
