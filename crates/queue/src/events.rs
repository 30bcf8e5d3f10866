use keel_primitives::TargetKey;

use crate::{FlushError, QueuedChange};

/// Queue lifecycle notifications, delivered over a broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
	/// An edit was accepted, either as a new entry or merged into a pending one.
	Queued { id: String, target_key: TargetKey, coalesced: bool },
	/// An add was rejected because the queue is at capacity.
	QueueFull { target_key: TargetKey, capacity: usize },
	/// A batch of this many entries is being sent.
	FlushStart(usize),
	/// This many entries were delivered and removed.
	FlushSuccess(usize),
	/// A batch failed; its entries were retried or dead-lettered.
	FlushError(FlushError),
	/// An entry exhausted its retries and was dropped.
	DeadLetter(QueuedChange),
	/// This many entries were loaded from storage.
	Restored(usize),
}
