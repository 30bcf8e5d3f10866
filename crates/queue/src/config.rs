use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Queue limits, flush policy and persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
	/// Storage key the snapshot is persisted under.
	#[serde(default = "default_storage_key")]
	pub storage_key: String,
	/// Hard cap on entries; adds that would grow past it are rejected.
	#[serde(default = "default_max_queue_size")]
	pub max_queue_size: usize,
	/// Pending entries sent per flush.
	#[serde(default = "default_max_batch_size")]
	pub max_batch_size: usize,
	/// Failed flushes an entry survives before it is dead-lettered.
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	/// Period of the driver's auto-flush tick.
	#[serde(default = "default_flush_interval_ms")]
	pub flush_interval_ms: u64,
	/// Delay before retrying after a failed flush.
	#[serde(default = "default_retry_delay_ms")]
	pub retry_delay_ms: u64,
	/// Delay before draining the rest of the backlog after a successful flush.
	#[serde(default = "default_backlog_delay_ms")]
	pub backlog_delay_ms: u64,
	/// Endpoint receiving `{"operations": [...]}` batches.
	#[serde(default = "default_batch_path")]
	pub batch_path: String,
}

fn default_storage_key() -> String {
	"keel-change-queue".to_string()
}

fn default_max_queue_size() -> usize {
	1000
}

fn default_max_batch_size() -> usize {
	50
}

fn default_max_retries() -> u32 {
	3
}

fn default_flush_interval_ms() -> u64 {
	5_000
}

fn default_retry_delay_ms() -> u64 {
	5_000
}

fn default_backlog_delay_ms() -> u64 {
	100
}

fn default_batch_path() -> String {
	"/api/content/batch".to_string()
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			storage_key: default_storage_key(),
			max_queue_size: default_max_queue_size(),
			max_batch_size: default_max_batch_size(),
			max_retries: default_max_retries(),
			flush_interval_ms: default_flush_interval_ms(),
			retry_delay_ms: default_retry_delay_ms(),
			backlog_delay_ms: default_backlog_delay_ms(),
			batch_path: default_batch_path(),
		}
	}
}

impl QueueConfig {
	pub fn flush_interval(&self) -> Duration {
		Duration::from_millis(self.flush_interval_ms)
	}

	pub fn retry_delay(&self) -> Duration {
		Duration::from_millis(self.retry_delay_ms)
	}

	pub fn backlog_delay(&self) -> Duration {
		Duration::from_millis(self.backlog_delay_ms)
	}
}
