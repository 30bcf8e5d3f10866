use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RequestOptions;

/// Request layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
	/// Per-attempt timeout in milliseconds.
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	/// Retries after the first attempt.
	#[serde(default = "default_retries")]
	pub retries: u32,
	/// Base backoff delay in milliseconds; attempt `n` waits `retry_delay_ms * 2^n`.
	#[serde(default = "default_retry_delay_ms")]
	pub retry_delay_ms: u64,
}

fn default_timeout_ms() -> u64 {
	30_000
}

fn default_retries() -> u32 {
	3
}

fn default_retry_delay_ms() -> u64 {
	1_000
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			timeout_ms: default_timeout_ms(),
			retries: default_retries(),
			retry_delay_ms: default_retry_delay_ms(),
		}
	}
}

impl ClientConfig {
	pub fn request_options(&self) -> RequestOptions {
		RequestOptions {
			timeout: Duration::from_millis(self.timeout_ms),
			retries: self.retries,
			retry_delay: Duration::from_millis(self.retry_delay_ms),
		}
	}
}
