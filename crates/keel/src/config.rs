//! TOML configuration for the whole pipeline.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! save_path = "/api/content/save"
//!
//! [client]
//! timeout_ms = 30000
//! retries = 3
//! retry_delay_ms = 1000
//!
//! [queue]
//! max_queue_size = 1000
//! max_batch_size = 50
//! max_retries = 3
//! flush_interval_ms = 5000
//! retry_delay_ms = 5000
//! backlog_delay_ms = 100
//! batch_path = "/api/content/batch"
//!
//! [history]
//! max_size = 100
//! ```

use std::path::{Path, PathBuf};

use keel_history::HistoryConfig;
use keel_queue::QueueConfig;
use keel_transport::ClientConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a [`KeelConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error reading {path}: {error}")]
	Io { path: PathBuf, error: std::io::Error },

	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// A value is out of range.
	#[error("invalid value for {field}: {reason}")]
	Invalid { field: &'static str, reason: String },
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeelConfig {
	/// Endpoint receiving single-operation saves while online.
	#[serde(default = "default_save_path")]
	pub save_path: String,
	#[serde(default)]
	pub client: ClientConfig,
	#[serde(default)]
	pub queue: QueueConfig,
	#[serde(default)]
	pub history: HistoryConfig,
}

fn default_save_path() -> String {
	"/api/content/save".to_string()
}

impl Default for KeelConfig {
	fn default() -> Self {
		Self {
			save_path: default_save_path(),
			client: ClientConfig::default(),
			queue: QueueConfig::default(),
			history: HistoryConfig::default(),
		}
	}
}

impl KeelConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses and validates a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&input)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		let zeroes = [
			("queue.max_queue_size", self.queue.max_queue_size == 0),
			("queue.max_batch_size", self.queue.max_batch_size == 0),
			("queue.max_retries", self.queue.max_retries == 0),
			("queue.flush_interval_ms", self.queue.flush_interval_ms == 0),
			("history.max_size", self.history.max_size == 0),
			("client.timeout_ms", self.client.timeout_ms == 0),
		];
		for (field, zero) in zeroes {
			if zero {
				return Err(ConfigError::Invalid {
					field,
					reason: "must be greater than zero".to_string(),
				});
			}
		}
		if self.queue.storage_key.is_empty() {
			return Err(ConfigError::Invalid {
				field: "queue.storage_key",
				reason: "must not be empty".to_string(),
			});
		}
		Ok(())
	}
}
