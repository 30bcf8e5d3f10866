use std::io;
use std::path::PathBuf;

use keel_transport::RequestError;
use thiserror::Error;

/// Failure of the durable storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("storage i/o at {path}: {error}")]
	Io {
		path: PathBuf,
		#[source]
		error: io::Error,
	},
	#[error("invalid storage key {key:?}")]
	InvalidKey { key: String },
	#[error("storage unavailable: {reason}")]
	Unavailable { reason: String },
}

/// Error returned by queue mutations.
#[derive(Debug, Error)]
pub enum QueueError {
	#[error("queue is full ({capacity} entries)")]
	Full { capacity: usize },
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error("queue snapshot is not valid JSON: {0}")]
	Snapshot(#[from] serde_json::Error),
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;

/// Why a flushed batch was not delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlushError {
	#[error(transparent)]
	Request(#[from] RequestError),
	#[error("failed to encode batch: {0}")]
	Encode(String),
}
