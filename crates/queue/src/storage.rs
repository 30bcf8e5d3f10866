//! Durable key/value storage for the queue snapshot.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tempfile::NamedTempFile;

use crate::StorageError;

/// Synchronous blob storage.
///
/// Writes replace the whole value; a write either lands completely or not at
/// all.
pub trait Storage: Send + Sync {
	fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
	fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
	fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Shared storage handle.
pub type SharedStorage = Arc<dyn Storage>;

/// In-process storage for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
	entries: Mutex<FxHashMap<String, Vec<u8>>>,
	fail_writes: Mutex<Option<String>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every subsequent write fail with `reason`, or succeed again on `None`.
	pub fn fail_writes(&self, reason: Option<&str>) {
		*self.fail_writes.lock() = reason.map(str::to_string);
	}

	/// Stored value decoded as UTF-8.
	pub fn get_text(&self, key: &str) -> Option<String> {
		self.entries.lock().get(key).map(|bytes| String::from_utf8_lossy(bytes).into_owned())
	}
}

impl Storage for MemoryStorage {
	fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
		Ok(self.entries.lock().get(key).cloned())
	}

	fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
		if let Some(reason) = self.fail_writes.lock().clone() {
			return Err(StorageError::Unavailable { reason });
		}
		self.entries.lock().insert(key.to_string(), bytes.to_vec());
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<(), StorageError> {
		self.entries.lock().remove(key);
		Ok(())
	}
}

/// One JSON file per key under a directory, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct FileStorage {
	dir: PathBuf,
}

impl FileStorage {
	/// Opens `dir`, creating it if needed.
	pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
		let dir = dir.into();
		std::fs::create_dir_all(&dir).map_err(|error| StorageError::Io { path: dir.clone(), error })?;
		Ok(Self { dir })
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// File backing `key`. Keys are restricted to `[A-Za-z0-9._-]`.
	pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
		let valid = !key.is_empty()
			&& !key.starts_with('.')
			&& key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
		if !valid {
			return Err(StorageError::InvalidKey { key: key.to_string() });
		}
		Ok(self.dir.join(format!("{key}.json")))
	}
}

impl Storage for FileStorage {
	fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
		let path = self.path_for(key)?;
		match std::fs::read(&path) {
			Ok(bytes) => Ok(Some(bytes)),
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(error) => Err(StorageError::Io { path, error }),
		}
	}

	fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
		let path = self.path_for(key)?;
		let io_err = |error| StorageError::Io { path: path.clone(), error };

		let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
		tmp.write_all(bytes).map_err(io_err)?;
		tmp.as_file().sync_all().map_err(io_err)?;
		tmp.persist(&path).map_err(|err| io_err(err.error))?;
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<(), StorageError> {
		let path = self.path_for(key)?;
		match std::fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(error) => Err(StorageError::Io { path, error }),
		}
	}
}
