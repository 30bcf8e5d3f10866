use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a piece of edited content.
///
/// Queue coalescing, request deduplication and command metadata all key off
/// exact equality of this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetKey(String);

impl TargetKey {
	/// Creates a target key from any string-like value.
	pub fn new(key: impl Into<String>) -> Self {
		Self(key.into())
	}

	/// Returns the key as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for TargetKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for TargetKey {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl From<String> for TargetKey {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl Borrow<str> for TargetKey {
	fn borrow(&self) -> &str {
		&self.0
	}
}

impl AsRef<str> for TargetKey {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
