use serde::{Deserialize, Serialize};

/// Undo history settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
	/// Commands retained; the oldest are dropped past this bound.
	#[serde(default = "default_max_size")]
	pub max_size: usize,
}

fn default_max_size() -> usize {
	100
}

impl Default for HistoryConfig {
	fn default() -> Self {
		Self {
			max_size: default_max_size(),
		}
	}
}
