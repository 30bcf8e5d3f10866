use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_primitives::EditOperation;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::{CommandError, LeafCommand, SaveApi, SaveReceipt};

/// Save endpoint that applies operations to an in-memory store and can be
/// told to reject writes of given values.
#[derive(Default)]
pub(crate) struct RecordingApi {
	pub saves: Mutex<Vec<EditOperation>>,
	pub store: Mutex<FxHashMap<String, Value>>,
	reject_values: Mutex<FxHashSet<String>>,
}

impl RecordingApi {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Rejects any save whose new value renders as `value`.
	pub fn reject(&self, value: &Value) {
		self.reject_values.lock().insert(value.to_string());
	}

	pub fn allow_all(&self) {
		self.reject_values.lock().clear();
	}

	pub fn value(&self, target: &str) -> Option<Value> {
		self.store.lock().get(target).cloned()
	}

	pub fn save_count(&self) -> usize {
		self.saves.lock().len()
	}
}

#[async_trait]
impl SaveApi for RecordingApi {
	async fn save(&self, operation: EditOperation) -> Result<SaveReceipt, CommandError> {
		if self.reject_values.lock().contains(&operation.value.to_string()) {
			return Err(CommandError::Rejected(format!("{} = {}", operation.target_key, operation.value)));
		}
		self.store.lock().insert(operation.target_key.to_string(), operation.value.clone());
		self.saves.lock().push(operation);
		Ok(SaveReceipt::Sent { status: 200 })
	}
}

pub(crate) fn epoch() -> DateTime<Utc> {
	DateTime::<Utc>::UNIX_EPOCH
}

pub(crate) fn leaf(api: &Arc<RecordingApi>, target: &str, old: Value, new: Value) -> LeafCommand {
	LeafCommand::update(api.clone(), target, old, new, format!("set {target}"), epoch())
}
