use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TargetKey;

/// Kind of write carried by an [`EditOperation`] or a queued change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
	/// Field-level content update.
	#[default]
	Update,
	/// Content removal.
	Delete,
}

impl OperationType {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Update => "update",
			Self::Delete => "delete",
		}
	}
}

/// One edit as transmitted to the server.
///
/// Batches are sent as `{"operations": [...]}` of these; single saves send
/// one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOperation {
	pub target_key: TargetKey,
	#[serde(default)]
	pub operation_type: OperationType,
	/// New value for the target.
	pub value: Value,
	/// Value the target held before the edit, if known.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub previous_value: Option<Value>,
}

impl EditOperation {
	/// Creates an update operation.
	pub fn update(target_key: impl Into<TargetKey>, value: Value, previous_value: Option<Value>) -> Self {
		Self {
			target_key: target_key.into(),
			operation_type: OperationType::Update,
			value,
			previous_value,
		}
	}

	/// Returns the operation that reverts this one.
	///
	/// The previous value becomes the new value; an unknown previous value
	/// reverts to `null`.
	pub fn inverse(&self) -> Self {
		Self {
			target_key: self.target_key.clone(),
			operation_type: self.operation_type,
			value: self.previous_value.clone().unwrap_or(Value::Null),
			previous_value: Some(self.value.clone()),
		}
	}
}
