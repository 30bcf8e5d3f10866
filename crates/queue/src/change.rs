use chrono::{DateTime, Utc};
use keel_primitives::{EditOperation, OperationType, TargetKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a [`QueuedChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeStatus {
	#[default]
	Pending,
	Processing,
	Failed,
	Completed,
}

impl ChangeStatus {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Processing => "processing",
			Self::Failed => "failed",
			Self::Completed => "completed",
		}
	}
}

/// One buffered write, as held in memory and in the persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedChange {
	pub id: String,
	#[serde(default)]
	pub operation_type: OperationType,
	pub target_key: TargetKey,
	pub payload: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub previous_value: Option<Value>,
	pub timestamp: DateTime<Utc>,
	#[serde(default)]
	pub retry_count: u32,
	#[serde(default)]
	pub status: ChangeStatus,
}

impl QueuedChange {
	pub(crate) fn new(change: NewChange, now: DateTime<Utc>) -> Self {
		Self {
			id: change_id(&change.target_key, now),
			operation_type: change.operation_type,
			target_key: change.target_key,
			payload: change.payload,
			previous_value: change.previous_value,
			timestamp: now,
			retry_count: 0,
			status: ChangeStatus::Pending,
		}
	}

	/// Folds a newer edit to the same target into this entry.
	///
	/// The payload is merged new-over-old, the oldest previous value survives
	/// even when it is absent, and the entry gets a fresh id, timestamp and
	/// retry budget.
	pub(crate) fn coalesce(&mut self, newer: NewChange, now: DateTime<Utc>) {
		debug_assert_eq!(self.target_key, newer.target_key);
		merge_payload(&mut self.payload, newer.payload);
		self.operation_type = newer.operation_type;
		self.id = change_id(&self.target_key, now);
		self.timestamp = now;
		self.retry_count = 0;
		self.status = ChangeStatus::Pending;
	}

	/// Folds a newer pending entry for the same target into this older one.
	///
	/// This entry's previous value is kept as is.
	pub(crate) fn absorb(&mut self, newer: QueuedChange) {
		merge_payload(&mut self.payload, newer.payload);
		self.operation_type = newer.operation_type;
		self.id = newer.id;
		self.timestamp = newer.timestamp;
		self.retry_count = newer.retry_count;
		self.status = ChangeStatus::Pending;
	}

	/// Wire form of this change.
	pub fn to_operation(&self) -> EditOperation {
		EditOperation {
			target_key: self.target_key.clone(),
			operation_type: self.operation_type,
			value: self.payload.clone(),
			previous_value: self.previous_value.clone(),
		}
	}
}

/// Shallow merge: object fields of `newer` overwrite those of `current`;
/// anything else replaces `current` outright.
fn merge_payload(current: &mut Value, newer: Value) {
	match (current, newer) {
		(Value::Object(current), Value::Object(newer)) => current.extend(newer),
		(current, newer) => *current = newer,
	}
}

fn change_id(target: &TargetKey, now: DateTime<Utc>) -> String {
	let random = uuid::Uuid::new_v4().simple().to_string();
	format!("{target}-{}-{}", now.timestamp_millis(), &random[..12])
}

/// An edit handed to [`LocalChangeQueue::add`](crate::LocalChangeQueue::add).
#[derive(Debug, Clone, PartialEq)]
pub struct NewChange {
	pub operation_type: OperationType,
	pub target_key: TargetKey,
	pub payload: Value,
	pub previous_value: Option<Value>,
}

impl NewChange {
	pub fn update(target_key: impl Into<TargetKey>, payload: Value, previous_value: Option<Value>) -> Self {
		Self {
			operation_type: OperationType::Update,
			target_key: target_key.into(),
			payload,
			previous_value,
		}
	}
}

impl From<EditOperation> for NewChange {
	fn from(op: EditOperation) -> Self {
		Self {
			operation_type: op.operation_type,
			target_key: op.target_key,
			payload: op.value,
			previous_value: op.previous_value,
		}
	}
}

/// Result of a successful add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
	/// A new entry was appended.
	Queued { id: String },
	/// The edit was merged into the pending entry for its target.
	Coalesced { id: String, replaced: String },
}

impl AddOutcome {
	/// Id of the entry now holding the edit.
	pub fn id(&self) -> &str {
		match self {
			Self::Queued { id } | Self::Coalesced { id, .. } => id,
		}
	}

	pub fn is_coalesced(&self) -> bool {
		matches!(self, Self::Coalesced { .. })
	}
}

/// Body of a batch flush request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
	pub operations: Vec<EditOperation>,
}
