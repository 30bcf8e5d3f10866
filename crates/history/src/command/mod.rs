//! Reversible commands.
//!
//! Commands own their own applied/unapplied state; [`CommandHistory`] only
//! moves a cursor over them.
//!
//! [`CommandHistory`]: crate::CommandHistory

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_primitives::{EditOperation, TargetKey};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::CommandError;

/// How a save was handled by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveReceipt {
	/// Delivered to the server.
	Sent { status: u16 },
	/// Buffered in the local change queue for a later flush.
	Queued { id: String },
}

/// Save endpoint commands write through.
#[async_trait]
pub trait SaveApi: Send + Sync {
	async fn save(&self, operation: EditOperation) -> Result<SaveReceipt, CommandError>;
}

/// Shared save endpoint.
pub type SharedSaveApi = Arc<dyn SaveApi>;

/// Descriptive data attached to every command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMetadata {
	pub timestamp: DateTime<Utc>,
	pub description: String,
	/// Target edited, when the command edits exactly one.
	pub target_key: Option<TargetKey>,
}

impl CommandMetadata {
	pub fn new(description: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
		Self {
			timestamp,
			description: description.into(),
			target_key: None,
		}
	}

	pub fn with_target(mut self, target_key: impl Into<TargetKey>) -> Self {
		self.target_key = Some(target_key.into());
		self
	}
}

/// A reversible unit of work.
#[async_trait]
pub trait Command: Send + Sync {
	fn metadata(&self) -> &CommandMetadata;

	/// Applies the command. Also used to redo it.
	async fn execute(&mut self) -> Result<(), CommandError>;

	/// Reverts a previous [`execute`](Self::execute).
	async fn undo(&mut self) -> Result<(), CommandError>;

	fn can_undo(&self) -> bool;

	fn can_redo(&self) -> bool;

	fn description(&self) -> &str {
		&self.metadata().description
	}
}

/// A single edit, saved forward on execute and as its inverse on undo.
pub struct LeafCommand {
	metadata: CommandMetadata,
	api: SharedSaveApi,
	operation: EditOperation,
	applied: bool,
	last_receipt: Option<SaveReceipt>,
}

impl std::fmt::Debug for LeafCommand {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LeafCommand")
			.field("metadata", &self.metadata)
			.field("operation", &self.operation)
			.field("applied", &self.applied)
			.finish_non_exhaustive()
	}
}

impl LeafCommand {
	pub fn new(api: SharedSaveApi, operation: EditOperation, metadata: CommandMetadata) -> Self {
		Self {
			metadata,
			api,
			operation,
			applied: false,
			last_receipt: None,
		}
	}

	/// Update of `target` from `old_value` to `new_value`.
	pub fn update(
		api: SharedSaveApi,
		target: impl Into<TargetKey>,
		old_value: Value,
		new_value: Value,
		description: impl Into<String>,
		timestamp: DateTime<Utc>,
	) -> Self {
		let target = target.into();
		let metadata = CommandMetadata::new(description, timestamp).with_target(target.clone());
		Self::new(api, EditOperation::update(target, new_value, Some(old_value)), metadata)
	}

	pub fn operation(&self) -> &EditOperation {
		&self.operation
	}

	pub fn is_applied(&self) -> bool {
		self.applied
	}

	/// Receipt of the most recent save, forward or inverse.
	pub fn last_receipt(&self) -> Option<&SaveReceipt> {
		self.last_receipt.as_ref()
	}
}

#[async_trait]
impl Command for LeafCommand {
	fn metadata(&self) -> &CommandMetadata {
		&self.metadata
	}

	async fn execute(&mut self) -> Result<(), CommandError> {
		let receipt = self.api.save(self.operation.clone()).await?;
		trace!(target_key = %self.operation.target_key, receipt = ?receipt, "command.leaf_execute");
		self.last_receipt = Some(receipt);
		self.applied = true;
		Ok(())
	}

	async fn undo(&mut self) -> Result<(), CommandError> {
		let receipt = self.api.save(self.operation.inverse()).await?;
		trace!(target_key = %self.operation.target_key, receipt = ?receipt, "command.leaf_undo");
		self.last_receipt = Some(receipt);
		self.applied = false;
		Ok(())
	}

	fn can_undo(&self) -> bool {
		self.applied
	}

	fn can_redo(&self) -> bool {
		!self.applied
	}
}

/// Ordered group of commands applied and reverted as one unit.
///
/// Execute runs children in order; if one fails, the children that already
/// succeeded are undone in reverse and the failure is returned. Undo runs
/// children in reverse; if one fails, the children already undone are
/// re-executed so the batch stays applied, and the failure is returned.
/// Compensation failures are logged, never returned.
pub struct BatchCommand {
	metadata: CommandMetadata,
	children: Vec<Box<dyn Command>>,
}

impl std::fmt::Debug for BatchCommand {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BatchCommand")
			.field("metadata", &self.metadata)
			.field("children", &self.children.len())
			.finish()
	}
}

impl BatchCommand {
	pub fn new(metadata: CommandMetadata, children: Vec<Box<dyn Command>>) -> Self {
		Self { metadata, children }
	}

	pub fn len(&self) -> usize {
		self.children.len()
	}

	pub fn is_empty(&self) -> bool {
		self.children.is_empty()
	}

	pub fn children(&self) -> &[Box<dyn Command>] {
		&self.children
	}
}

#[async_trait]
impl Command for BatchCommand {
	fn metadata(&self) -> &CommandMetadata {
		&self.metadata
	}

	async fn execute(&mut self) -> Result<(), CommandError> {
		for i in 0..self.children.len() {
			let Err(err) = self.children[i].execute().await else {
				continue;
			};
			warn!(
				batch = %self.metadata.description,
				failed = self.children[i].description(),
				rolled_back = i,
				error = %err,
				"command.batch_rollback"
			);
			for child in self.children[..i].iter_mut().rev() {
				if let Err(undo_err) = child.undo().await {
					warn!(child = child.description(), error = %undo_err, "command.batch_rollback_failed");
				}
			}
			return Err(err);
		}
		debug!(batch = %self.metadata.description, children = self.children.len(), "command.batch_execute");
		Ok(())
	}

	async fn undo(&mut self) -> Result<(), CommandError> {
		for i in (0..self.children.len()).rev() {
			let Err(err) = self.children[i].undo().await else {
				continue;
			};
			warn!(
				batch = %self.metadata.description,
				failed = self.children[i].description(),
				error = %err,
				"command.batch_undo_failed"
			);
			for child in self.children[i + 1..].iter_mut() {
				if let Err(redo_err) = child.execute().await {
					warn!(child = child.description(), error = %redo_err, "command.batch_reapply_failed");
				}
			}
			return Err(err);
		}
		debug!(batch = %self.metadata.description, children = self.children.len(), "command.batch_undo");
		Ok(())
	}

	fn can_undo(&self) -> bool {
		self.children.iter().all(|c| c.can_undo())
	}

	fn can_redo(&self) -> bool {
		self.children.iter().all(|c| c.can_redo())
	}
}
