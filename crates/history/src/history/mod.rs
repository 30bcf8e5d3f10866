//! Linear undo/redo history over executed commands.
//!
//! ```text
//!   commands:  [c0] [c1] [c2] [c3]
//!                         ▲
//!                  applied = 3 (current_index = 2)
//!   undo -> c2.undo(), applied = 2      redo -> c3.execute(), applied = 4
//! ```
//!
//! Executing a new command drops the redo tail. The history is single-writer:
//! every mutating method takes `&mut self`.

use std::collections::VecDeque;

use keel_primitives::SharedClock;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{BatchCommand, Command, CommandMetadata, HistoryConfig, HistoryError, HistoryEvent, HistoryState, Result};

const EVENT_CAPACITY: usize = 64;

/// Commands collected under an open batch id.
struct OpenBatch {
	description: String,
	commands: Vec<Box<dyn Command>>,
}

/// Bounded undo/redo stack of executed commands.
pub struct CommandHistory {
	commands: VecDeque<Box<dyn Command>>,
	/// Number of commands currently applied; `current_index() == applied - 1`.
	applied: usize,
	max_size: usize,
	batches: FxHashMap<String, OpenBatch>,
	clock: SharedClock,
	events: broadcast::Sender<HistoryEvent>,
}

impl std::fmt::Debug for CommandHistory {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CommandHistory")
			.field("len", &self.commands.len())
			.field("applied", &self.applied)
			.field("max_size", &self.max_size)
			.field("open_batches", &self.batches.len())
			.finish()
	}
}

impl CommandHistory {
	pub fn new(config: &HistoryConfig, clock: SharedClock) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self {
			commands: VecDeque::new(),
			applied: 0,
			max_size: config.max_size.max(1),
			batches: FxHashMap::default(),
			clock,
			events,
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
		self.events.subscribe()
	}

	pub fn len(&self) -> usize {
		self.commands.len()
	}

	pub fn is_empty(&self) -> bool {
		self.commands.is_empty()
	}

	/// Index of the most recently applied command, `None` when nothing is applied.
	pub fn current_index(&self) -> Option<usize> {
		self.applied.checked_sub(1)
	}

	pub fn can_undo(&self) -> bool {
		self.undo_target().is_some_and(|cmd| cmd.can_undo())
	}

	pub fn can_redo(&self) -> bool {
		self.redo_target().is_some_and(|cmd| cmd.can_redo())
	}

	pub fn undo_description(&self) -> Option<&str> {
		self.undo_target().map(|cmd| cmd.description())
	}

	pub fn redo_description(&self) -> Option<&str> {
		self.redo_target().map(|cmd| cmd.description())
	}

	pub fn state(&self) -> HistoryState {
		HistoryState {
			can_undo: self.can_undo(),
			can_redo: self.can_redo(),
		}
	}

	/// Executes `command` and records it as the newest entry.
	///
	/// On failure the history is left untouched and the command is dropped.
	pub async fn execute(&mut self, mut command: Box<dyn Command>) -> Result<()> {
		command.execute().await?;

		let dropped_redo = self.commands.len() - self.applied;
		self.commands.truncate(self.applied);
		self.commands.push_back(command);
		self.applied += 1;

		let mut trimmed = 0;
		while self.commands.len() > self.max_size {
			self.commands.pop_front();
			self.applied -= 1;
			trimmed += 1;
		}

		let description = self.newest_description();
		debug!(description = %description, dropped_redo, trimmed, len = self.commands.len(), "history.execute");
		self.emit(HistoryEvent::CommandExecuted {
			description,
			state: self.state(),
		});
		Ok(())
	}

	/// Reverts the command at the cursor and moves the cursor back.
	pub async fn undo(&mut self) -> Result<()> {
		let idx = self.applied.checked_sub(1).ok_or(HistoryError::NothingToUndo)?;
		let command = &mut self.commands[idx];
		if !command.can_undo() {
			return Err(HistoryError::NothingToUndo);
		}
		command.undo().await?;
		let description = command.description().to_string();
		self.applied = idx;

		debug!(description = %description, current_index = ?self.current_index(), "history.undo");
		self.emit(HistoryEvent::Undone {
			description,
			state: self.state(),
		});
		Ok(())
	}

	/// Re-applies the command after the cursor and moves the cursor forward.
	pub async fn redo(&mut self) -> Result<()> {
		let idx = self.applied;
		let Some(command) = self.commands.get(idx) else {
			return Err(HistoryError::NothingToRedo);
		};
		if !command.can_redo() {
			return Err(HistoryError::NothingToRedo);
		}
		self.applied = idx + 1;
		if let Err(err) = self.commands[idx].execute().await {
			self.applied = idx;
			return Err(err.into());
		}
		let description = self.commands[idx].description().to_string();

		debug!(description = %description, current_index = ?self.current_index(), "history.redo");
		self.emit(HistoryEvent::Redone {
			description,
			state: self.state(),
		});
		Ok(())
	}

	/// Drops every recorded command and any open batches.
	pub fn clear(&mut self) {
		self.commands.clear();
		self.applied = 0;
		self.batches.clear();
		debug!("history.clear");
	}

	/// Opens a batch collecting commands under `id`.
	pub fn start_batch(&mut self, id: impl Into<String>, description: impl Into<String>) -> Result<()> {
		let id = id.into();
		if self.batches.contains_key(&id) {
			return Err(HistoryError::BatchExists { id });
		}
		let description = description.into();
		debug!(batch = %id, description = %description, "history.batch_start");
		self.batches.insert(
			id,
			OpenBatch {
				description,
				commands: Vec::new(),
			},
		);
		Ok(())
	}

	/// Adds a not-yet-executed command to an open batch.
	pub fn add_to_batch(&mut self, id: &str, command: Box<dyn Command>) -> Result<()> {
		let batch = self.batches.get_mut(id).ok_or_else(|| HistoryError::UnknownBatch { id: id.to_string() })?;
		batch.commands.push(command);
		Ok(())
	}

	/// Closes a batch and executes its commands as one [`BatchCommand`].
	///
	/// An empty batch is discarded without touching the history.
	pub async fn execute_batch(&mut self, id: &str) -> Result<()> {
		let batch = self.batches.remove(id).ok_or_else(|| HistoryError::UnknownBatch { id: id.to_string() })?;
		if batch.commands.is_empty() {
			debug!(batch = %id, "history.batch_empty");
			return Ok(());
		}
		let metadata = CommandMetadata::new(batch.description, self.clock.now());
		self.execute(Box::new(BatchCommand::new(metadata, batch.commands))).await
	}

	/// Discards an open batch, returning how many commands it held.
	pub fn cancel_batch(&mut self, id: &str) -> Result<usize> {
		let batch = self.batches.remove(id).ok_or_else(|| HistoryError::UnknownBatch { id: id.to_string() })?;
		debug!(batch = %id, discarded = batch.commands.len(), "history.batch_cancel");
		Ok(batch.commands.len())
	}

	pub fn has_batch(&self, id: &str) -> bool {
		self.batches.contains_key(id)
	}

	fn undo_target(&self) -> Option<&dyn Command> {
		let idx = self.applied.checked_sub(1)?;
		self.commands.get(idx).map(|cmd| cmd.as_ref())
	}

	fn redo_target(&self) -> Option<&dyn Command> {
		self.commands.get(self.applied).map(|cmd| cmd.as_ref())
	}

	fn newest_description(&self) -> String {
		self.commands.back().map(|cmd| cmd.description().to_string()).unwrap_or_default()
	}

	fn emit(&self, event: HistoryEvent) {
		let _ = self.events.send(event);
	}
}
