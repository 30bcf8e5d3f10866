/// Undo/redo availability after a history change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryState {
	pub can_undo: bool,
	pub can_redo: bool,
}

/// History notifications, delivered over a broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
	CommandExecuted { description: String, state: HistoryState },
	Undone { description: String, state: HistoryState },
	Redone { description: String, state: HistoryState },
}

impl HistoryEvent {
	pub fn state(&self) -> HistoryState {
		match self {
			Self::CommandExecuted { state, .. } | Self::Undone { state, .. } | Self::Redone { state, .. } => *state,
		}
	}
}
