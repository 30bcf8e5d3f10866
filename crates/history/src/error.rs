use keel_queue::QueueError;
use keel_transport::RequestError;
use thiserror::Error;

/// Failure of a single command's execute or undo.
#[derive(Debug, Error)]
pub enum CommandError {
	#[error(transparent)]
	Request(#[from] RequestError),
	#[error(transparent)]
	Queue(#[from] QueueError),
	#[error("rejected: {0}")]
	Rejected(String),
}

/// Error returned by [`CommandHistory`](crate::CommandHistory).
#[derive(Debug, Error)]
pub enum HistoryError {
	#[error("nothing to undo")]
	NothingToUndo,
	#[error("nothing to redo")]
	NothingToRedo,
	#[error(transparent)]
	Command(#[from] CommandError),
	#[error("no open batch {id:?}")]
	UnknownBatch { id: String },
	#[error("batch {id:?} is already open")]
	BatchExists { id: String },
}

impl HistoryError {
	/// Returns `true` for the empty-stack cases that change nothing.
	pub fn is_noop(&self) -> bool {
		matches!(self, Self::NothingToUndo | Self::NothingToRedo)
	}
}

pub type Result<T, E = HistoryError> = std::result::Result<T, E>;
