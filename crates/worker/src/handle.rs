use std::fmt;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::join_error_panic_message;

/// Owned handle for a cancellable background loop.
///
/// Dropping the handle requests cancellation without waiting for the loop to
/// exit; [`WorkerHandle::shutdown`] cancels and waits.
pub struct WorkerHandle {
	name: String,
	cancel: CancellationToken,
	join: Option<JoinHandle<()>>,
}

impl fmt::Debug for WorkerHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WorkerHandle")
			.field("name", &self.name)
			.field("cancelled", &self.cancel.is_cancelled())
			.finish()
	}
}

impl WorkerHandle {
	pub(crate) fn new(name: String, cancel: CancellationToken, join: JoinHandle<()>) -> Self {
		Self {
			name,
			cancel,
			join: Some(join),
		}
	}

	/// Returns the worker name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Requests cancellation without waiting.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Returns `true` once the loop has exited.
	pub fn is_finished(&self) -> bool {
		self.join.as_ref().is_none_or(JoinHandle::is_finished)
	}

	/// Cancels the loop and waits for it to exit.
	pub async fn shutdown(mut self) {
		self.cancel.cancel();
		let Some(join) = self.join.take() else {
			return;
		};
		match join.await {
			Ok(()) => tracing::debug!(worker = %self.name, "worker.shutdown"),
			Err(err) => {
				let panic = join_error_panic_message(err);
				tracing::warn!(worker = %self.name, panic = ?panic, "worker.shutdown_failed");
			}
		}
	}
}

impl Drop for WorkerHandle {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}
