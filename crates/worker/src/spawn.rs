use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{TaskClass, WorkerHandle};

fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("keel-worker-global")
			.build()
			.expect("failed to build keel-worker global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async task with worker classification metadata.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn");
	runtime_handle().spawn(fut)
}

/// Spawns a named loop that receives a cancellation token.
///
/// The returned handle cancels the token when shut down or dropped; the loop
/// is expected to observe the token and exit.
pub fn spawn_cancellable<F, Fut>(class: TaskClass, name: impl Into<String>, f: F) -> WorkerHandle
where
	F: FnOnce(CancellationToken) -> Fut,
	Fut: Future<Output = ()> + Send + 'static,
{
	let name = name.into();
	let cancel = CancellationToken::new();
	tracing::trace!(worker_class = class.as_str(), worker = %name, "worker.spawn_cancellable");
	let join = runtime_handle().spawn(f(cancel.child_token()));
	WorkerHandle::new(name, cancel, join)
}
