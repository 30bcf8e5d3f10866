use std::sync::Arc;

use async_trait::async_trait;
use keel_history::{CommandError, CommandHistory, HistoryConfig, LeafCommand, SaveApi, SaveReceipt, SharedSaveApi};
use keel_primitives::{EditOperation, SharedClock, TargetKey};
use keel_queue::{LocalChangeQueue, NewChange, QueueError, QueueParts, SharedConnectivity, SharedStorage};
use keel_transport::{Request, RequestDeduplicator, RetryingClient, SharedTransport, save_key};
use keel_worker::WorkerHandle;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::KeelConfig;

/// External collaborators a pipeline runs against.
pub struct PipelineParts {
	pub transport: SharedTransport,
	pub storage: SharedStorage,
	pub connectivity: SharedConnectivity,
	pub clock: SharedClock,
}

/// Save endpoint that sends while online and queues while offline.
///
/// Cheap to clone; clones share the client, deduplicator, queue and driver.
#[derive(Clone)]
pub struct SavePipeline {
	client: RetryingClient,
	dedup: RequestDeduplicator,
	queue: LocalChangeQueue,
	connectivity: SharedConnectivity,
	clock: SharedClock,
	save_path: Arc<str>,
	history: HistoryConfig,
	driver: Arc<Mutex<Option<WorkerHandle>>>,
}

impl std::fmt::Debug for SavePipeline {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SavePipeline")
			.field("save_path", &self.save_path)
			.field("queue", &self.queue)
			.field("running", &self.is_running())
			.finish_non_exhaustive()
	}
}

impl SavePipeline {
	pub fn new(config: &KeelConfig, parts: PipelineParts) -> Self {
		let client = RetryingClient::new(parts.transport, config.client.request_options());
		let dedup = RequestDeduplicator::new();
		let queue = LocalChangeQueue::new(
			config.queue.clone(),
			QueueParts {
				client: client.clone(),
				dedup: dedup.clone(),
				storage: parts.storage,
				connectivity: parts.connectivity.clone(),
				clock: parts.clock.clone(),
			},
		);
		Self {
			client,
			dedup,
			queue,
			connectivity: parts.connectivity,
			clock: parts.clock,
			save_path: Arc::from(config.save_path.as_str()),
			history: config.history.clone(),
			driver: Arc::new(Mutex::new(None)),
		}
	}

	pub fn queue(&self) -> &LocalChangeQueue {
		&self.queue
	}

	pub fn client(&self) -> &RetryingClient {
		&self.client
	}

	pub fn dedup(&self) -> &RequestDeduplicator {
		&self.dedup
	}

	/// This pipeline as a shareable [`SaveApi`].
	pub fn api(&self) -> SharedSaveApi {
		Arc::new(self.clone())
	}

	/// Restores the persisted queue. Returns the number of entries loaded.
	pub fn open(&self) -> Result<usize, QueueError> {
		let restored = self.queue.restore()?;
		info!(restored, save_path = %self.save_path, "pipeline.open");
		Ok(restored)
	}

	/// Starts the queue flush driver if it is not already running.
	pub fn start(&self) {
		let mut driver = self.driver.lock();
		if driver.is_none() {
			*driver = Some(self.queue.start());
			debug!("pipeline.start");
		}
	}

	pub fn is_running(&self) -> bool {
		self.driver.lock().as_ref().is_some_and(|d| !d.is_finished())
	}

	/// Stops the driver, persists the queue and fires the best-effort
	/// shutdown send. Returns that send's task, if one was started.
	pub async fn shutdown(&self) -> Option<JoinHandle<()>> {
		let driver = self.driver.lock().take();
		if let Some(driver) = driver {
			driver.shutdown().await;
		}
		let send = self.queue.suspend();
		info!(pending = self.queue.len(), sent = send.is_some(), "pipeline.shutdown");
		send
	}

	/// Empty history sized from this pipeline's configuration.
	pub fn history(&self) -> CommandHistory {
		CommandHistory::new(&self.history, self.clock.clone())
	}

	/// Command updating `target` from `old_value` to `new_value` through this pipeline.
	pub fn leaf(&self, target: impl Into<TargetKey>, old_value: Value, new_value: Value, description: impl Into<String>) -> LeafCommand {
		LeafCommand::update(self.api(), target, old_value, new_value, description, self.clock.now())
	}
}

#[async_trait]
impl SaveApi for SavePipeline {
	async fn save(&self, operation: EditOperation) -> Result<SaveReceipt, CommandError> {
		// An unsent queued edit for this target would land after a direct
		// send, so later edits follow it through the queue.
		let online = self.connectivity.is_online();
		if !online || self.queue.has_unsent(&operation.target_key) {
			let target_key = operation.target_key.clone();
			let outcome = self.queue.add(NewChange::from(operation))?;
			debug!(target_key = %target_key, id = outcome.id(), online, "pipeline.save_queued");
			return Ok(SaveReceipt::Queued { id: outcome.id().to_string() });
		}

		let key = save_key(&operation.target_key);
		let request = Request::post_json(&*self.save_path, &operation).map_err(|err| CommandError::Rejected(format!("unencodable operation: {err}")))?;
		let client = self.client.clone();
		let response = self.dedup.call(key, move || async move { client.send(request).await }).await?;
		debug!(target_key = %operation.target_key, status = response.status, "pipeline.save_sent");
		Ok(SaveReceipt::Sent { status: response.status })
	}
}
