//! Keel simulation binary.
//!
//! Drives a [`SavePipeline`] against a simulated transport through a fixed
//! scenario: edits while offline, reconnect and flush, undo/redo, a batch
//! with a failing member, and a shutdown. Useful for watching the pipeline's
//! trace output end to end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use keel::{
	Command, ConnectivityMonitor, FileStorage, KeelConfig, MemoryStorage, PipelineParts, SavePipeline, SharedStorage, SystemClock,
};
use keel_transport::mock::{MockReply, MockTransport};
use serde_json::json;
use tracing::{info, warn};

/// Time allowed for the reconnect flush to land.
const SETTLE: Duration = Duration::from_millis(500);

/// Keel command line arguments.
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(about = "Simulate the keel save pipeline against a scripted server")]
struct Args {
	/// TOML configuration file
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Persist the change queue under this directory instead of in memory
	#[arg(short, long, value_name = "DIR")]
	storage_dir: Option<PathBuf>,

	/// Simulated server latency in milliseconds
	#[arg(long, default_value_t = 20)]
	latency_ms: u64,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	setup_tracing(args.verbose);

	let config = match &args.config {
		Some(path) => KeelConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
		None => KeelConfig::default(),
	};
	let storage: SharedStorage = match &args.storage_dir {
		Some(dir) => Arc::new(FileStorage::open(dir).with_context(|| format!("opening storage at {}", dir.display()))?),
		None => Arc::new(MemoryStorage::new()),
	};

	let transport = MockTransport::default();
	transport.set_latency(Duration::from_millis(args.latency_ms));
	let connectivity = Arc::new(ConnectivityMonitor::new(false));
	let pipeline = SavePipeline::new(
		&config,
		PipelineParts {
			transport: Arc::new(transport.clone()),
			storage,
			connectivity: connectivity.clone(),
			clock: Arc::new(SystemClock),
		},
	);

	let restored = pipeline.open().context("restoring change queue")?;
	info!(restored, "keel.start");
	pipeline.start();

	run_scenario(&pipeline, &transport, &connectivity).await?;

	if let Some(send) = pipeline.shutdown().await {
		let _ = send.await;
	}
	let stats = pipeline.queue().stats();
	info!(
		requests = transport.calls(),
		pending = stats.pending,
		delivered = stats.delivered,
		dead_lettered = stats.dead_lettered,
		"keel.done"
	);
	Ok(())
}

async fn run_scenario(pipeline: &SavePipeline, transport: &MockTransport, connectivity: &ConnectivityMonitor) -> anyhow::Result<()> {
	let mut history = pipeline.history();

	info!("scenario.offline_edits");
	history.execute(Box::new(pipeline.leaf("headline", json!("Draft"), json!("Launch"), "edit headline"))).await?;
	history.execute(Box::new(pipeline.leaf("headline", json!("Launch"), json!("Launch day"), "edit headline"))).await?;
	history.execute(Box::new(pipeline.leaf("accent", json!("#000"), json!("#0af"), "change accent"))).await?;
	info!(queued = pipeline.queue().len(), "scenario.queued");

	info!("scenario.reconnect");
	connectivity.set_online(true);
	tokio::time::sleep(SETTLE).await;
	info!(remaining = pipeline.queue().len(), "scenario.flushed");

	info!("scenario.undo_redo");
	history.undo().await?;
	info!(redo = ?history.redo_description(), "scenario.undone");
	history.redo().await?;

	info!("scenario.failing_batch");
	transport.script([MockReply::Status(200), MockReply::Status(422)]);
	history.start_batch("theme", "apply theme")?;
	for (target, value) in [("bg", "#fff"), ("fg", "#111"), ("link", "#06c")] {
		history.add_to_batch("theme", Box::new(pipeline.leaf(target, json!(null), json!(value), format!("set {target}"))))?;
	}
	match history.execute_batch("theme").await {
		Ok(()) => info!("scenario.batch_applied"),
		Err(err) => warn!(error = %err, history_len = history.len(), "scenario.batch_rolled_back"),
	}

	info!("scenario.offline_again");
	connectivity.set_online(false);
	let mut leaf = pipeline.leaf("footer", json!("old"), json!("new"), "edit footer");
	leaf.execute().await?;
	info!(queued = pipeline.queue().len(), "scenario.queued_for_shutdown");
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_env("KEEL_LOG")
		.or_else(|_| EnvFilter::try_from_default_env())
		.unwrap_or_else(|_| {
			if verbose {
				EnvFilter::new("keel=trace,keel_queue=trace,keel_transport=debug,keel_history=debug,info")
			} else {
				EnvFilter::new("keel=info,keel_queue=info,warn")
			}
		});

	tracing_subscriber::fmt().with_env_filter(filter).with_target(verbose).init();
}
