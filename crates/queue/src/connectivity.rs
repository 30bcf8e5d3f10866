//! Online/offline signal consumed by the queue.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Source of connectivity state.
pub trait Connectivity: Send + Sync {
	fn is_online(&self) -> bool;

	/// Receiver that observes every online/offline transition.
	fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Shared connectivity handle.
pub type SharedConnectivity = Arc<dyn Connectivity>;

/// Connectivity driven by whoever owns the monitor (platform hooks, tests, CLI).
#[derive(Debug)]
pub struct ConnectivityMonitor {
	tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
	pub fn new(online: bool) -> Self {
		let (tx, _rx) = watch::channel(online);
		Self { tx }
	}

	/// Records a transition; repeated reports of the same state are ignored.
	pub fn set_online(&self, online: bool) {
		let changed = self.tx.send_if_modified(|current| {
			if *current == online {
				return false;
			}
			*current = online;
			true
		});
		if changed {
			info!(online, "connectivity.changed");
		}
	}
}

impl Default for ConnectivityMonitor {
	fn default() -> Self {
		Self::new(true)
	}
}

impl Connectivity for ConnectivityMonitor {
	fn is_online(&self) -> bool {
		*self.tx.borrow()
	}

	fn subscribe(&self) -> watch::Receiver<bool> {
		self.tx.subscribe()
	}
}

/// Connectivity that never goes offline.
#[derive(Debug)]
pub struct AlwaysOnline {
	tx: watch::Sender<bool>,
}

impl Default for AlwaysOnline {
	fn default() -> Self {
		let (tx, _rx) = watch::channel(true);
		Self { tx }
	}
}

impl Connectivity for AlwaysOnline {
	fn is_online(&self) -> bool {
		true
	}

	fn subscribe(&self) -> watch::Receiver<bool> {
		self.tx.subscribe()
	}
}
