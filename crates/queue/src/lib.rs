//! Local-first change queue.
//!
//! [`LocalChangeQueue`] buffers edits per target, persists a full snapshot to
//! [`Storage`] after every mutation, coalesces repeated edits to the same
//! target and flushes pending entries as batches through the request layer.
//!
//! ```text
//!            add ──► pending ──flush──► processing ──ok──► removed (delivered)
//!                       ▲                    │
//!                       └──── retry < max ◄──┴──fail──► retry >= max ──► dead letter
//! ```

pub mod change;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod queue;
pub mod storage;

pub use change::{AddOutcome, BatchPayload, ChangeStatus, NewChange, QueuedChange};
pub use config::QueueConfig;
pub use connectivity::{AlwaysOnline, Connectivity, ConnectivityMonitor, SharedConnectivity};
pub use error::{FlushError, QueueError, Result, StorageError};
pub use events::QueueEvent;
pub use queue::{FlushReport, LocalChangeQueue, QueueParts, QueueStats};
pub use storage::{FileStorage, MemoryStorage, SharedStorage, Storage};
