//! Local-first save pipeline.
//!
//! [`SavePipeline`] wires the request layer, the local change queue and its
//! flush driver into one [`SaveApi`]: saves go straight to the server while
//! online and into the durable queue while offline. Commands built with
//! [`SavePipeline::leaf`] and executed through a [`CommandHistory`] make
//! those saves undoable.
//!
//! ```text
//! LeafCommand ─► SaveApi ─┬─ online ──► RequestDeduplicator ─► RetryingClient ─► Transport
//!                         └─ offline ─► LocalChangeQueue ──(driver flush)──────────┘
//! ```

pub mod config;
pub mod pipeline;

pub use config::{ConfigError, KeelConfig};
pub use keel_history::{
	BatchCommand, Command, CommandError, CommandHistory, CommandMetadata, HistoryConfig, HistoryError, HistoryEvent, HistoryState, LeafCommand, SaveApi,
	SaveReceipt, SharedSaveApi,
};
pub use keel_primitives::{Clock, EditOperation, ManualClock, OperationType, SharedClock, SystemClock, TargetKey};
pub use keel_queue::{
	AddOutcome, AlwaysOnline, ChangeStatus, Connectivity, ConnectivityMonitor, FileStorage, FlushError, FlushReport, LocalChangeQueue, MemoryStorage,
	QueueConfig, QueueError, QueueEvent, QueueStats, QueuedChange, SharedConnectivity, SharedStorage, Storage, StorageError,
};
pub use keel_transport::{
	ClientConfig, ErrorClass, Method, Request, RequestDeduplicator, RequestError, RequestOptions, Response, RetryingClient, SharedTransport, Transport,
	TransportError, TransportErrorKind,
};
pub use pipeline::{PipelineParts, SavePipeline};
