//! Background task primitives shared by the save pipeline.
//!
//! Every long-lived task in the pipeline (the queue driver, best-effort
//! shutdown sends, deduplicated request leaders) goes through this crate so
//! spawns carry a [`TaskClass`] in their trace events and so owned background
//! loops can be cancelled through a [`WorkerHandle`].

mod class;
mod handle;
mod panic;
mod spawn;

pub use class::TaskClass;
pub use handle::WorkerHandle;
pub use panic::join_error_panic_message;
pub use spawn::{spawn, spawn_cancellable};
pub use tokio_util::sync::CancellationToken;
