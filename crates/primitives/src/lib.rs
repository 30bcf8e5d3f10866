//! Core types shared by every layer of the save pipeline.

/// Wall-clock abstraction used for ids, timestamps and metadata.
pub mod clock;
/// Edit operations as they travel over the wire.
pub mod edit;
/// Stable identifiers for edited content.
pub mod target;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use edit::{EditOperation, OperationType};
pub use target::TargetKey;
