//! Reversible edit commands and the undo/redo history that records them.
//!
//! A [`LeafCommand`] saves one [`EditOperation`](keel_primitives::EditOperation)
//! through a [`SaveApi`] and undoes it by saving the inverse. A
//! [`BatchCommand`] groups children into one all-or-nothing unit.
//! [`CommandHistory`] executes commands and keeps a bounded, linear undo
//! stack with a redo tail.

pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod history;

#[cfg(test)]
mod testing;

pub use command::{BatchCommand, Command, CommandMetadata, LeafCommand, SaveApi, SaveReceipt, SharedSaveApi};
pub use config::HistoryConfig;
pub use error::{CommandError, HistoryError, Result};
pub use events::{HistoryEvent, HistoryState};
pub use history::CommandHistory;
