//! Request layer of the save pipeline.
//!
//! * [`Transport`]: the consumed `send(request) -> response` primitive
//! * [`RetryingClient`]: per-attempt timeout plus exponential backoff for
//!   retryable failures
//! * [`RequestDeduplicator`]: collapses concurrent calls sharing a logical key
//!   into one in-flight call
//!
//! # Error classification
//!
//! | failure                                   | class     |
//! |-------------------------------------------|-----------|
//! | status >= 500                             | retryable |
//! | status 429                                | retryable |
//! | other 4xx                                 | terminal  |
//! | connection refused, timeout, DNS, I/O     | retryable |
//! | deduplicated leader vanished              | terminal  |

pub mod config;
pub mod dedup;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod request;
pub mod retry;
pub mod transport;

pub use config::ClientConfig;
pub use dedup::{RequestDeduplicator, batch_key, save_key};
pub use error::{ErrorClass, RequestError, Result, TransportError, TransportErrorKind};
pub use request::{Method, Request, Response};
pub use retry::{RequestOptions, RetryingClient};
pub use transport::{SharedTransport, Transport};
