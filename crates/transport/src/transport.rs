use std::sync::Arc;

use async_trait::async_trait;

use crate::{Request, Response, TransportError};

/// Generic network primitive consumed by [`RetryingClient`](crate::RetryingClient).
///
/// Implementations perform exactly one attempt per call. Any HTTP status is a
/// successful transport outcome; classification happens in the client.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn send(&self, request: Request) -> Result<Response, TransportError>;
}

/// Shared transport handle.
pub type SharedTransport = Arc<dyn Transport>;
