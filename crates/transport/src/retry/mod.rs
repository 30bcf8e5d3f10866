//! Timeout and exponential-backoff retry around a [`Transport`].
//!
//! Each attempt is bounded by [`RequestOptions::timeout`]; an elapsed attempt
//! is dropped and counted as a retryable transport timeout. Retryable failures
//! are retried up to [`RequestOptions::retries`] times, waiting
//! `retry_delay * 2^n` before retry `n`. Terminal failures return on the spot,
//! and exhaustion returns the last error unchanged.
//!
//! ```text
//! attempt 0 ──fail──► sleep(d) ──► attempt 1 ──fail──► sleep(2d) ──► attempt 2 ...
//!     │                                │
//!   4xx ─► terminal                  ok ─► Response
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::{Request, RequestError, Response, Result, Transport, TransportError};

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries after the first attempt.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default base backoff delay.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Timeout and retry settings for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
	pub timeout: Duration,
	pub retries: u32,
	pub retry_delay: Duration,
}

impl Default for RequestOptions {
	fn default() -> Self {
		Self {
			timeout: DEFAULT_TIMEOUT,
			retries: DEFAULT_RETRIES,
			retry_delay: DEFAULT_RETRY_DELAY,
		}
	}
}

impl RequestOptions {
	/// Single attempt, no retries.
	pub fn once(timeout: Duration) -> Self {
		Self {
			timeout,
			retries: 0,
			retry_delay: Duration::ZERO,
		}
	}

	/// Delay before retry `attempt` (0-indexed): `retry_delay * 2^attempt`, saturating.
	pub fn backoff(&self, attempt: u32) -> Duration {
		let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
		self.retry_delay.saturating_mul(factor)
	}

	/// Total attempts including the first.
	pub fn attempts(&self) -> u32 {
		self.retries.saturating_add(1)
	}
}

/// Stateless client applying [`RequestOptions`] to every send.
#[derive(Clone)]
pub struct RetryingClient {
	transport: Arc<dyn Transport>,
	options: RequestOptions,
}

impl std::fmt::Debug for RetryingClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RetryingClient").field("options", &self.options).finish()
	}
}

impl RetryingClient {
	pub fn new(transport: Arc<dyn Transport>, options: RequestOptions) -> Self {
		Self { transport, options }
	}

	/// Default options used by [`Self::send`].
	pub fn options(&self) -> RequestOptions {
		self.options
	}

	/// Underlying transport.
	pub fn transport(&self) -> &Arc<dyn Transport> {
		&self.transport
	}

	/// Sends with the client's default options.
	pub async fn send(&self, request: Request) -> Result<Response> {
		self.send_with(request, self.options).await
	}

	/// Sends with explicit options.
	pub async fn send_with(&self, request: Request, options: RequestOptions) -> Result<Response> {
		let mut attempt = 0u32;
		loop {
			let err = match self.attempt(&request, options.timeout).await {
				Ok(response) => {
					trace!(path = %request.path, attempt, status = response.status, "client.response");
					return Ok(response);
				}
				Err(err) => err,
			};

			if !err.is_retryable() {
				debug!(path = %request.path, attempt, error = %err, "client.terminal");
				return Err(err);
			}
			if attempt >= options.retries {
				warn!(path = %request.path, attempts = options.attempts(), error = %err, "client.exhausted");
				return Err(err);
			}

			let delay = options.backoff(attempt);
			debug!(
				path = %request.path,
				attempt,
				delay_ms = delay.as_millis() as u64,
				error = %err,
				"client.retry"
			);
			tokio::time::sleep(delay).await;
			attempt += 1;
		}
	}

	async fn attempt(&self, request: &Request, timeout: Duration) -> Result<Response> {
		let mut request = request.clone();
		request.timeout = Some(timeout);
		let path = request.path.clone();

		match tokio::time::timeout(timeout, self.transport.send(request)).await {
			Err(_) => Err(TransportError::timeout(format!("{path} exceeded {}ms", timeout.as_millis())).into()),
			Ok(Err(err)) => Err(err.into()),
			Ok(Ok(response)) if response.is_success() => Ok(response),
			Ok(Ok(response)) => Err(RequestError::Status {
				status: response.status,
				body: response.body_text(),
			}),
		}
	}
}
