//! Scripted in-memory [`Transport`] for tests and simulations.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{Request, Response, Transport, TransportError, TransportErrorKind};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
	/// Respond with a status and an empty body.
	Status(u16),
	/// Respond with a status and a JSON body.
	Json(u16, serde_json::Value),
	/// Fail below the response layer.
	Fail(TransportErrorKind),
	/// Never complete.
	Hang,
}

impl MockReply {
	fn into_result(self) -> Option<Result<Response, TransportError>> {
		match self {
			Self::Status(status) => Some(Ok(Response::new(status, Bytes::new()))),
			Self::Json(status, body) => Some(Ok(Response::new(status, body.to_string()))),
			Self::Fail(kind) => Some(Err(TransportError::new(kind, "mock transport failure"))),
			Self::Hang => None,
		}
	}
}

#[derive(Debug)]
struct MockState {
	script: VecDeque<MockReply>,
	fallback: MockReply,
	latency: Duration,
	requests: Vec<Request>,
}

/// Transport that replays scripted replies and records every request.
///
/// Once the script is exhausted every request gets the fallback reply.
#[derive(Debug, Clone)]
pub struct MockTransport {
	state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
	fn default() -> Self {
		Self::new(MockReply::Status(200))
	}
}

impl MockTransport {
	pub fn new(fallback: MockReply) -> Self {
		Self {
			state: Arc::new(Mutex::new(MockState {
				script: VecDeque::new(),
				fallback,
				latency: Duration::ZERO,
				requests: Vec::new(),
			})),
		}
	}

	/// Appends replies consumed in order before the fallback applies.
	pub fn script(&self, replies: impl IntoIterator<Item = MockReply>) -> &Self {
		self.state.lock().script.extend(replies);
		self
	}

	pub fn push(&self, reply: MockReply) -> &Self {
		self.state.lock().script.push_back(reply);
		self
	}

	pub fn set_fallback(&self, reply: MockReply) {
		self.state.lock().fallback = reply;
	}

	/// Delay applied before every reply.
	pub fn set_latency(&self, latency: Duration) {
		self.state.lock().latency = latency;
	}

	pub fn calls(&self) -> usize {
		self.state.lock().requests.len()
	}

	pub fn requests(&self) -> Vec<Request> {
		self.state.lock().requests.clone()
	}

	pub fn last_request(&self) -> Option<Request> {
		self.state.lock().requests.last().cloned()
	}

	pub fn requests_to(&self, path: &str) -> Vec<Request> {
		self.state.lock().requests.iter().filter(|r| r.path == path).cloned().collect()
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn send(&self, request: Request) -> Result<Response, TransportError> {
		let (reply, latency) = {
			let mut state = self.state.lock();
			state.requests.push(request);
			let reply = state.script.pop_front().unwrap_or_else(|| state.fallback.clone());
			(reply, state.latency)
		};

		if !latency.is_zero() {
			tokio::time::sleep(latency).await;
		}
		match reply.into_result() {
			Some(result) => result,
			None => std::future::pending().await,
		}
	}
}
