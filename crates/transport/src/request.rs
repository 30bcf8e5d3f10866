use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// HTTP-style request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
	Get,
	Post,
	Put,
	Delete,
}

impl Method {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Delete => "DELETE",
		}
	}
}

impl fmt::Display for Method {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single logical request handed to a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
	pub method: Method,
	pub path: String,
	pub headers: Vec<(String, String)>,
	pub body: Bytes,
	/// Per-attempt deadline, filled in by the client before each attempt.
	pub timeout: Option<Duration>,
}

impl Request {
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			headers: Vec::new(),
			body: Bytes::new(),
			timeout: None,
		}
	}

	/// Builds a `POST` carrying `body` serialized as JSON.
	pub fn post_json<T: Serialize + ?Sized>(path: impl Into<String>, body: &T) -> serde_json::Result<Self> {
		let bytes = serde_json::to_vec(body)?;
		Ok(Self::new(Method::Post, path)
			.with_header("content-type", "application/json")
			.with_body(bytes))
	}

	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
		self.body = body.into();
		self
	}

	/// Decodes the request body as JSON.
	pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
		serde_json::from_slice(&self.body)
	}
}

/// Response returned by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
	pub status: u16,
	pub body: Bytes,
}

impl Response {
	pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
		Self {
			status,
			body: body.into(),
		}
	}

	/// Returns `true` for statuses below 400.
	pub fn is_success(&self) -> bool {
		self.status < 400
	}

	/// Decodes the response body as JSON.
	pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
		serde_json::from_slice(&self.body)
	}

	/// Body as lossy UTF-8, for error reporting.
	pub fn body_text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}
