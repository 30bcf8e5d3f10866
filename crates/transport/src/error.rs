use std::fmt;

use thiserror::Error;

/// Category of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
	/// The peer refused the connection.
	ConnectionRefused,
	/// The attempt did not complete in time.
	Timeout,
	/// The host name could not be resolved.
	NameResolution,
	/// Any other I/O failure below the HTTP layer.
	Io,
}

impl TransportErrorKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::ConnectionRefused => "connection refused",
			Self::Timeout => "timed out",
			Self::NameResolution => "name resolution failed",
			Self::Io => "i/o error",
		}
	}
}

impl fmt::Display for TransportErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Failure reported by a [`Transport`](crate::Transport) before any response arrived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
	pub kind: TransportErrorKind,
	pub message: String,
}

impl TransportError {
	pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
		}
	}

	pub fn timeout(message: impl Into<String>) -> Self {
		Self::new(TransportErrorKind::Timeout, message)
	}

	pub fn connection_refused(message: impl Into<String>) -> Self {
		Self::new(TransportErrorKind::ConnectionRefused, message)
	}
}

/// Whether a failed request may be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
	/// Surfaced to the caller immediately.
	Terminal,
	/// Retried with backoff; surfaced only after exhaustion.
	Retryable,
}

/// Error returned by the request layer.
///
/// Cloneable so deduplicated callers can share one outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
	/// The server answered with a non-success status.
	#[error("request failed with status {status}")]
	Status { status: u16, body: String },
	/// No response was received.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// The in-flight call this caller joined ended without publishing a result.
	#[error("in-flight request {key} was abandoned")]
	Abandoned { key: String },
}

impl RequestError {
	/// Classifies this error for retry decisions.
	pub fn class(&self) -> ErrorClass {
		match self {
			Self::Status { status, .. } if *status >= 500 || *status == 429 => ErrorClass::Retryable,
			Self::Status { .. } => ErrorClass::Terminal,
			Self::Transport(_) => ErrorClass::Retryable,
			Self::Abandoned { .. } => ErrorClass::Terminal,
		}
	}

	pub fn is_retryable(&self) -> bool {
		self.class() == ErrorClass::Retryable
	}

	/// HTTP status carried by this error, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Status { status, .. } => Some(*status),
			_ => None,
		}
	}
}

/// Result alias for the request layer.
pub type Result<T, E = RequestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	fn status(code: u16) -> RequestError {
		RequestError::Status {
			status: code,
			body: String::new(),
		}
	}

	#[rstest]
	#[case(status(500), ErrorClass::Retryable)]
	#[case(status(502), ErrorClass::Retryable)]
	#[case(status(503), ErrorClass::Retryable)]
	#[case(status(429), ErrorClass::Retryable)]
	#[case(status(400), ErrorClass::Terminal)]
	#[case(status(401), ErrorClass::Terminal)]
	#[case(status(404), ErrorClass::Terminal)]
	#[case(status(409), ErrorClass::Terminal)]
	#[case(TransportError::connection_refused("refused").into(), ErrorClass::Retryable)]
	#[case(TransportError::timeout("slow").into(), ErrorClass::Retryable)]
	#[case(TransportError::new(TransportErrorKind::NameResolution, "nxdomain").into(), ErrorClass::Retryable)]
	#[case(RequestError::Abandoned { key: "save:t1".into() }, ErrorClass::Terminal)]
	fn classifies_errors(#[case] err: RequestError, #[case] expected: ErrorClass) {
		assert_eq!(err.class(), expected);
	}

	#[test]
	fn transport_error_display_includes_kind() {
		let err = TransportError::timeout("attempt exceeded 30s");
		assert_eq!(err.to_string(), "timed out: attempt exceeded 30s");
	}
}
