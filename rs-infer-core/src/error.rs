use thiserror::Error;

use crate::engine::EngineError;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors reported by a [`GenerationSession`](crate::session::GenerationSession).
///
/// Lifecycle and configuration errors are returned before any engine handle
/// is acquired. Errors raised while generating are delivered through the
/// completion stream, after the request's handles have been released.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
	#[error("model is already loaded")]
	AlreadyLoaded,

	#[error("model is not loaded")]
	ModelNotLoaded,

	/// The engine entry points could not be reached.
	#[error("native method not found: {0}")]
	NativeLink(String),

	#[error("load failed: {0}")]
	Load(EngineError),

	/// Cursor or sampler acquisition failed.
	#[error("could not prepare generation: {0}")]
	Acquire(EngineError),

	#[error("generation failed: {0}")]
	Decode(EngineError),

	/// The worker running an engine call panicked or was cancelled.
	#[error("engine worker failed: {0}")]
	Worker(String),
}

impl SessionError {
	/// Classifies an engine failure raised by `load`.
	pub(crate) fn from_load(err: EngineError) -> Self {
		match err {
			EngineError::Link(message) => SessionError::NativeLink(message),
			other => SessionError::Load(other),
		}
	}
}

impl From<tokio::task::JoinError> for SessionError {
	fn from(err: tokio::task::JoinError) -> Self {
		SessionError::Worker(err.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn link_failures_are_reported_as_native_link() {
		let err = SessionError::from_load(EngineError::Link("init".to_owned()));
		assert_eq!(err, SessionError::NativeLink("init".to_owned()));
		assert_eq!(err.to_string(), "native method not found: init");
	}

	#[test]
	fn other_load_failures_keep_the_engine_error() {
		let err = SessionError::from_load(EngineError::NotLoaded);
		assert_eq!(err, SessionError::Load(EngineError::NotLoaded));
	}
}
