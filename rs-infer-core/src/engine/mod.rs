//! Boundary between a generation session and an inference engine.
//!
//! The session never touches model weights, tokenizers or sampling math.
//! It only calls the operations of [`NativeEngine`] and passes around the
//! opaque handles the engine gives back:
//! - [`CursorHandle`]: tracks the decode position of one request
//! - [`SamplerHandle`]: per-request sampling state seeded from the prompt
//!
//! Handles are plain identifiers. Ownership and release are enforced by the
//! session, not by the handle types themselves.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Character n-gram backend implementing [`NativeEngine`] in-process.
pub mod ngram;

pub use ngram::NGramEngine;

/// Errors surfaced by an engine implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
	/// The engine entry points cannot be reached (library missing, symbol not found).
	#[error("native entry point unavailable: {0}")]
	Link(String),

	/// The model file could not be read or initialized.
	#[error("failed to load model: {0}")]
	Load(String),

	/// The engine does not know how to handle this model type tag.
	#[error("unsupported model type '{0}'")]
	UnsupportedModelType(String),

	/// An operation needing a model was called while none is loaded.
	#[error("no model loaded in engine")]
	NotLoaded,

	/// A handle that the engine never issued, or already released.
	#[error("unknown handle {0}")]
	InvalidHandle(u64),

	/// A decode step failed.
	#[error("decode failed: {0}")]
	Decode(String),
}

/// Opaque decode-position handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorHandle(u64);

/// Opaque per-request sampler handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(u64);

impl CursorHandle {
	/// Wraps an engine-issued identifier.
	pub fn from_raw(raw: u64) -> Self {
		Self(raw)
	}

	pub fn raw(&self) -> u64 {
		self.0
	}
}

impl SamplerHandle {
	/// Wraps an engine-issued identifier.
	pub fn from_raw(raw: u64) -> Self {
		Self(raw)
	}

	pub fn raw(&self) -> u64 {
		self.0
	}
}

impl fmt::Display for CursorHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "cursor#{}", self.0)
	}
}

impl fmt::Display for SamplerHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "sampler#{}", self.0)
	}
}

/// Sampling parameters handed to the engine when a sampler is created.
///
/// Values are forwarded exactly as configured. Interpreting out-of-range
/// values (negative temperature, `top_k <= 0`, `top_p` outside `(0, 1)`)
/// is up to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
	pub temperature: f32,
	pub top_k: i32,
	pub top_p: f32,
}

/// Operations a generation session needs from an inference engine.
///
/// All calls may block (model loading, prompt evaluation, decoding), so the
/// session only invokes them from the blocking thread pool. Implementations
/// use interior mutability: a single engine is shared between the session and
/// the worker threads running its calls.
///
/// # Contract
/// - `release_sampler` and `release_cursor` are called exactly once for every
///   handle successfully returned by `new_sampler` / `new_cursor`.
/// - `decode_step` returns one fragment per call. A fragment may be empty or
///   contain several characters.
pub trait NativeEngine: Send + Sync {
	/// Loads the model at `path`, interpreted according to `model_type`.
	fn load(&self, path: &Path, model_type: &str) -> Result<(), EngineError>;

	/// Frees the model and every engine-side resource.
	fn unload(&self);

	/// Allocates a fresh decode position.
	fn new_cursor(&self) -> Result<CursorHandle, EngineError>;

	/// Evaluates `prompt` at `cursor` and returns a sampler ready to decode.
	fn new_sampler(
		&self,
		prompt: &str,
		cursor: CursorHandle,
		params: &SamplingParams,
	) -> Result<SamplerHandle, EngineError>;

	/// Samples and decodes the next fragment, advancing `cursor`.
	fn decode_step(&self, cursor: CursorHandle, sampler: SamplerHandle) -> Result<String, EngineError>;

	fn release_sampler(&self, sampler: SamplerHandle);

	fn release_cursor(&self, cursor: CursorHandle);
}
