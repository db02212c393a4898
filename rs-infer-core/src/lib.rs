//! Streaming text generation over an inference engine.
//!
//! This crate provides:
//! - An engine boundary (`NativeEngine`) with opaque cursor/sampler handles
//! - A generation session enforcing one generation at a time, sparse
//!   parameter overrides, stop phrases and token budgets
//! - A pull-based stream of fragments that releases engine handles on every
//!   exit path (stop, error, panic, cancellation)
//! - A character n-gram engine to run sessions without a native library

/// Engine boundary and the n-gram reference engine.
pub mod engine;

/// Errors reported by sessions.
pub mod error;

/// Generation sessions and completion streams.
pub mod session;

/// I/O utilities (corpus reading, path helpers).
///
/// Not exposed
pub(crate) mod io;

pub use engine::{CursorHandle, EngineError, NGramEngine, NativeEngine, SamplerHandle, SamplingParams};
pub use error::{Result, SessionError};
pub use session::{
	CompletionStream, FinishReason, GenerationConfig, GenerationProgress, GenerationSession, GenerationSummary,
	ParamOverrides, PromptTemplate,
};
