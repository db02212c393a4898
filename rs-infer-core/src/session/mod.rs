//! Generation sessions.
//!
//! A session drives an engine through one generation at a time:
//! - Sparse configuration (`GenerationConfig`, `ParamOverrides`)
//! - Stop evaluation (`GenerationProgress`)
//! - Handle ownership and teardown (internal `Generation`)
//! - Fragment delivery (`CompletionStream`)
//! - Lifecycle and exclusivity (`GenerationSession`)

/// Generation configuration and sparse overrides.
pub mod config;

/// Scoped ownership of the engine handles of one request.
mod generation;

/// The session type: lifecycle, configuration and request entry point.
pub mod generation_session;

/// Per-request progress and stop conditions.
pub mod progress;

/// Pull-based stream of fragments.
pub mod stream;

pub use config::{GenerationConfig, ParamOverrides, PromptTemplate};
pub use generation_session::GenerationSession;
pub use progress::{FinishReason, GenerationProgress, GenerationSummary};
pub use stream::CompletionStream;
