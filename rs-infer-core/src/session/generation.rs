use std::sync::Arc;

use log::debug;
use tokio::sync::OwnedMutexGuard;

use super::config::GenerationConfig;
use super::generation_session::SessionState;
use super::progress::{FinishReason, GenerationSummary};
use crate::engine::{CursorHandle, EngineError, NativeEngine, SamplerHandle};
use crate::error::SessionError;

/// Outcome of one decode step.
#[derive(Debug)]
pub(crate) enum Step {
	/// Deliver this fragment to the consumer.
	Emit(String),
	/// The stop condition holds; the fragment that triggered it is dropped.
	Stop(FinishReason),
}

/// A validated request holding the session but no engine handle yet.
pub(crate) struct PreparedGeneration<E: NativeEngine> {
	engine: Arc<E>,
	state: OwnedMutexGuard<SessionState>,
	prompt: String,
	config: GenerationConfig,
}

impl<E: NativeEngine> PreparedGeneration<E> {
	pub(crate) fn new(
		engine: Arc<E>,
		state: OwnedMutexGuard<SessionState>,
		prompt: String,
		config: GenerationConfig,
	) -> Self {
		Self { engine, state, prompt, config }
	}

	/// Acquires the cursor and the sampler. Blocking.
	///
	/// If the sampler cannot be created, the cursor is released before the
	/// error is returned.
	pub(crate) fn acquire(self) -> Result<Generation<E>, SessionError> {
		let Self { engine, state, prompt, config } = self;

		let handle = engine.new_cursor().map_err(SessionError::Acquire)?;
		let cursor = CursorLease { engine, handle };
		let sampler = cursor
			.engine
			.new_sampler(&prompt, cursor.handle, &config.sampling_params())
			.map_err(SessionError::Acquire)?;
		debug!("acquired {} and {}", cursor.handle, sampler);

		Ok(Generation {
			sampler,
			cursor,
			config,
			fragments_emitted: 0,
			state,
		})
	}
}

/// Cursor owned by a generation, released when dropped.
struct CursorLease<E: NativeEngine> {
	engine: Arc<E>,
	handle: CursorHandle,
}

impl<E: NativeEngine> Drop for CursorLease<E> {
	fn drop(&mut self) {
		self.engine.release_cursor(self.handle);
	}
}

/// A running generation: exclusive access to the session plus both handles.
///
/// Dropping it is the release step, whatever the exit path (stop condition,
/// engine error, panic in a worker, consumer cancellation):
/// 1. the sampler is released
/// 2. progress is reset
/// 3. the cursor is released (`cursor` field)
/// 4. the session lock is released (`state` field, declared last)
pub(crate) struct Generation<E: NativeEngine> {
	sampler: SamplerHandle,
	cursor: CursorLease<E>,
	config: GenerationConfig,
	fragments_emitted: usize,
	state: OwnedMutexGuard<SessionState>,
}

impl<E: NativeEngine> Generation<E> {
	/// Decodes one fragment and evaluates the stop condition. Blocking.
	pub(crate) fn step(&mut self) -> Result<Step, EngineError> {
		// A zero budget allows no decode step at all
		if self.state.progress.tokens_emitted() >= self.config.max_new_tokens {
			return Ok(Step::Stop(FinishReason::MaxNewTokens));
		}

		let fragment = self.cursor.engine.decode_step(self.cursor.handle, self.sampler)?;

		let progress = &mut self.state.progress;
		progress.record(&fragment);
		if let Some(reason) = progress.stop_reason(&self.config) {
			return Ok(Step::Stop(reason));
		}

		self.fragments_emitted += 1;
		Ok(Step::Emit(fragment))
	}

	pub(crate) fn summary(&self, finish_reason: FinishReason) -> GenerationSummary {
		GenerationSummary {
			tokens_decoded: self.state.progress.tokens_emitted(),
			fragments_emitted: self.fragments_emitted,
			finish_reason,
		}
	}
}

impl<E: NativeEngine> Drop for Generation<E> {
	fn drop(&mut self) {
		self.cursor.engine.release_sampler(self.sampler);
		self.state.progress.reset();
		debug!("released {}, releasing {}", self.sampler, self.cursor.handle);
	}
}
