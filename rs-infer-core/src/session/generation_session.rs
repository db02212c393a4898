use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

use super::config::{GenerationConfig, ParamOverrides, PromptTemplate};
use super::generation::PreparedGeneration;
use super::progress::GenerationProgress;
use super::stream::CompletionStream;
use crate::engine::NativeEngine;
use crate::error::{Result, SessionError};

/// Session-wide mutable state, guarded by the session lock.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
	pub(crate) loaded: bool,
	pub(crate) config: GenerationConfig,
	pub(crate) progress: GenerationProgress,
}

/// Streaming text generation over one model of an inference engine.
///
/// # Responsibilities
/// - Load and dispose the model (`path`, `model_type`) exactly once at a time
/// - Keep the generation configuration, updated by sparse overrides
/// - Run one generation at a time, each as a [`CompletionStream`]
///
/// Every operation takes the session lock. A generation keeps it until its
/// stream ends or is dropped, so `load`, `dispose`, `update_params` and a
/// second generation wait for the running one. Awaiting any of them while
/// holding an unfinished stream of the same session never completes.
pub struct GenerationSession<E: NativeEngine + 'static> {
	engine: Arc<E>,
	model_path: PathBuf,
	model_type: String,
	template: Option<PromptTemplate>,
	state: Arc<Mutex<SessionState>>,
}

impl<E: NativeEngine + 'static> GenerationSession<E> {
	/// Creates an unloaded session.
	///
	/// # Parameters
	/// - `engine`: engine to drive; the caller may keep a clone to inspect it
	/// - `model_path`, `model_type`: passed to the engine on `load`
	/// - `defaults`: configuration used until overridden
	pub fn new<P, S>(engine: Arc<E>, model_path: P, model_type: S, defaults: GenerationConfig) -> Self
	where
		P: Into<PathBuf>,
		S: Into<String>,
	{
		let state = SessionState {
			config: defaults,
			..SessionState::default()
		};
		Self {
			engine,
			model_path: model_path.into(),
			model_type: model_type.into(),
			template: None,
			state: Arc::new(Mutex::new(state)),
		}
	}

	/// Wraps every prompt in `template` before it reaches the engine.
	pub fn with_prompt_template(mut self, template: PromptTemplate) -> Self {
		self.template = Some(template);
		self
	}

	pub fn engine(&self) -> &Arc<E> {
		&self.engine
	}

	pub fn model_path(&self) -> &Path {
		&self.model_path
	}

	pub fn model_type(&self) -> &str {
		&self.model_type
	}

	pub async fn is_model_loaded(&self) -> bool {
		self.state.lock().await.loaded
	}

	/// True while a generation (or a lifecycle call) holds the session.
	pub fn is_busy(&self) -> bool {
		self.state.try_lock().is_err()
	}

	/// Loads the model.
	///
	/// The engine call runs on the blocking pool together with the session
	/// guard: if the returned future is dropped mid-load, the load still
	/// completes and the session ends up loaded.
	///
	/// # Errors
	/// - `AlreadyLoaded` if the model is loaded (nothing changes)
	/// - `NativeLink` if the engine entry points are unreachable
	/// - `Load` for any other engine failure; the session stays unloaded and
	///   `load` may be called again
	pub async fn load(&self) -> Result<()> {
		let mut state = Arc::clone(&self.state).lock_owned().await;
		if state.loaded {
			return Err(SessionError::AlreadyLoaded);
		}

		let engine = Arc::clone(&self.engine);
		let path = self.model_path.clone();
		let model_type = self.model_type.clone();
		spawn_blocking(move || match engine.load(&path, &model_type) {
			Ok(()) => {
				state.loaded = true;
				info!("model {} loaded ({})", path.display(), model_type);
				Ok(())
			}
			Err(err) => {
				warn!("loading {} failed: {}", path.display(), err);
				Err(SessionError::from_load(err))
			}
		})
		.await?
	}

	/// Frees the model in the engine and marks the session unloaded.
	///
	/// The engine is always asked to unload, even if nothing was loaded. Like
	/// `load`, the outcome is recorded even if the returned future is dropped.
	pub async fn dispose(&self) -> Result<()> {
		let mut state = Arc::clone(&self.state).lock_owned().await;
		let engine = Arc::clone(&self.engine);
		let path = self.model_path.clone();
		spawn_blocking(move || {
			engine.unload();
			state.loaded = false;
			state.progress.reset();
			info!("model {} disposed", path.display());
		})
		.await?;
		Ok(())
	}

	/// Merges `overrides` into the session configuration and returns the result.
	///
	/// Unset fields keep their value; set fields stay in effect for every
	/// later request until overridden again.
	pub async fn update_params(&self, overrides: &ParamOverrides) -> GenerationConfig {
		let mut state = self.state.lock().await;
		state.config = state.config.merge_with(overrides);
		state.config.clone()
	}

	pub async fn config(&self) -> GenerationConfig {
		self.state.lock().await.config.clone()
	}

	/// Snapshot of the generation progress; always empty between requests.
	pub async fn progress(&self) -> GenerationProgress {
		self.state.lock().await.progress.clone()
	}

	/// Starts a generation for `prompt`.
	///
	/// Waits for the session to be free, then resets progress and merges
	/// `overrides` into the session configuration. Engine handles are only
	/// acquired when the returned stream is first polled.
	///
	/// # Errors
	/// `ModelNotLoaded` if `load` has not succeeded; no handle is acquired.
	pub async fn create_completion_stream(&self, prompt: &str, overrides: &ParamOverrides) -> Result<CompletionStream<E>> {
		let mut state = Arc::clone(&self.state).lock_owned().await;
		if !state.loaded {
			return Err(SessionError::ModelNotLoaded);
		}

		state.progress.reset();
		state.config = state.config.merge_with(overrides);
		let config = state.config.clone();

		let prompt = match &self.template {
			Some(template) => template.apply(prompt),
			None => prompt.to_owned(),
		};
		debug!("starting generation ({} prompt chars, max {} tokens)", prompt.chars().count(), config.max_new_tokens);

		let prepared = PreparedGeneration::new(Arc::clone(&self.engine), state, prompt, config);
		Ok(CompletionStream::new(prepared))
	}
}
