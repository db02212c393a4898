//! In-process character n-gram engine.
//!
//! Implements [`NativeEngine`] on top of a back-off character model trained
//! from a plain text corpus. Useful to drive a session end-to-end without a
//! native library, and as the default backend of the server and example.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::{CursorHandle, EngineError, NativeEngine, SamplerHandle, SamplingParams};
use crate::io::model_name;

/// Back-off character model (contexts and their continuations).
pub mod model;

/// One context of the model with its observed continuations.
mod state;

pub use model::CharModel;
use model::{END_CHAR, START_CHAR};

/// Model type tag accepted by [`NGramEngine::load`].
pub const NGRAM_MODEL_TYPE: &str = "ngram";

/// Order used when training a corpus that has no compiled model yet.
pub const DEFAULT_ORDER: usize = 6;

/// Decode position of one request.
struct CursorState {
	position: usize,
	/// Last characters seen, at most the model window, starting with a line marker.
	context: String,
}

struct SamplerState {
	params: SamplingParams,
	rng: StdRng,
}

/// Character n-gram engine.
///
/// # Handles
/// - A cursor owns a bounded context window and the absolute decode position.
/// - A sampler owns the sampling parameters and its own random generator.
///
/// Handles are identifiers into internal tables; releasing removes the entry.
/// `unload` drops the model and every outstanding handle.
pub struct NGramEngine {
	order: usize,
	model: RwLock<Option<Arc<CharModel>>>,
	cursors: Mutex<HashMap<u64, CursorState>>,
	samplers: Mutex<HashMap<u64, SamplerState>>,
	next_handle: AtomicU64,
}

impl Default for NGramEngine {
	fn default() -> Self {
		Self::new(DEFAULT_ORDER)
	}
}

impl NGramEngine {
	/// Creates an engine training corpora with the given order (at least 2).
	pub fn new(order: usize) -> Self {
		Self {
			order: order.max(2),
			model: RwLock::new(None),
			cursors: Mutex::new(HashMap::new()),
			samplers: Mutex::new(HashMap::new()),
			next_handle: AtomicU64::new(1),
		}
	}

	/// Number of cursors and samplers not released yet.
	pub fn live_handles(&self) -> usize {
		let cursors = self.cursors.lock().map(|c| c.len()).unwrap_or(0);
		let samplers = self.samplers.lock().map(|s| s.len()).unwrap_or(0);
		cursors + samplers
	}

	/// Absolute decode position of `cursor` (prompt characters included).
	pub fn position(&self, cursor: CursorHandle) -> Result<usize, EngineError> {
		let cursors = lock(&self.cursors)?;
		cursors
			.get(&cursor.raw())
			.map(|c| c.position)
			.ok_or(EngineError::InvalidHandle(cursor.raw()))
	}

	fn current_model(&self) -> Result<Arc<CharModel>, EngineError> {
		let model = self.model.read().map_err(|_| poisoned())?;
		model.clone().ok_or(EngineError::NotLoaded)
	}

	fn allocate(&self) -> u64 {
		self.next_handle.fetch_add(1, Ordering::Relaxed)
	}
}

impl NativeEngine for NGramEngine {
	fn load(&self, path: &Path, model_type: &str) -> Result<(), EngineError> {
		if model_type != NGRAM_MODEL_TYPE {
			return Err(EngineError::UnsupportedModelType(model_type.to_owned()));
		}

		let model = CharModel::load(path, self.order)?;
		info!("n-gram model '{}' ready (order {})", model_name(path), model.order());

		*self.model.write().map_err(|_| poisoned())? = Some(Arc::new(model));
		Ok(())
	}

	fn unload(&self) {
		if let Ok(mut model) = self.model.write() {
			*model = None;
		}
		if let Ok(mut cursors) = self.cursors.lock() {
			cursors.clear();
		}
		if let Ok(mut samplers) = self.samplers.lock() {
			samplers.clear();
		}
	}

	fn new_cursor(&self) -> Result<CursorHandle, EngineError> {
		let id = self.allocate();
		lock(&self.cursors)?.insert(id, CursorState { position: 0, context: START_CHAR.to_string() });
		Ok(CursorHandle::from_raw(id))
	}

	fn new_sampler(
		&self,
		prompt: &str,
		cursor: CursorHandle,
		params: &SamplingParams,
	) -> Result<SamplerHandle, EngineError> {
		let model = self.current_model()?;
		let window = model.window();

		{
			let mut cursors = lock(&self.cursors)?;
			let state = cursors
				.get_mut(&cursor.raw())
				.ok_or(EngineError::InvalidHandle(cursor.raw()))?;
			for c in prompt.chars() {
				if c == '\n' {
					state.context = START_CHAR.to_string();
				} else {
					push_context(&mut state.context, c, window);
				}
				state.position += 1;
			}
		}

		let id = self.allocate();
		let sampler = SamplerState {
			params: *params,
			rng: StdRng::from_rng(&mut rand::rng()),
		};
		lock(&self.samplers)?.insert(id, sampler);
		Ok(SamplerHandle::from_raw(id))
	}

	fn decode_step(&self, cursor: CursorHandle, sampler: SamplerHandle) -> Result<String, EngineError> {
		let model = self.current_model()?;

		// Lock order: cursors, then samplers
		let mut cursors = lock(&self.cursors)?;
		let mut samplers = lock(&self.samplers)?;
		let cursor_state = cursors
			.get_mut(&cursor.raw())
			.ok_or(EngineError::InvalidHandle(cursor.raw()))?;
		let sampler_state = samplers
			.get_mut(&sampler.raw())
			.ok_or(EngineError::InvalidHandle(sampler.raw()))?;

		cursor_state.position += 1;
		let fragment = match model.predict(&cursor_state.context, &sampler_state.params, &mut sampler_state.rng) {
			Some(END_CHAR) => {
				cursor_state.context = START_CHAR.to_string();
				"\n".to_owned()
			}
			Some(c) => {
				push_context(&mut cursor_state.context, c, model.window());
				c.to_string()
			}
			None => {
				// Nothing ever followed this context, start a new line
				cursor_state.context = START_CHAR.to_string();
				String::new()
			}
		};
		Ok(fragment)
	}

	fn release_sampler(&self, sampler: SamplerHandle) {
		match self.samplers.lock() {
			Ok(mut samplers) => {
				if samplers.remove(&sampler.raw()).is_none() {
					warn!("release of unknown {}", sampler);
				}
			}
			Err(_) => warn!("sampler table poisoned, {} not released", sampler),
		}
	}

	fn release_cursor(&self, cursor: CursorHandle) {
		match self.cursors.lock() {
			Ok(mut cursors) => {
				if cursors.remove(&cursor.raw()).is_none() {
					warn!("release of unknown {}", cursor);
				}
			}
			Err(_) => warn!("cursor table poisoned, {} not released", cursor),
		}
	}
}

/// Appends `c` to `context`, keeping only the last `window` characters.
fn push_context(context: &mut String, c: char, window: usize) {
	context.push(c);
	let len = context.chars().count();
	if len > window {
		let skip = len - window;
		*context = context.chars().skip(skip).collect();
	}
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, EngineError> {
	mutex.lock().map_err(|_| poisoned())
}

fn poisoned() -> EngineError {
	EngineError::Decode("engine state poisoned".to_owned())
}
