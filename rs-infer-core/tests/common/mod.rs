#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rs_infer_core::{
	CursorHandle, EngineError, GenerationConfig, GenerationSession, NativeEngine, SamplerHandle, SamplingParams,
};

pub const MODEL_PATH: &str = "models/scripted.bin";
pub const MODEL_TYPE: &str = "scripted";

/// Engine replaying a fixed list of fragments, counting every call.
#[derive(Default)]
pub struct ScriptedEngine {
	fragments: Vec<String>,
	load_failures: Mutex<Vec<EngineError>>,
	fail_decode_at: Option<usize>,
	panic_decode_at: Option<usize>,
	fail_sampler: bool,
	decode_delay: Option<Duration>,
	load_delay: Option<Duration>,

	next_handle: AtomicU64,
	step: AtomicUsize,
	pub loads: AtomicUsize,
	pub unloads: AtomicUsize,
	pub cursors: AtomicUsize,
	pub samplers: AtomicUsize,
	pub decodes: AtomicUsize,
	pub sampler_releases: AtomicUsize,
	pub cursor_releases: AtomicUsize,
	pub last_prompt: Mutex<Option<String>>,
	pub last_params: Mutex<Option<SamplingParams>>,
}

impl ScriptedEngine {
	pub fn new<I, S>(fragments: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			fragments: fragments.into_iter().map(Into::into).collect(),
			next_handle: AtomicU64::new(1),
			..Self::default()
		}
	}

	/// The next `load` calls fail with these errors, in order.
	pub fn failing_loads(self, errors: Vec<EngineError>) -> Self {
		*self.load_failures.lock().unwrap() = errors;
		self
	}

	/// Decode step number `step` (1-based) returns an error.
	pub fn failing_decode_at(mut self, step: usize) -> Self {
		self.fail_decode_at = Some(step);
		self
	}

	/// Decode step number `step` (1-based) panics.
	pub fn panicking_decode_at(mut self, step: usize) -> Self {
		self.panic_decode_at = Some(step);
		self
	}

	pub fn failing_sampler(mut self) -> Self {
		self.fail_sampler = true;
		self
	}

	pub fn slow_load(mut self, delay: Duration) -> Self {
		self.load_delay = Some(delay);
		self
	}

	pub fn slow_decode(mut self, delay: Duration) -> Self {
		self.decode_delay = Some(delay);
		self
	}

	pub fn count(counter: &AtomicUsize) -> usize {
		counter.load(Ordering::SeqCst)
	}
}

impl NativeEngine for ScriptedEngine {
	fn load(&self, _path: &Path, _model_type: &str) -> Result<(), EngineError> {
		if let Some(delay) = self.load_delay {
			std::thread::sleep(delay);
		}
		self.loads.fetch_add(1, Ordering::SeqCst);
		let mut failures = self.load_failures.lock().unwrap();
		if failures.is_empty() {
			Ok(())
		} else {
			Err(failures.remove(0))
		}
	}

	fn unload(&self) {
		self.unloads.fetch_add(1, Ordering::SeqCst);
	}

	fn new_cursor(&self) -> Result<CursorHandle, EngineError> {
		self.cursors.fetch_add(1, Ordering::SeqCst);
		Ok(CursorHandle::from_raw(self.next_handle.fetch_add(1, Ordering::SeqCst)))
	}

	fn new_sampler(
		&self,
		prompt: &str,
		_cursor: CursorHandle,
		params: &SamplingParams,
	) -> Result<SamplerHandle, EngineError> {
		if self.fail_sampler {
			return Err(EngineError::Decode("prompt evaluation failed".to_owned()));
		}
		self.samplers.fetch_add(1, Ordering::SeqCst);
		self.step.store(0, Ordering::SeqCst);
		*self.last_prompt.lock().unwrap() = Some(prompt.to_owned());
		*self.last_params.lock().unwrap() = Some(*params);
		Ok(SamplerHandle::from_raw(self.next_handle.fetch_add(1, Ordering::SeqCst)))
	}

	fn decode_step(&self, _cursor: CursorHandle, _sampler: SamplerHandle) -> Result<String, EngineError> {
		if let Some(delay) = self.decode_delay {
			std::thread::sleep(delay);
		}
		self.decodes.fetch_add(1, Ordering::SeqCst);
		let index = self.step.fetch_add(1, Ordering::SeqCst);

		if self.panic_decode_at == Some(index + 1) {
			panic!("scripted panic at step {}", index + 1);
		}
		if self.fail_decode_at == Some(index + 1) {
			return Err(EngineError::Decode(format!("scripted failure at step {}", index + 1)));
		}
		Ok(self.fragments.get(index).cloned().unwrap_or_default())
	}

	fn release_sampler(&self, _sampler: SamplerHandle) {
		self.sampler_releases.fetch_add(1, Ordering::SeqCst);
	}

	fn release_cursor(&self, _cursor: CursorHandle) {
		self.cursor_releases.fetch_add(1, Ordering::SeqCst);
	}
}

pub fn session(engine: ScriptedEngine, defaults: GenerationConfig) -> (Arc<ScriptedEngine>, GenerationSession<ScriptedEngine>) {
	let engine = Arc::new(engine);
	let session = GenerationSession::new(Arc::clone(&engine), MODEL_PATH, MODEL_TYPE, defaults);
	(engine, session)
}

pub async fn loaded_session(engine: ScriptedEngine, defaults: GenerationConfig) -> (Arc<ScriptedEngine>, GenerationSession<ScriptedEngine>) {
	let (engine, session) = session(engine, defaults);
	session.load().await.unwrap();
	(engine, session)
}
