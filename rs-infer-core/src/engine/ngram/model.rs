use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use rand::Rng;

use serde::{Deserialize, Serialize};

use super::state::State;
use crate::engine::{EngineError, SamplingParams};
use crate::io::{compiled_model_path, is_compiled_model, read_corpus};

/// Marks the beginning of a corpus line.
pub(crate) const START_CHAR: char = '\u{2}';

/// Marks the end of a corpus line.
pub(crate) const END_CHAR: char = '\u{3}';

/// Character n-gram model with back-off.
///
/// For every context of length `1..order`, stores the characters observed
/// right after it. Prediction starts from the longest context available and
/// falls back to shorter ones until a known state is found.
///
/// # Invariants
/// - `order` is always >= 2
/// - Every key in `states` is between 1 and `order - 1` characters long
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CharModel {
	order: usize,
	states: HashMap<String, State>,
}

impl CharModel {
	/// Creates an empty model of the given order.
	///
	/// # Errors
	/// Returns an error if `order < 2`.
	pub fn new(order: usize) -> Result<Self, String> {
		if order < 2 {
			return Err("order must be >= 2".to_owned());
		}
		Ok(Self { order, states: HashMap::new() })
	}

	pub fn order(&self) -> usize {
		self.order
	}

	/// Number of longest contexts a prediction can use.
	pub fn window(&self) -> usize {
		self.order - 1
	}

	pub fn is_empty(&self) -> bool {
		self.states.is_empty()
	}

	/// Loads a model from disk.
	///
	/// - A `.bin` path is read directly (postcard).
	/// - Any other path is treated as a text corpus: if a compiled `.bin`
	///   exists next to it, that one is used, otherwise the corpus is trained
	///   and the result cached next to it.
	pub fn load<P: AsRef<Path>>(path: P, order: usize) -> Result<Self, EngineError> {
		let path = path.as_ref();
		if is_compiled_model(path) {
			return Self::read_binary(path);
		}

		let binary_path = compiled_model_path(path).map_err(|e| EngineError::Load(e.to_string()))?;
		if binary_path.exists() {
			return Self::read_binary(&binary_path);
		}

		let model = Self::train(path, order)?;
		let bytes = postcard::to_stdvec(&model).map_err(|e| EngineError::Load(e.to_string()))?;
		std::fs::write(&binary_path, bytes).map_err(|e| EngineError::Load(format!("{}: {e}", binary_path.display())))?;
		Ok(model)
	}

	fn read_binary(path: &Path) -> Result<Self, EngineError> {
		let bytes = std::fs::read(path).map_err(|e| EngineError::Load(format!("{}: {e}", path.display())))?;
		let model: Self = postcard::from_bytes(&bytes).map_err(|e| EngineError::Load(format!("{}: {e}", path.display())))?;
		if model.order < 2 {
			return Err(EngineError::Load(format!("{}: invalid order {}", path.display(), model.order)));
		}
		Ok(model)
	}

	/// Trains a model from a corpus file, one sentence per line.
	///
	/// Lines are split into chunks (CPU count * factor), each chunk is learned
	/// by its own thread and the partial models are merged at the end.
	fn train(path: &Path, order: usize) -> Result<Self, EngineError> {
		let lines = read_corpus(path).map_err(|e| EngineError::Load(format!("{}: {e}", path.display())))?;
		if lines.is_empty() {
			return Err(EngineError::Load(format!("{}: corpus contains no text", path.display())));
		}

		let mut final_model = Self::new(order).map_err(EngineError::Load)?;

		let cpus = num_cpus::get();
		let factor = 8;
		let chunks = cpus * factor;
		let chunk_size = lines.len().div_ceil(chunks).max(1);

		let (tx, rx) = mpsc::channel();
		let mut spawned = 0;
		for chunk in lines.chunks(chunk_size) {
			let tx = tx.clone();
			let chunk: Vec<String> = chunk.to_vec();
			let mut partial_model = final_model.clone();

			thread::spawn(move || {
				for sentence in chunk {
					partial_model.add_sentence(&sentence);
				}
				// The receiver outlives every worker
				let _ = tx.send(partial_model);
			});
			spawned += 1;
		}
		drop(tx);

		let mut received = 0;
		for partial_model in rx.iter() {
			final_model.merge(&partial_model).map_err(EngineError::Load)?;
			received += 1;
		}
		if received != spawned {
			return Err(EngineError::Load(format!("{} training worker(s) failed", spawned - received)));
		}

		Ok(final_model)
	}

	/// Adds one corpus line to the model.
	///
	/// The line is wrapped in start/end markers; blank lines are ignored.
	pub fn add_sentence(&mut self, sentence: &str) {
		if sentence.trim().is_empty() {
			return;
		}

		let mut chars: Vec<char> = Vec::with_capacity(sentence.len() + 2);
		chars.push(START_CHAR);
		chars.extend(sentence.chars());
		chars.push(END_CHAR);

		for i in 1..chars.len() {
			let next_char = chars[i];
			for len in 1..self.order {
				if len > i {
					break;
				}
				let key: String = chars[i - len..i].iter().collect();
				let state = self.states.entry(key.clone()).or_insert_with(|| State::new(&key));
				state.add_transition(next_char);
			}
		}
	}

	/// Predicts the character following `context`.
	///
	/// Only the last `order - 1` characters of `context` are used. Returns
	/// `None` if no suffix of the context was ever observed.
	pub fn predict<R: Rng>(&self, context: &str, params: &SamplingParams, rng: &mut R) -> Option<char> {
		let chars: Vec<char> = context.chars().collect();
		let longest = self.window().min(chars.len());

		for len in (1..=longest).rev() {
			let key: String = chars[chars.len() - len..].iter().collect();
			if let Some(c) = self.states.get(&key).and_then(|state| state.sample(params, rng)) {
				return Some(c);
			}
		}
		None
	}

	/// Merges another model of the same order into this one.
	///
	/// # Errors
	/// Returns an error if the model orders do not match.
	pub fn merge(&mut self, other: &Self) -> Result<(), String> {
		if self.order != other.order {
			return Err(format!("Order mismatch: self={}, other={}", self.order, other.order));
		}

		for (key, state) in &other.states {
			if let Some(existing) = self.states.get_mut(key) {
				existing.merge(state)?;
			} else {
				self.states.insert(key.clone(), state.clone());
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	const GREEDY: SamplingParams = SamplingParams { temperature: 0.0, top_k: 0, top_p: 1.0 };

	#[test]
	fn order_below_two_is_rejected() {
		assert!(CharModel::new(1).is_err());
		assert!(CharModel::new(2).is_ok());
	}

	#[test]
	fn greedy_prediction_follows_the_corpus() {
		let mut model = CharModel::new(4).unwrap();
		model.add_sentence("hello");
		let mut rng = StdRng::seed_from_u64(0);

		let mut context = START_CHAR.to_string();
		let mut out = String::new();
		while let Some(c) = model.predict(&context, &GREEDY, &mut rng) {
			if c == END_CHAR {
				break;
			}
			out.push(c);
			context.push(c);
		}
		assert_eq!(out, "hello");
	}

	#[test]
	fn prediction_backs_off_to_shorter_contexts() {
		let mut model = CharModel::new(3).unwrap();
		model.add_sentence("ab");
		let mut rng = StdRng::seed_from_u64(0);
		// "zza" was never seen, but "a" was
		assert_eq!(model.predict("zza", &GREEDY, &mut rng), Some('b'));
		assert_eq!(model.predict("qq", &GREEDY, &mut rng), None);
	}

	#[test]
	fn merge_requires_same_order() {
		let mut left = CharModel::new(3).unwrap();
		let right = CharModel::new(4).unwrap();
		assert!(left.merge(&right).is_err());
	}

	#[test]
	fn training_caches_a_binary_next_to_the_corpus() {
		let dir = tempfile::tempdir().unwrap();
		let corpus = dir.path().join("names.txt");
		std::fs::write(&corpus, "alpha\nbeta\n\ngamma\n").unwrap();

		let trained = CharModel::load(&corpus, 3).unwrap();
		assert!(!trained.is_empty());
		assert!(dir.path().join("names.bin").exists());

		let cached = CharModel::load(dir.path().join("names.bin"), 5).unwrap();
		assert_eq!(cached.order(), 3);
	}

	#[test]
	fn blank_corpus_fails_to_load() {
		let dir = tempfile::tempdir().unwrap();
		let corpus = dir.path().join("empty.txt");
		std::fs::write(&corpus, "\n  \n").unwrap();
		assert!(matches!(CharModel::load(&corpus, 3), Err(EngineError::Load(_))));
	}

	#[test]
	fn missing_corpus_fails_to_load() {
		let dir = tempfile::tempdir().unwrap();
		assert!(matches!(CharModel::load(dir.path().join("nope.txt"), 3), Err(EngineError::Load(_))));
	}
}
