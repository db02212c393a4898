use serde::{Deserialize, Serialize};

use crate::engine::SamplingParams;

/// Configuration applied to every generation of a session.
///
/// # Fields
/// - `stop_words`: phrases ending generation once they appear anywhere in
///   the generated text (case-insensitive)
/// - `temperature`, `top_k`, `top_p`: forwarded to the engine sampler as-is
/// - `max_new_tokens`: number of decode steps after which generation stops
///
/// No range validation is done here; the engine decides what out-of-range
/// values mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
	pub stop_words: Vec<String>,
	pub temperature: f32,
	pub max_new_tokens: usize,
	pub top_k: i32,
	pub top_p: f32,
}

impl Default for GenerationConfig {
	fn default() -> Self {
		Self {
			stop_words: Vec::new(),
			temperature: 0.8,
			max_new_tokens: 64,
			top_k: 40,
			top_p: 0.95,
		}
	}
}

impl GenerationConfig {
	/// Returns a copy of `self` where every field set in `overrides` is replaced.
	///
	/// Unset overrides keep the current value, so successive merges accumulate:
	/// `{temperature}` then `{top_k}` keeps both.
	pub fn merge_with(&self, overrides: &ParamOverrides) -> Self {
		Self {
			stop_words: overrides.stop_words.clone().unwrap_or_else(|| self.stop_words.clone()),
			temperature: overrides.temperature.unwrap_or(self.temperature),
			max_new_tokens: overrides.max_new_tokens.unwrap_or(self.max_new_tokens),
			top_k: overrides.top_k.unwrap_or(self.top_k),
			top_p: overrides.top_p.unwrap_or(self.top_p),
		}
	}

	/// Parameters handed to the engine when the sampler is created.
	pub fn sampling_params(&self) -> SamplingParams {
		SamplingParams {
			temperature: self.temperature,
			top_k: self.top_k,
			top_p: self.top_p,
		}
	}
}

/// Sparse parameter overrides.
///
/// Every field is optional: `None` means "keep the current value".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamOverrides {
	pub stop_words: Option<Vec<String>>,
	pub temperature: Option<f32>,
	pub max_new_tokens: Option<usize>,
	pub top_k: Option<i32>,
	pub top_p: Option<f32>,
}

impl ParamOverrides {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn stop_words<I, S>(mut self, words: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.stop_words = Some(words.into_iter().map(Into::into).collect());
		self
	}

	pub fn temperature(mut self, temperature: f32) -> Self {
		self.temperature = Some(temperature);
		self
	}

	pub fn max_new_tokens(mut self, max_new_tokens: usize) -> Self {
		self.max_new_tokens = Some(max_new_tokens);
		self
	}

	pub fn top_k(mut self, top_k: i32) -> Self {
		self.top_k = Some(top_k);
		self
	}

	pub fn top_p(mut self, top_p: f32) -> Self {
		self.top_p = Some(top_p);
		self
	}

	/// True when no field is set (merging is a no-op).
	pub fn is_empty(&self) -> bool {
		self == &Self::default()
	}
}

/// Wraps a prompt before it reaches the engine.
///
/// The template text must contain `{prompt}`; every occurrence is replaced
/// by the caller's prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate(String);

impl PromptTemplate {
	pub const PLACEHOLDER: &'static str = "{prompt}";

	/// # Errors
	/// Returns an error if `template` has no `{prompt}` placeholder.
	pub fn new(template: impl Into<String>) -> Result<Self, String> {
		let template = template.into();
		if !template.contains(Self::PLACEHOLDER) {
			return Err(format!("template must contain {}", Self::PLACEHOLDER));
		}
		Ok(Self(template))
	}

	pub fn apply(&self, prompt: &str) -> String {
		self.0.replace(Self::PLACEHOLDER, prompt)
	}
}
