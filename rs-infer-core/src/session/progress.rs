use serde::Serialize;

use super::config::GenerationConfig;

/// Why a generation ended without error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
	/// `max_new_tokens` decode steps were performed.
	MaxNewTokens,
	/// The generated text contains this stop phrase.
	StopPhrase(String),
	/// The consumer cancelled the stream.
	Cancelled,
}

/// What a finished generation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationSummary {
	/// Decode steps performed, including the one that triggered the stop.
	pub tokens_decoded: usize,
	/// Fragments delivered to the consumer.
	pub fragments_emitted: usize,
	pub finish_reason: FinishReason,
}

/// Progress of the generation currently running in a session.
///
/// Only used to evaluate stop conditions: the consumer receives fragments,
/// never the accumulated text. Empty whenever no generation is running.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationProgress {
	tokens_emitted: usize,
	/// Accumulated text, case-folded one character at a time.
	folded: String,
}

impl GenerationProgress {
	pub fn tokens_emitted(&self) -> usize {
		self.tokens_emitted
	}

	pub fn is_empty(&self) -> bool {
		self.tokens_emitted == 0 && self.folded.is_empty()
	}

	/// Accounts one decode step and its fragment.
	pub fn record(&mut self, fragment: &str) {
		self.tokens_emitted += 1;
		self.folded.extend(fragment.chars().map(fold_case));
	}

	pub fn reset(&mut self) {
		self.tokens_emitted = 0;
		self.folded.clear();
	}

	/// Checks whether generation must stop after the last recorded step.
	///
	/// The token budget is checked first, then stop phrases against the whole
	/// accumulated text, so a phrase split over several fragments is still
	/// found. An empty stop phrase is contained in any text and stops at once.
	pub fn stop_reason(&self, config: &GenerationConfig) -> Option<FinishReason> {
		if self.tokens_emitted >= config.max_new_tokens {
			return Some(FinishReason::MaxNewTokens);
		}

		config
			.stop_words
			.iter()
			.find(|word| {
				let word: String = word.chars().map(fold_case).collect();
				self.folded.contains(&word)
			})
			.map(|word| FinishReason::StopPhrase(word.clone()))
	}
}

/// Case-folds a single character, independently of its neighbours.
///
/// Two characters fold to the same value when they are equal ignoring case
/// (`Σ`, `σ` and `ς` all fold to `σ`). Characters whose case mapping is not a
/// single character are kept as they are.
fn fold_case(c: char) -> char {
	let mut upper = c.to_uppercase();
	let Some(u) = upper.next().filter(|_| upper.next().is_none()) else {
		return c;
	};
	let mut lower = u.to_lowercase();
	match (lower.next(), lower.next()) {
		(Some(l), None) => l,
		_ => c,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::session::config::ParamOverrides;

	fn config(max_new_tokens: usize, stop_words: &[&str]) -> GenerationConfig {
		GenerationConfig::default().merge_with(
			&ParamOverrides::new()
				.max_new_tokens(max_new_tokens)
				.stop_words(stop_words.iter().copied()),
		)
	}

	#[test]
	fn budget_stop_triggers_at_exactly_max_new_tokens() {
		let config = config(3, &[]);
		let mut progress = GenerationProgress::default();
		progress.record("A");
		progress.record("B");
		assert_eq!(progress.stop_reason(&config), None);
		progress.record("C");
		assert_eq!(progress.tokens_emitted(), 3);
		assert_eq!(progress.stop_reason(&config), Some(FinishReason::MaxNewTokens));
	}

	#[test]
	fn zero_budget_stops_after_the_first_step() {
		let mut progress = GenerationProgress::default();
		progress.record("x");
		assert_eq!(progress.stop_reason(&config(0, &[])), Some(FinishReason::MaxNewTokens));
	}

	#[test]
	fn stop_phrase_split_across_fragments_is_found() {
		let config = config(64, &["done"]);
		let mut progress = GenerationProgress::default();
		for fragment in ["he", "llo ", "do"] {
			progress.record(fragment);
			assert_eq!(progress.stop_reason(&config), None);
		}
		progress.record("ne");
		assert_eq!(progress.stop_reason(&config), Some(FinishReason::StopPhrase("done".to_owned())));
	}

	#[test]
	fn stop_phrases_ignore_case() {
		let config = config(64, &["StOp"]);
		let mut progress = GenerationProgress::default();
		progress.record("please STOP now");
		assert_eq!(progress.stop_reason(&config), Some(FinishReason::StopPhrase("StOp".to_owned())));
	}

	#[test]
	fn empty_stop_phrase_matches_any_text() {
		let config = config(64, &[""]);
		let mut progress = GenerationProgress::default();
		progress.record("a");
		assert_eq!(progress.stop_reason(&config), Some(FinishReason::StopPhrase(String::new())));
	}

	#[test]
	fn case_folding_does_not_depend_on_fragment_boundaries() {
		let config = config(64, &["οδος"]);

		let mut split = GenerationProgress::default();
		split.record("ΟΔΟ");
		assert_eq!(split.stop_reason(&config), None);
		split.record("Σ");
		assert_eq!(split.stop_reason(&config), Some(FinishReason::StopPhrase("οδος".to_owned())));

		let mut whole = GenerationProgress::default();
		whole.record("ΟΔΟΣ");
		assert_eq!(whole.stop_reason(&config), Some(FinishReason::StopPhrase("οδος".to_owned())));
	}

	#[test]
	fn final_sigma_matches_every_sigma_form() {
		assert_eq!(fold_case('Σ'), 'σ');
		assert_eq!(fold_case('ς'), 'σ');
		assert_eq!(fold_case('σ'), 'σ');
		assert_eq!(fold_case('ß'), 'ß');
		assert_eq!(fold_case('A'), 'a');
	}

	#[test]
	fn reset_empties_everything() {
		let mut progress = GenerationProgress::default();
		progress.record("abc");
		assert!(!progress.is_empty());
		progress.reset();
		assert!(progress.is_empty());
		assert_eq!(progress, GenerationProgress::default());
	}
}
