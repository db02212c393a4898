use std::collections::HashMap;

use rand::Rng;

use serde::{Deserialize, Serialize};

use crate::engine::SamplingParams;

/// Observed continuations of one context in a character n-gram model.
///
/// A `State` corresponds to a context (`key`, 1 to `order - 1` characters)
/// and counts every character seen right after it in the corpus.
///
/// ## Invariants
/// - All transitions belong to the same `key`
/// - Each transition occurrence count is strictly positive
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct State {
	key: String,
	transitions: HashMap<char, usize>
}

impl State {
	pub fn new(key: &str) -> Self {
		Self {
			key: key.to_owned(),
			transitions: HashMap::new(),
		}
	}

	/// Records one more occurrence of `next_char` after this context.
	pub fn add_transition(&mut self, next_char: char) {
		*self.transitions.entry(next_char).or_insert(0) += 1;
	}

	/// Picks the next character according to `params`.
	///
	/// Candidates are ranked by occurrence count (ties broken by character so
	/// the ranking does not depend on hash order), then:
	/// - `temperature <= 0` (or NaN) returns the top candidate
	/// - `top_k > 0` keeps the `top_k` best candidates
	/// - `top_p` in `(0, 1)` keeps the smallest prefix whose probability mass reaches `top_p`
	/// - the survivors are drawn with weights `count^(1 / temperature)`
	///
	/// Returns `None` if the state has no transitions.
	pub fn sample<R: Rng>(&self, params: &SamplingParams, rng: &mut R) -> Option<char> {
		let mut candidates: Vec<(char, usize)> = self.transitions.iter().map(|(c, n)| (*c, *n)).collect();
		candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
		let greedy = candidates.first().map(|(c, _)| *c);

		if !(params.temperature > 0.0) {
			return greedy;
		}

		if params.top_k > 0 {
			candidates.truncate(params.top_k as usize);
		}

		if params.top_p > 0.0 && params.top_p < 1.0 {
			let total: usize = candidates.iter().map(|(_, n)| n).sum();
			let mut cumulative = 0.0;
			let mut keep = 0;
			for (_, occurrence) in &candidates {
				cumulative += *occurrence as f64 / total as f64;
				keep += 1;
				if cumulative >= params.top_p as f64 {
					break;
				}
			}
			candidates.truncate(keep);
		}

		let exponent = 1.0 / params.temperature as f64;
		let weights: Vec<f64> = candidates.iter().map(|(_, n)| (*n as f64).powf(exponent)).collect();
		let sum: f64 = weights.iter().sum();
		if !sum.is_finite() || sum <= 0.0 {
			// Very small temperatures overflow the weights
			return greedy;
		}

		let mut r = rng.random::<f64>() * sum;
		for ((next_char, _), weight) in candidates.iter().zip(&weights) {
			if r < *weight {
				return Some(*next_char);
			}
			r -= weight;
		}

		candidates.last().map(|(c, _)| *c)
	}

	/// Merges another state with the same key, summing occurrence counts.
	///
	/// # Errors
	/// Returns an error if the state keys do not match.
	pub fn merge(&mut self, other: &Self) -> Result<(), String> {
		if self.key != other.key {
			return Err("Key mismatch".to_owned());
		}

		for (next_char, occurrence) in &other.transitions {
			*self.transitions.entry(*next_char).or_insert(0) += *occurrence;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn state(counts: &[(char, usize)]) -> State {
		let mut state = State::new("ab");
		for (c, n) in counts {
			for _ in 0..*n {
				state.add_transition(*c);
			}
		}
		state
	}

	fn params(temperature: f32, top_k: i32, top_p: f32) -> SamplingParams {
		SamplingParams { temperature, top_k, top_p }
	}

	#[test]
	fn empty_state_samples_nothing() {
		let mut rng = StdRng::seed_from_u64(7);
		assert_eq!(State::new("x").sample(&params(0.8, 40, 0.95), &mut rng), None);
	}

	#[test]
	fn zero_temperature_is_greedy() {
		let state = state(&[('a', 1), ('b', 5), ('c', 2)]);
		let mut rng = StdRng::seed_from_u64(1);
		for _ in 0..20 {
			assert_eq!(state.sample(&params(0.0, 0, 1.0), &mut rng), Some('b'));
		}
	}

	#[test]
	fn greedy_ties_break_by_character() {
		let state = state(&[('z', 3), ('m', 3)]);
		let mut rng = StdRng::seed_from_u64(1);
		assert_eq!(state.sample(&params(-1.0, 0, 1.0), &mut rng), Some('m'));
	}

	#[test]
	fn top_k_one_always_picks_the_most_frequent() {
		let state = state(&[('a', 2), ('b', 9), ('c', 4)]);
		let mut rng = StdRng::seed_from_u64(3);
		for _ in 0..50 {
			assert_eq!(state.sample(&params(1.5, 1, 1.0), &mut rng), Some('b'));
		}
	}

	#[test]
	fn top_p_drops_the_tail() {
		// 'a' alone holds 90% of the mass
		let state = state(&[('a', 9), ('b', 1)]);
		let mut rng = StdRng::seed_from_u64(11);
		for _ in 0..50 {
			assert_eq!(state.sample(&params(1.0, 0, 0.5), &mut rng), Some('a'));
		}
	}

	#[test]
	fn sampling_only_returns_observed_characters() {
		let state = state(&[('x', 1), ('y', 1), ('z', 1)]);
		let mut rng = StdRng::seed_from_u64(5);
		for _ in 0..100 {
			let c = state.sample(&params(1.0, 40, 0.95), &mut rng);
			assert!(matches!(c, Some('x' | 'y' | 'z')));
		}
	}

	#[test]
	fn merge_sums_counts_and_rejects_other_keys() {
		let mut left = state(&[('a', 1)]);
		let right = state(&[('a', 4), ('b', 1)]);
		left.merge(&right).unwrap();
		let mut rng = StdRng::seed_from_u64(0);
		assert_eq!(left.sample(&params(0.0, 0, 1.0), &mut rng), Some('a'));

		assert!(left.merge(&State::new("other")).is_err());
	}
}
