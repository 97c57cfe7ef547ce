//! Frontier ordering key.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityWeights {
	pub trend: f64,
	pub sim: f64,
	pub depth: f64,
}

/// Each term of a computed priority, kept for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityBreakdown {
	pub score: f64,
	pub delta: f64,
	pub similarity: f64,
	pub depth: u32,
	pub priority: f64,
}

/// `score + trend * delta - sim * similarity - depth * depth`.
///
/// `delta` is `score - parent_score` when both are known and 0 otherwise. An unscored node
/// contributes a score of 0.
pub fn priority(
	weights: PriorityWeights,
	score: Option<f64>,
	parent_score: Option<f64>,
	depth: u32,
	embedding: &[f32],
	top_k: &[Vec<f32>],
) -> PriorityBreakdown {
	let delta = match (score, parent_score) {
		(Some(score), Some(parent_score)) => score - parent_score,
		_ => 0.0,
	};
	let similarity = mean_cosine_similarity(embedding, top_k);
	let score = score.unwrap_or(0.0);
	let priority = score + weights.trend * delta
		- weights.sim * similarity
		- weights.depth * f64::from(depth);

	PriorityBreakdown { score, delta, similarity, depth, priority }
}

/// Mean cosine similarity of `vector` against `others`. Zero vectors contribute nothing;
/// an empty set or a zero `vector` yields 0.
pub fn mean_cosine_similarity(vector: &[f32], others: &[Vec<f32>]) -> f64 {
	if others.is_empty() {
		return 0.0;
	}

	let total: f64 = others.iter().map(|other| cosine_similarity(vector, other)).sum();

	total / others.len() as f64
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
	let mut dot = 0.0_f64;
	let mut norm_a = 0.0_f64;
	let mut norm_b = 0.0_f64;

	for (x, y) in a.iter().zip(b) {
		let (x, y) = (f64::from(*x), f64::from(*y));

		dot += x * y;
		norm_a += x * x;
		norm_b += y * y;
	}

	if norm_a == 0.0 || norm_b == 0.0 {
		return 0.0;
	}

	dot / (norm_a.sqrt() * norm_b.sqrt())
}
