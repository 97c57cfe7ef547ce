//! Two-component linear projection of embeddings onto the display plane.

use serde::{Deserialize, Serialize};

use crate::Point;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
	#[error("Projection needs at least 2 vectors, got {count}.")]
	CorpusTooSmall { count: usize },
	#[error("Vector {index} has length {len}, expected {expected}.")]
	DimensionMismatch { index: usize, len: usize, expected: usize },
}

/// Principal-component model: corpus mean plus two orthonormal directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionModel {
	pub mean: Vec<f64>,
	pub components: [Vec<f64>; 2],
	pub corpus_size: u64,
}
impl ProjectionModel {
	/// Fits by power iteration with deflation.
	///
	/// Starting vectors are fixed and each component's largest entry is made positive, so
	/// the same corpus always yields the same model.
	pub fn fit(vectors: &[Vec<f32>], iterations: u32) -> Result<Self, ProjectionError> {
		if vectors.len() < 2 {
			return Err(ProjectionError::CorpusTooSmall { count: vectors.len() });
		}

		let dim = vectors[0].len();

		for (index, vector) in vectors.iter().enumerate() {
			if vector.len() != dim {
				return Err(ProjectionError::DimensionMismatch {
					index,
					len: vector.len(),
					expected: dim,
				});
			}
		}

		let mut mean = vec![0.0_f64; dim];

		for vector in vectors {
			for (acc, value) in mean.iter_mut().zip(vector) {
				*acc += f64::from(*value);
			}
		}
		for acc in &mut mean {
			*acc /= vectors.len() as f64;
		}

		let centered: Vec<Vec<f64>> = vectors
			.iter()
			.map(|vector| vector.iter().zip(&mean).map(|(v, m)| f64::from(*v) - m).collect())
			.collect();
		let first = principal_direction(&centered, &[], dim, iterations, 0);
		let second =
			principal_direction(&centered, std::slice::from_ref(&first), dim, iterations, 1);

		Ok(Self { mean, components: [first, second], corpus_size: vectors.len() as u64 })
	}

	pub fn project(&self, vector: &[f32]) -> Point {
		let coordinate = |component: &[f64]| -> f64 {
			vector
				.iter()
				.zip(&self.mean)
				.zip(component)
				.map(|((v, m), c)| (f64::from(*v) - m) * c)
				.sum()
		};

		Point::new(coordinate(&self.components[0]), coordinate(&self.components[1]))
	}
}

/// Used before any model exists: a fixed linear map of the first two components.
pub fn fallback_projection(vector: &[f32]) -> Point {
	match vector {
		[a, b, ..] => Point::new((f64::from(*a) - 0.5) * 4.0, (f64::from(*b) - 0.5) * 4.0),
		_ => Point::default(),
	}
}

/// Projects with the model when present, otherwise with the fallback map.
pub fn project(model: Option<&ProjectionModel>, vector: &[f32]) -> Point {
	match model {
		Some(model) => model.project(vector),
		None => fallback_projection(vector),
	}
}

/// True once the corpus is large enough and either no model exists or the corpus has grown
/// by `refit_every` since the last fit.
pub fn needs_refit(
	node_count: u64,
	model: Option<&ProjectionModel>,
	min_corpus: u64,
	refit_every: u64,
) -> bool {
	if node_count < min_corpus {
		return false;
	}

	match model {
		None => true,
		Some(model) => node_count >= model.corpus_size + refit_every,
	}
}

fn principal_direction(
	rows: &[Vec<f64>],
	previous: &[Vec<f64>],
	dim: usize,
	iterations: u32,
	seed: usize,
) -> Vec<f64> {
	let mut direction: Vec<f64> =
		(0..dim).map(|j| 1.0 + ((j + seed * 3) % 7) as f64 / 7.0).collect();

	orthogonalize(&mut direction, previous);

	if !normalize(&mut direction) {
		return vec![0.0; dim];
	}

	for _ in 0..iterations {
		let mut next = vec![0.0_f64; dim];

		for row in rows {
			let dot: f64 = row.iter().zip(&direction).map(|(r, d)| r * d).sum();

			for (acc, r) in next.iter_mut().zip(row) {
				*acc += dot * r;
			}
		}

		orthogonalize(&mut next, previous);

		if !normalize(&mut next) {
			return vec![0.0; dim];
		}

		direction = next;
	}

	let pivot = direction
		.iter()
		.copied()
		.fold(0.0_f64, |best, value| if value.abs() > best.abs() { value } else { best });

	if pivot < 0.0 {
		for value in &mut direction {
			*value = -*value;
		}
	}

	direction
}

fn orthogonalize(vector: &mut [f64], basis: &[Vec<f64>]) {
	for axis in basis {
		let dot: f64 = vector.iter().zip(axis).map(|(v, a)| v * a).sum();

		for (v, a) in vector.iter_mut().zip(axis) {
			*v -= dot * a;
		}
	}
}

fn normalize(vector: &mut [f64]) -> bool {
	let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();

	if norm <= 1e-12 {
		return false;
	}

	for value in vector.iter_mut() {
		*value /= norm;
	}

	true
}

#[cfg(test)]
mod tests {
	use super::*;

	fn corpus() -> Vec<Vec<f32>> {
		(0..12)
			.map(|i| {
				let t = i as f32;

				vec![t, 2.0 * t + 0.1 * (t * 1.3).sin(), 0.5, 0.2 * (t * 0.7).cos()]
			})
			.collect()
	}

	#[test]
	fn fallback_scales_first_two_components() {
		assert_eq!(fallback_projection(&[1.0, 0.25, 9.0]), Point::new(2.0, -1.0));
		assert_eq!(fallback_projection(&[1.0]), Point::default());
		assert_eq!(project(None, &[0.5, 0.5]), Point::new(0.0, 0.0));
	}

	#[test]
	fn fit_rejects_small_or_ragged_corpus() {
		assert_eq!(
			ProjectionModel::fit(&[vec![1.0, 2.0]], 8),
			Err(ProjectionError::CorpusTooSmall { count: 1 })
		);
		assert!(matches!(
			ProjectionModel::fit(&[vec![1.0, 2.0], vec![1.0]], 8),
			Err(ProjectionError::DimensionMismatch { index: 1, .. })
		));
	}

	#[test]
	fn first_component_follows_dominant_direction() {
		let model = ProjectionModel::fit(&corpus(), 64).expect("Fit must succeed.");
		let [first, second] = &model.components;
		let expected = [1.0 / 5.0_f64.sqrt(), 2.0 / 5.0_f64.sqrt()];

		assert!((first[0] - expected[0]).abs() < 0.01, "{first:?}");
		assert!((first[1] - expected[1]).abs() < 0.01, "{first:?}");

		let dot: f64 = first.iter().zip(second).map(|(a, b)| a * b).sum();

		assert!(dot.abs() < 1e-6);
		assert_eq!(model.corpus_size, 12);
	}

	#[test]
	fn refits_on_same_corpus_are_identical() {
		let a = ProjectionModel::fit(&corpus(), 64).expect("Fit must succeed.");
		let b = ProjectionModel::fit(&corpus(), 64).expect("Fit must succeed.");

		assert_eq!(a, b);
		assert_eq!(a.project(&corpus()[3]), b.project(&corpus()[3]));
	}

	#[test]
	fn constant_corpus_projects_to_origin() {
		let model = ProjectionModel::fit(&[vec![0.3, 0.3], vec![0.3, 0.3], vec![0.3, 0.3]], 16)
			.expect("Fit must succeed.");

		assert_eq!(model.project(&[0.3, 0.3]), Point::default());
	}

	#[test]
	fn refit_policy() {
		let model = ProjectionModel::fit(&corpus(), 8).expect("Fit must succeed.");

		assert!(!needs_refit(9, None, 10, 50));
		assert!(needs_refit(10, None, 10, 50));
		assert!(!needs_refit(61, Some(&model), 10, 50));
		assert!(needs_refit(62, Some(&model), 10, 50));
	}
}
