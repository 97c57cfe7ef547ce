use crate::Point;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolygonError {
	#[error("A polygon needs at least 3 vertices, got {count}.")]
	TooFewVertices { count: usize },
	#[error("Polygon vertex {index} is not a finite coordinate.")]
	NonFinite { index: usize },
	#[error("Polygon has zero area.")]
	Degenerate,
}

/// A simple polygon in projected space. Vertices are implicitly closed.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
	vertices: Vec<Point>,
	signed_area: f64,
}
impl Polygon {
	pub fn new(vertices: Vec<Point>) -> Result<Self, PolygonError> {
		if vertices.len() < 3 {
			return Err(PolygonError::TooFewVertices { count: vertices.len() });
		}

		if let Some(index) = vertices.iter().position(|p| !p.x.is_finite() || !p.y.is_finite()) {
			return Err(PolygonError::NonFinite { index });
		}

		let signed_area = signed_area(&vertices);

		if signed_area.abs() <= f64::EPSILON {
			return Err(PolygonError::Degenerate);
		}

		Ok(Self { vertices, signed_area })
	}

	pub fn area(&self) -> f64 {
		self.signed_area.abs()
	}

	/// Ray casting with a half-open crossing rule.
	///
	/// An edge counts when exactly one endpoint lies strictly above the ray and the point
	/// lies strictly left of the intercept, so a point on an edge shared by two adjacent
	/// polygons belongs to exactly one of them.
	pub fn contains(&self, point: Point) -> bool {
		let mut inside = false;
		let mut j = self.vertices.len() - 1;

		for i in 0..self.vertices.len() {
			let (vi, vj) = (self.vertices[i], self.vertices[j]);

			if (vi.y > point.y) != (vj.y > point.y) {
				let intercept = (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x;

				if point.x < intercept {
					inside = !inside;
				}
			}

			j = i;
		}

		inside
	}

	/// Area-weighted centroid.
	pub fn centroid(&self) -> Point {
		let mut cx = 0.0;
		let mut cy = 0.0;
		let n = self.vertices.len();

		for i in 0..n {
			let a = self.vertices[i];
			let b = self.vertices[(i + 1) % n];
			let cross = a.x * b.y - b.x * a.y;

			cx += (a.x + b.x) * cross;
			cy += (a.y + b.y) * cross;
		}

		let factor = 1.0 / (6.0 * self.signed_area);

		Point::new(cx * factor, cy * factor)
	}
}

fn signed_area(vertices: &[Point]) -> f64 {
	let n = vertices.len();
	let twice: f64 = (0..n)
		.map(|i| {
			let a = vertices[i];
			let b = vertices[(i + 1) % n];

			a.x * b.y - b.x * a.y
		})
		.sum();

	twice / 2.0
}
