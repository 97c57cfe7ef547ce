use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);
impl NodeId {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Short prefix for log lines.
	pub fn short(&self) -> &str {
		self.0.get(..8).unwrap_or(&self.0)
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for NodeId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<String> for NodeId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// A projected coordinate. Serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
	pub x: f64,
	pub y: f64,
}
impl Point {
	pub const fn new(x: f64, y: f64) -> Self {
		Self { x, y }
	}

	/// Moves `self` toward `target` by `weight` (0 keeps `self`, 1 lands on `target`).
	pub fn blend(self, target: Point, weight: f64) -> Point {
		Point {
			x: (1.0 - weight) * self.x + weight * target.x,
			y: (1.0 - weight) * self.y + weight * target.y,
		}
	}

	pub fn distance(self, other: Point) -> f64 {
		(self.x - other.x).hypot(self.y - other.y)
	}
}

impl From<[f64; 2]> for Point {
	fn from([x, y]: [f64; 2]) -> Self {
		Self { x, y }
	}
}

impl From<Point> for [f64; 2] {
	fn from(point: Point) -> Self {
		[point.x, point.y]
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
	pub id: NodeId,
	pub prompt: String,
	pub reply: Option<String>,
	pub score: Option<f64>,
	pub score_reasoning: Option<String>,
	pub depth: u32,
	pub parent: Option<NodeId>,
	pub embedding: Vec<f32>,
	pub xy: Point,
	pub prompt_tokens: Option<u64>,
	pub completion_tokens: Option<u64>,
	pub agent_cost: Option<f64>,
}
impl Node {
	/// A node with only the immutable fields set. Callers fill in the rest.
	pub fn new(
		id: NodeId,
		prompt: impl Into<String>,
		depth: u32,
		parent: Option<NodeId>,
		embedding: Vec<f32>,
	) -> Self {
		Self {
			id,
			prompt: prompt.into(),
			reply: None,
			score: None,
			score_reasoning: None,
			depth,
			parent,
			embedding,
			xy: Point::default(),
			prompt_tokens: None,
			completion_tokens: None,
			agent_cost: None,
		}
	}

	pub fn with_usage(mut self, usage: Usage) -> Self {
		self.prompt_tokens = Some(usage.prompt_tokens);
		self.completion_tokens = Some(usage.completion_tokens);
		self.agent_cost = Some(usage.cost);

		self
	}

	pub fn graph_update(&self) -> GraphUpdate {
		GraphUpdate {
			id: self.id.clone(),
			xy: self.xy,
			score: self.score,
			parent: self.parent.clone(),
		}
	}

	/// Checks the lineage rules given the stored depth of `self.parent`, `None` when that
	/// parent does not exist.
	///
	/// Parentless nodes are roots (depth 0) or focus-zone seeds (depth 1).
	pub fn check_lineage(&self, parent_depth: Option<u32>) -> Result<(), LineageError> {
		match (&self.parent, parent_depth) {
			(None, _) =>
				if self.depth > 1 {
					return Err(LineageError::ParentlessDepth { depth: self.depth });
				},
			(Some(parent), None) =>
				return Err(LineageError::MissingParent { parent: parent.clone() }),
			(Some(_), Some(parent_depth)) =>
				if self.depth != parent_depth + 1 {
					return Err(LineageError::DepthMismatch { depth: self.depth, parent_depth });
				},
		}

		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineageError {
	#[error("Parent node {parent} does not exist.")]
	MissingParent { parent: NodeId },
	#[error("Depth {depth} must be exactly one more than parent depth {parent_depth}.")]
	DepthMismatch { depth: u32, parent_depth: u32 },
	#[error("A node without a parent must have depth 0 or 1, got {depth}.")]
	ParentlessDepth { depth: u32 },
}

/// The observer-facing projection of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphUpdate {
	pub id: NodeId,
	pub xy: Point,
	pub score: Option<f64>,
	pub parent: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Usage {
	pub prompt_tokens: u64,
	pub completion_tokens: u64,
	pub cost: f64,
}
impl Usage {
	pub fn add(self, other: Usage) -> Usage {
		Usage {
			prompt_tokens: self.prompt_tokens + other.prompt_tokens,
			completion_tokens: self.completion_tokens + other.completion_tokens,
			cost: self.cost + other.cost,
		}
	}

	/// One of `parts` equal shares, token counts rounded down.
	pub fn share(self, parts: usize) -> Usage {
		if parts <= 1 {
			return self;
		}

		let parts_u64 = parts as u64;

		Usage {
			prompt_tokens: self.prompt_tokens / parts_u64,
			completion_tokens: self.completion_tokens / parts_u64,
			cost: self.cost / parts as f64,
		}
	}
}

/// Live-tunable scheduling record shared by every process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
	pub lambda_trend: f64,
	pub lambda_sim: f64,
	pub lambda_depth: f64,
	pub budget_usd: f64,
	pub version: i64,
}
impl SchedulerSettings {
	pub fn weights(&self) -> crate::PriorityWeights {
		crate::PriorityWeights {
			trend: self.lambda_trend,
			sim: self.lambda_sim,
			depth: self.lambda_depth,
		}
	}
}

/// A partial update of [`SchedulerSettings`]. Absent fields keep their value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
	pub lambda_trend: Option<f64>,
	pub lambda_sim: Option<f64>,
	pub lambda_depth: Option<f64>,
	pub budget_usd: Option<f64>,
}
impl SettingsPatch {
	pub fn is_empty(&self) -> bool {
		self.lambda_trend.is_none()
			&& self.lambda_sim.is_none()
			&& self.lambda_depth.is_none()
			&& self.budget_usd.is_none()
	}

	/// Names of provided fields that are negative or not finite.
	pub fn invalid_fields(&self) -> Vec<&'static str> {
		[
			("lambda_trend", self.lambda_trend),
			("lambda_sim", self.lambda_sim),
			("lambda_depth", self.lambda_depth),
			("budget_usd", self.budget_usd),
		]
		.into_iter()
		.filter(|(_, value)| value.is_some_and(|v| !v.is_finite() || v < 0.0))
		.map(|(name, _)| name)
		.collect()
	}

	pub fn apply(&self, settings: SchedulerSettings) -> SchedulerSettings {
		SchedulerSettings {
			lambda_trend: self.lambda_trend.unwrap_or(settings.lambda_trend),
			lambda_sim: self.lambda_sim.unwrap_or(settings.lambda_sim),
			lambda_depth: self.lambda_depth.unwrap_or(settings.lambda_depth),
			budget_usd: self.budget_usd.unwrap_or(settings.budget_usd),
			version: settings.version + 1,
		}
	}
}
