use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub scheduler: Scheduler,
	#[serde(default)]
	pub budget: Budget,
	#[serde(default)]
	pub worker: Worker,
	#[serde(default)]
	pub projection: Projection,
	#[serde(default)]
	pub focus: Focus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
	Postgres,
	/// Process-local store. Worker and API must share one process (`worker.embedded = true`).
	Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub backend: StorageBackend,
	/// Embedding length every stored node must carry.
	pub vector_dim: u32,
	/// Buffered graph updates per observer before a slow observer starts losing messages.
	#[serde(default = "default_fanout_capacity")]
	pub fanout_capacity: usize,
	pub postgres: Option<Postgres>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub mutator: LlmProviderConfig,
	pub responder: LlmProviderConfig,
	pub critic: LlmProviderConfig,
	pub moderation: ModerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default = "default_max_prompt_tokens")]
	pub max_prompt_tokens: u32,
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	pub system_prompt: String,
	/// USD per 1K prompt tokens.
	#[serde(default)]
	pub input_usd_per_1k: f64,
	/// USD per 1K completion tokens.
	#[serde(default)]
	pub output_usd_per_1k: f64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModerationConfig {
	pub enabled: bool,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

/// Initial values of the live-tunable priority weights plus fixed scheduling knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Scheduler {
	pub lambda_trend: f64,
	pub lambda_sim: f64,
	pub lambda_depth: f64,
	pub top_k: u32,
	pub seed_score: f64,
	pub seed_priority: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Budget {
	pub ceiling_usd: f64,
	pub backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Worker {
	pub batch_size: u32,
	pub children_per_node: u32,
	pub idle_backoff_ms: u64,
	pub error_backoff_ms: u64,
	pub cycle_pause_ms: u64,
	pub heartbeat_interval_ms: u64,
	pub embedded: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Projection {
	pub min_corpus: u32,
	pub refit_every: u32,
	pub power_iterations: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Focus {
	pub explore_boost: f64,
	pub extend_boost: f64,
	pub seed_priority: f64,
	/// Weight of the polygon centroid when placing a seeded node; 0 keeps the raw projection.
	pub seed_blend: f64,
	/// `{x}` and `{y}` are replaced by the centroid coordinates.
	pub seed_anchor_template: String,
}

impl Default for Scheduler {
	fn default() -> Self {
		Self {
			lambda_trend: 0.3,
			lambda_sim: 0.2,
			lambda_depth: 0.05,
			top_k: 10,
			seed_score: 0.5,
			seed_priority: 1.0,
		}
	}
}

impl Default for Budget {
	fn default() -> Self {
		Self { ceiling_usd: 5.0, backoff_ms: 60_000 }
	}
}

impl Default for Worker {
	fn default() -> Self {
		Self {
			batch_size: 20,
			children_per_node: 3,
			idle_backoff_ms: 1_000,
			error_backoff_ms: 1_000,
			cycle_pause_ms: 100,
			heartbeat_interval_ms: 15_000,
			embedded: false,
		}
	}
}

impl Default for Projection {
	fn default() -> Self {
		Self { min_corpus: 10, refit_every: 50, power_iterations: 64 }
	}
}

impl Default for Focus {
	fn default() -> Self {
		Self {
			explore_boost: 2.0,
			extend_boost: 1.5,
			seed_priority: 1.0,
			seed_blend: 0.5,
			seed_anchor_template: "Explore area at coordinates ({x}, {y})".to_string(),
		}
	}
}

fn default_fanout_capacity() -> usize {
	1_024
}

fn default_max_prompt_tokens() -> u32 {
	512
}

fn default_max_attempts() -> u32 {
	3
}
