//! Shared state of the explorer: node store, frontier, usage counters, settings record,
//! blobs, and the graph-update channel.

pub mod memory;
pub mod postgres;
pub mod schema;

mod error;

pub use error::Error;
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type Result<T, E = Error> = std::result::Result<T, E>;

use tokio::{sync::broadcast, task::JoinHandle};

use multiverse_domain::{
	GraphUpdate, Node, NodeId, Point, ProjectionModel, SchedulerSettings, SettingsPatch, Usage,
};

pub const FRONTIER: &str = "frontier";
pub const GRAPH_CHANNEL: &str = "graph_updates";
pub const PROJECTION_BLOB: &str = "projection_model";
pub const SETTINGS_RECORD: &str = "scheduler";

#[derive(Debug, Clone, PartialEq)]
pub struct FrontierEntry {
	pub id: NodeId,
	pub priority: f64,
}

#[derive(Clone)]
pub enum Store {
	Postgres(PgStore),
	Memory(MemoryStore),
}

macro_rules! dispatch {
	($self:ident, $store:ident => $call:expr) => {
		match $self {
			Store::Postgres($store) => $call,
			Store::Memory($store) => $call,
		}
	};
}

impl Store {
	/// Opens the configured backend. Postgres schemas are created on first use.
	pub async fn open(cfg: &multiverse_config::Config) -> Result<Self> {
		let storage = &cfg.storage;

		match storage.backend {
			multiverse_config::StorageBackend::Postgres => {
				let pg = storage.postgres.as_ref().ok_or_else(|| {
					Error::InvalidArgument("storage.postgres is not configured.".to_string())
				})?;
				let store =
					PgStore::connect(pg, storage.vector_dim, storage.fanout_capacity).await?;

				store.ensure_schema().await?;

				Ok(Self::Postgres(store))
			},
			multiverse_config::StorageBackend::Memory =>
				Ok(Self::Memory(MemoryStore::new(storage.vector_dim, storage.fanout_capacity))),
		}
	}

	/// Insert or merge by id. See [`merge`] for the field rules.
	pub async fn save(&self, node: &Node) -> Result<()> {
		dispatch!(self, store => store.save(node).await)
	}

	pub async fn get(&self, id: &NodeId) -> Result<Option<Node>> {
		dispatch!(self, store => store.get(id).await)
	}

	/// Every node in creation order.
	pub async fn all(&self) -> Result<Vec<Node>> {
		dispatch!(self, store => store.all().await)
	}

	pub async fn count(&self) -> Result<u64> {
		dispatch!(self, store => store.count().await)
	}

	/// Best-scored nodes, ties broken by id. Unscored nodes are excluded.
	pub async fn top_scored(&self, k: usize) -> Result<Vec<Node>> {
		dispatch!(self, store => store.top_scored(k).await)
	}

	/// Root-to-node path. Empty when `id` is unknown.
	pub async fn path(&self, id: &NodeId) -> Result<Vec<Node>> {
		dispatch!(self, store => store.path(id).await)
	}

	/// The only partial write: replaces `xy` of existing nodes and returns how many changed.
	pub async fn update_xy(&self, points: &[(NodeId, Point)]) -> Result<u64> {
		dispatch!(self, store => store.update_xy(points).await)
	}

	/// Insert or replace the priority of `id`.
	pub async fn push(&self, id: &NodeId, priority: f64) -> Result<()> {
		dispatch!(self, store => store.push(id, priority).await)
	}

	pub async fn pop_max(&self) -> Result<Option<FrontierEntry>> {
		Ok(self.pop_batch(1).await?.into_iter().next())
	}

	/// Atomically removes up to `n` entries, highest priority first. Concurrent callers never
	/// receive the same id.
	pub async fn pop_batch(&self, n: usize) -> Result<Vec<FrontierEntry>> {
		if n == 0 {
			return Ok(Vec::new());
		}

		dispatch!(self, store => store.pop_batch(n).await)
	}

	pub async fn frontier_size(&self) -> Result<u64> {
		dispatch!(self, store => store.frontier_size().await)
	}

	pub async fn priority(&self, id: &NodeId) -> Result<Option<f64>> {
		dispatch!(self, store => store.priority(id).await)
	}

	pub async fn max_priority(&self) -> Result<Option<f64>> {
		dispatch!(self, store => store.max_priority().await)
	}

	/// Entries ordered by priority, highest first.
	pub async fn frontier_entries(&self) -> Result<Vec<FrontierEntry>> {
		dispatch!(self, store => store.frontier_entries().await)
	}

	/// Raises each listed priority by `factor`: positive priorities are multiplied and
	/// negative ones divided. Returns how many entries were boosted; ids without a frontier
	/// entry are ignored.
	pub async fn boost(&self, ids: &[NodeId], factor: f64) -> Result<u64> {
		if !factor.is_finite() || factor <= 0.0 {
			return Err(Error::InvalidArgument(format!("Boost factor {factor} must be positive.")));
		}

		dispatch!(self, store => store.boost(ids, factor).await)
	}

	/// Adds to the running totals and returns the new totals.
	pub async fn add_usage(&self, usage: Usage) -> Result<Usage> {
		dispatch!(self, store => store.add_usage(usage).await)
	}

	pub async fn usage(&self) -> Result<Usage> {
		dispatch!(self, store => store.usage().await)
	}

	/// The shared settings record, created from `defaults` on first read.
	pub async fn load_settings(&self, defaults: SchedulerSettings) -> Result<SchedulerSettings> {
		dispatch!(self, store => store.load_settings(defaults).await)
	}

	/// Applies `patch` and bumps the version.
	pub async fn patch_settings(
		&self,
		patch: SettingsPatch,
		defaults: SchedulerSettings,
	) -> Result<SchedulerSettings> {
		dispatch!(self, store => store.patch_settings(patch, defaults).await)
	}

	pub async fn load_projection(&self) -> Result<Option<ProjectionModel>> {
		let blob = dispatch!(self, store => store.get_blob(PROJECTION_BLOB).await)?;

		blob.map(serde_json::from_value).transpose().map_err(Error::from)
	}

	pub async fn save_projection(&self, model: &ProjectionModel) -> Result<()> {
		let payload = serde_json::to_value(model)?;

		dispatch!(self, store => store.put_blob(PROJECTION_BLOB, &payload).await)
	}

	/// Best-effort announcement. Failures are logged, never returned.
	pub async fn publish(&self, update: &GraphUpdate) {
		dispatch!(self, store => store.publish(update).await)
	}

	/// Future graph updates only. A receiver that falls behind loses the oldest messages.
	pub fn subscribe(&self) -> broadcast::Receiver<GraphUpdate> {
		dispatch!(self, store => store.subscribe())
	}

	/// Starts forwarding cross-process notifications into [`Store::subscribe`] receivers.
	/// The memory backend delivers directly and needs no relay.
	pub fn spawn_relay(&self) -> Option<JoinHandle<()>> {
		match self {
			Self::Postgres(store) => Some(store.spawn_relay()),
			Self::Memory(_) => None,
		}
	}
}

/// Checks a node that is about to be inserted.
pub(crate) fn check_insert(
	node: &Node,
	vector_dim: usize,
	parent_depth: Option<u32>,
) -> Result<()> {
	if node.embedding.len() != vector_dim {
		return Err(Error::InvalidArgument(format!(
			"Embedding of node {} has {} dimensions, expected {vector_dim}.",
			node.id,
			node.embedding.len()
		)));
	}

	node.check_lineage(parent_depth).map_err(|err| Error::InvalidArgument(err.to_string()))
}

/// Rejects a save that would move an existing node in the tree.
pub(crate) fn check_immutable(existing: (&Option<NodeId>, u32), node: &Node) -> Result<()> {
	let (parent, depth) = existing;

	if parent != &node.parent || depth != node.depth {
		return Err(Error::Conflict(format!(
			"Node {} cannot change its parent or depth after creation.",
			node.id
		)));
	}

	Ok(())
}

/// Upsert rules: optional fields left unset keep their stored value, `embedding` keeps its
/// stored value, everything else is overwritten.
pub fn merge(existing: Node, incoming: &Node) -> Node {
	Node {
		id: existing.id,
		prompt: incoming.prompt.clone(),
		reply: incoming.reply.clone().or(existing.reply),
		score: incoming.score.or(existing.score),
		score_reasoning: incoming.score_reasoning.clone().or(existing.score_reasoning),
		depth: existing.depth,
		parent: existing.parent,
		embedding: existing.embedding,
		xy: incoming.xy,
		prompt_tokens: incoming.prompt_tokens.or(existing.prompt_tokens),
		completion_tokens: incoming.completion_tokens.or(existing.completion_tokens),
		agent_cost: incoming.agent_cost.or(existing.agent_cost),
	}
}
