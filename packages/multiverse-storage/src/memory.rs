//! Process-local backend. Every operation runs under one lock, which gives the same
//! atomicity the Postgres backend gets from row locks.

use std::{
	cmp::{Ordering, Reverse},
	collections::{BTreeSet, HashMap},
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::{FrontierEntry, Result};
use multiverse_domain::{GraphUpdate, Node, NodeId, Point, SchedulerSettings, SettingsPatch, Usage};

#[derive(Clone)]
pub struct MemoryStore {
	state: Arc<Mutex<State>>,
	updates: broadcast::Sender<GraphUpdate>,
	vector_dim: usize,
}
impl MemoryStore {
	pub fn new(vector_dim: u32, fanout_capacity: usize) -> Self {
		let (updates, _) = broadcast::channel(fanout_capacity.max(1));

		Self {
			state: Arc::new(Mutex::new(State::default())),
			updates,
			vector_dim: vector_dim as usize,
		}
	}

	pub async fn save(&self, node: &Node) -> Result<()> {
		let mut state = self.lock();

		if let Some(existing) = state.nodes.get(&node.id) {
			crate::check_immutable((&existing.parent, existing.depth), node)?;

			let merged = crate::merge(existing.clone(), node);

			state.nodes.insert(node.id.clone(), merged);

			return Ok(());
		}

		let parent_depth = node
			.parent
			.as_ref()
			.and_then(|parent| state.nodes.get(parent))
			.map(|parent| parent.depth);

		crate::check_insert(node, self.vector_dim, parent_depth)?;

		state.order.push(node.id.clone());
		state.nodes.insert(node.id.clone(), node.clone());

		Ok(())
	}

	pub async fn get(&self, id: &NodeId) -> Result<Option<Node>> {
		Ok(self.lock().nodes.get(id).cloned())
	}

	pub async fn all(&self) -> Result<Vec<Node>> {
		let state = self.lock();

		Ok(state.order.iter().filter_map(|id| state.nodes.get(id).cloned()).collect())
	}

	pub async fn count(&self) -> Result<u64> {
		Ok(self.lock().nodes.len() as u64)
	}

	pub async fn top_scored(&self, k: usize) -> Result<Vec<Node>> {
		let state = self.lock();
		let mut scored: Vec<&Node> = state.nodes.values().filter(|n| n.score.is_some()).collect();

		scored.sort_by(|a, b| {
			let (sa, sb) = (a.score.unwrap_or(0.0), b.score.unwrap_or(0.0));

			sb.total_cmp(&sa).then_with(|| a.id.cmp(&b.id))
		});

		Ok(scored.into_iter().take(k).cloned().collect())
	}

	pub async fn path(&self, id: &NodeId) -> Result<Vec<Node>> {
		let state = self.lock();
		let mut path = Vec::new();
		let mut cursor = state.nodes.get(id);

		while let Some(node) = cursor {
			path.push(node.clone());

			cursor = node.parent.as_ref().and_then(|parent| state.nodes.get(parent));
		}

		path.reverse();

		Ok(path)
	}

	pub async fn update_xy(&self, points: &[(NodeId, Point)]) -> Result<u64> {
		let mut state = self.lock();
		let mut updated = 0;

		for (id, xy) in points {
			if let Some(node) = state.nodes.get_mut(id) {
				node.xy = *xy;
				updated += 1;
			}
		}

		Ok(updated)
	}

	pub async fn push(&self, id: &NodeId, priority: f64) -> Result<()> {
		self.lock().frontier.insert(id.clone(), priority);

		Ok(())
	}

	pub async fn pop_batch(&self, n: usize) -> Result<Vec<FrontierEntry>> {
		let mut state = self.lock();

		Ok(std::iter::from_fn(|| state.frontier.pop_first()).take(n).collect())
	}

	pub async fn frontier_size(&self) -> Result<u64> {
		Ok(self.lock().frontier.len() as u64)
	}

	pub async fn priority(&self, id: &NodeId) -> Result<Option<f64>> {
		Ok(self.lock().frontier.get(id))
	}

	pub async fn max_priority(&self) -> Result<Option<f64>> {
		Ok(self.lock().frontier.entries().next().map(|entry| entry.priority))
	}

	pub async fn frontier_entries(&self) -> Result<Vec<FrontierEntry>> {
		Ok(self.lock().frontier.entries().collect())
	}

	pub async fn boost(&self, ids: &[NodeId], factor: f64) -> Result<u64> {
		let mut state = self.lock();
		let mut boosted = 0;

		for id in ids {
			if let Some(priority) = state.frontier.get(id) {
				let boosted_priority =
					if priority >= 0.0 { priority * factor } else { priority / factor };

				state.frontier.insert(id.clone(), boosted_priority);

				boosted += 1;
			}
		}

		Ok(boosted)
	}

	pub async fn add_usage(&self, usage: Usage) -> Result<Usage> {
		let mut state = self.lock();

		state.usage = state.usage.add(usage);

		Ok(state.usage)
	}

	pub async fn usage(&self) -> Result<Usage> {
		Ok(self.lock().usage)
	}

	pub async fn load_settings(&self, defaults: SchedulerSettings) -> Result<SchedulerSettings> {
		Ok(*self.lock().settings.get_or_insert(defaults))
	}

	pub async fn patch_settings(
		&self,
		patch: SettingsPatch,
		defaults: SchedulerSettings,
	) -> Result<SchedulerSettings> {
		let mut state = self.lock();
		let next = patch.apply(*state.settings.get_or_insert(defaults));

		state.settings = Some(next);

		Ok(next)
	}

	pub async fn get_blob(&self, name: &str) -> Result<Option<Value>> {
		Ok(self.lock().blobs.get(name).cloned())
	}

	pub async fn put_blob(&self, name: &str, payload: &Value) -> Result<()> {
		self.lock().blobs.insert(name.to_string(), payload.clone());

		Ok(())
	}

	pub async fn publish(&self, update: &GraphUpdate) {
		// No receivers is the common case between observers.
		let _ = self.updates.send(update.clone());
	}

	pub fn subscribe(&self) -> broadcast::Receiver<GraphUpdate> {
		self.updates.subscribe()
	}

	fn lock(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

#[derive(Default)]
struct State {
	nodes: HashMap<NodeId, Node>,
	order: Vec<NodeId>,
	frontier: Frontier,
	usage: Usage,
	settings: Option<SchedulerSettings>,
	blobs: HashMap<String, Value>,
}

/// Priority per node plus an index ordered by priority descending, then id ascending.
#[derive(Default)]
struct Frontier {
	priorities: HashMap<NodeId, f64>,
	ordered: BTreeSet<(Reverse<Rank>, NodeId)>,
}
impl Frontier {
	fn len(&self) -> usize {
		self.priorities.len()
	}

	fn get(&self, id: &NodeId) -> Option<f64> {
		self.priorities.get(id).copied()
	}

	/// Replaces any earlier priority for `id`.
	fn insert(&mut self, id: NodeId, priority: f64) {
		if let Some(old) = self.priorities.insert(id.clone(), priority) {
			self.ordered.remove(&(Reverse(Rank(old)), id.clone()));
		}

		self.ordered.insert((Reverse(Rank(priority)), id));
	}

	fn pop_first(&mut self) -> Option<FrontierEntry> {
		let (Reverse(Rank(priority)), id) = self.ordered.pop_first()?;

		self.priorities.remove(&id);

		Some(FrontierEntry { id, priority })
	}

	fn entries(&self) -> impl Iterator<Item = FrontierEntry> + '_ {
		self.ordered
			.iter()
			.map(|(Reverse(Rank(priority)), id)| FrontierEntry { id: id.clone(), priority: *priority })
	}
}

#[derive(Clone, Copy, Debug)]
struct Rank(f64);
impl PartialEq for Rank {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}
impl Eq for Rank {}
impl PartialOrd for Rank {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for Rank {
	fn cmp(&self, other: &Self) -> Ordering {
		self.0.total_cmp(&other.0)
	}
}
