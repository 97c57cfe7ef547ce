use serde::{Deserialize, Serialize};

use crate::{Error, ExplorerService, Result};
use multiverse_domain::{Node, NodeId, projection};

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRequest {
	pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedResponse {
	pub seed_id: NodeId,
}

impl ExplorerService {
	/// Creates a depth-0 root with the neutral seed score and queues it ahead of every
	/// existing entry.
	pub async fn seed(&self, req: SeedRequest) -> Result<SeedResponse> {
		if req.prompt.trim().is_empty() {
			return Err(Error::invalid("prompt must be a non-empty string.", "$.prompt"));
		}

		let embedding = self.embed(&req.prompt).await?;
		let model = self.store.load_projection().await?;
		let mut node = Node::new(NodeId::generate(), req.prompt, 0, None, embedding);

		node.score = Some(self.cfg.scheduler.seed_score);
		node.xy = projection::project(model.as_ref(), &node.embedding);

		self.store.save(&node).await?;

		let priority = match self.store.max_priority().await? {
			Some(max) => max.max(self.cfg.scheduler.seed_priority),
			None => self.cfg.scheduler.seed_priority,
		};

		self.store.push(&node.id, priority).await?;
		self.store.publish(&node.graph_update()).await;

		tracing::info!(node_id = %node.id, priority, "Seeded root node.");

		Ok(SeedResponse { seed_id: node.id })
	}
}
