use serde::Serialize;

use crate::{Error, ExplorerService, Result};
use multiverse_domain::{GraphUpdate, NodeId, Turn, conversation};

#[derive(Debug, Clone, Serialize)]
pub struct ConversationResponse {
	pub node_id: NodeId,
	pub depth: u32,
	pub score: Option<f64>,
	pub nodes_in_path: usize,
	pub turns: Vec<Turn>,
}

impl ExplorerService {
	/// Observer view of every stored node, for clients joining after updates were sent.
	pub async fn graph(&self) -> Result<Vec<GraphUpdate>> {
		let nodes = self.store.all().await?;

		Ok(nodes.iter().map(|node| node.graph_update()).collect())
	}

	pub async fn conversation(&self, id: &NodeId) -> Result<ConversationResponse> {
		let path = self.store.path(id).await?;
		let Some(node) = path.last() else {
			return Err(Error::NotFound { message: format!("Node {id} does not exist.") });
		};

		Ok(ConversationResponse {
			node_id: node.id.clone(),
			depth: node.depth,
			score: node.score,
			nodes_in_path: path.len(),
			turns: conversation::dialogue(&path),
		})
	}
}
