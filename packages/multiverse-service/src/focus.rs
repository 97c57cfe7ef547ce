use serde::{Deserialize, Serialize};

use crate::{Error, ExplorerService, Result};
use multiverse_domain::{Node, NodeId, Point, Polygon, Turn, projection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusMode {
	Explore,
	Extend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FocusZoneRequest {
	pub poly: Vec<Point>,
	pub mode: FocusMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusStatus {
	Boosted,
	Seeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusZoneResponse {
	pub status: FocusStatus,
	pub nodes_affected: u64,
}

impl ExplorerService {
	/// Boosts the queued nodes projected inside the zone, or seeds one when the zone is empty.
	pub async fn focus_zone(&self, req: FocusZoneRequest) -> Result<FocusZoneResponse> {
		let polygon =
			Polygon::new(req.poly).map_err(|err| Error::invalid(err.to_string(), "$.poly"))?;
		let inside: Vec<NodeId> = self
			.store
			.all()
			.await?
			.into_iter()
			.filter(|node| polygon.contains(node.xy))
			.map(|node| node.id)
			.collect();

		if inside.is_empty() {
			return self.seed_zone(&polygon).await;
		}

		let factor = self.boost_factor(req.mode);
		let boosted = self.store.boost(&inside, factor).await?;

		tracing::info!(
			mode = ?req.mode,
			factor,
			inside = inside.len(),
			boosted,
			"Boosted focus zone."
		);

		Ok(FocusZoneResponse { status: FocusStatus::Boosted, nodes_affected: inside.len() as u64 })
	}

	pub fn boost_factor(&self, mode: FocusMode) -> f64 {
		match mode {
			FocusMode::Explore => self.cfg.focus.explore_boost,
			FocusMode::Extend => self.cfg.focus.extend_boost,
		}
	}

	async fn seed_zone(&self, polygon: &Polygon) -> Result<FocusZoneResponse> {
		let focus = &self.cfg.focus;
		let centroid = polygon.centroid();
		let anchor = anchor_prompt(&focus.seed_anchor_template, centroid);
		let (variants, _) = self.mutate(&[Turn::user(anchor.clone())], 1).await?;
		let prompt = variants.into_iter().next().unwrap_or(anchor);
		let embedding = self.embed(&prompt).await?;
		let model = self.store.load_projection().await?;
		let projected = projection::project(model.as_ref(), &embedding);
		let mut node = Node::new(NodeId::generate(), prompt, 1, None, embedding);

		node.score = Some(self.cfg.scheduler.seed_score);
		node.xy = projected.blend(centroid, focus.seed_blend);

		self.store.save(&node).await?;
		self.store.push(&node.id, focus.seed_priority).await?;
		self.store.publish(&node.graph_update()).await;

		tracing::info!(
			node_id = %node.id,
			x = node.xy.x,
			y = node.xy.y,
			priority = focus.seed_priority,
			"Seeded empty focus zone."
		);

		Ok(FocusZoneResponse { status: FocusStatus::Seeded, nodes_affected: 1 })
	}
}

fn anchor_prompt(template: &str, centroid: Point) -> String {
	template
		.replace("{x}", &format!("{:.2}", centroid.x))
		.replace("{y}", &format!("{:.2}", centroid.y))
}
