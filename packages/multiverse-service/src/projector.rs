use serde::{Deserialize, Serialize};

use crate::{Error, ExplorerService, Result};
use multiverse_domain::{
	NodeId, Point, ProjectionModel,
	projection::{self, ProjectionError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefitReport {
	pub corpus_size: u64,
	pub reprojected: u64,
}

impl ExplorerService {
	pub async fn project(&self, embedding: &[f32]) -> Result<Point> {
		let model = self.store.load_projection().await?;

		Ok(projection::project(model.as_ref(), embedding))
	}

	/// Refits when the corpus first reaches `min_corpus` and again every `refit_every` nodes.
	pub async fn refit_if_needed(&self) -> Result<Option<RefitReport>> {
		let cfg = &self.cfg.projection;
		let count = self.store.count().await?;
		let model = self.store.load_projection().await?;

		if !projection::needs_refit(
			count,
			model.as_ref(),
			u64::from(cfg.min_corpus),
			u64::from(cfg.refit_every),
		) {
			return Ok(None);
		}

		self.refit().await.map(Some)
	}

	/// Fits a new model on every stored embedding, persists it, then re-projects every node.
	pub async fn refit(&self) -> Result<RefitReport> {
		let cfg = &self.cfg.projection;
		let nodes = self.store.all().await?;

		if (nodes.len() as u64) < u64::from(cfg.min_corpus) {
			return Err(Error::InvalidRequest {
				message: format!(
					"Refitting needs at least {} nodes, found {}.",
					cfg.min_corpus,
					nodes.len()
				),
				fields: Vec::new(),
			});
		}

		let vectors: Vec<Vec<f32>> = nodes.iter().map(|node| node.embedding.clone()).collect();
		let model = ProjectionModel::fit(&vectors, cfg.power_iterations).map_err(fit_error)?;

		self.store.save_projection(&model).await?;

		let points: Vec<(NodeId, Point)> =
			nodes.iter().map(|node| (node.id.clone(), model.project(&node.embedding))).collect();
		let reprojected = self.store.update_xy(&points).await?;

		tracing::info!(corpus_size = model.corpus_size, reprojected, "Projection model refit.");

		Ok(RefitReport { corpus_size: model.corpus_size, reprojected })
	}
}

fn fit_error(err: ProjectionError) -> Error {
	Error::InvalidRequest { message: err.to_string(), fields: Vec::new() }
}
