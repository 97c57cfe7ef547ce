//! Operations shared by the API and the worker: seeding, snapshots, focus zones, settings,
//! projection upkeep, and metered collaborator calls.

pub mod focus;
pub mod graph;
pub mod projector;
pub mod seed;
pub mod settings;

mod error;

pub use error::{Error, Result};
pub use focus::{FocusMode, FocusStatus, FocusZoneRequest, FocusZoneResponse};
pub use graph::ConversationResponse;
pub use projector::RefitReport;
pub use seed::{SeedRequest, SeedResponse};
pub use settings::UsageReport;

use std::{future::Future, pin::Pin, sync::Arc};

use multiverse_config::{Config, EmbeddingProviderConfig, LlmProviderConfig, ModerationConfig};
use multiverse_domain::{Turn, Usage};
use multiverse_providers::{
	chat::Completion,
	critic::{self, Critique},
	embedding, mutator, responder,
};
use multiverse_storage::Store;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, multiverse_providers::Result<Vec<Vec<f32>>>>;
}

/// Proposes new stimuli continuing a dialogue.
pub trait MutatorProvider
where
	Self: Send + Sync,
{
	fn variants<'a>(
		&'a self,
		llm: &'a LlmProviderConfig,
		moderation: &'a ModerationConfig,
		dialogue: &'a [Turn],
		k: usize,
	) -> BoxFuture<'a, multiverse_providers::Result<(Vec<String>, Usage)>>;
}

/// Replies to the last stimulus of a dialogue.
pub trait ResponderProvider
where
	Self: Send + Sync,
{
	fn respond<'a>(
		&'a self,
		llm: &'a LlmProviderConfig,
		moderation: &'a ModerationConfig,
		dialogue: &'a [Turn],
	) -> BoxFuture<'a, multiverse_providers::Result<Completion>>;
}

/// Scores a whole dialogue trajectory.
pub trait CriticProvider
where
	Self: Send + Sync,
{
	fn score<'a>(
		&'a self,
		llm: &'a LlmProviderConfig,
		moderation: &'a ModerationConfig,
		dialogue: &'a [Turn],
	) -> BoxFuture<'a, multiverse_providers::Result<(Critique, Usage)>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub mutator: Arc<dyn MutatorProvider>,
	pub responder: Arc<dyn ResponderProvider>,
	pub critic: Arc<dyn CriticProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		mutator: Arc<dyn MutatorProvider>,
		responder: Arc<dyn ResponderProvider>,
		critic: Arc<dyn CriticProvider>,
	) -> Self {
		Self { embedding, mutator, responder, critic }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self {
			embedding: provider.clone(),
			mutator: provider.clone(),
			responder: provider.clone(),
			critic: provider,
		}
	}
}

struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, multiverse_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}

impl MutatorProvider for DefaultProviders {
	fn variants<'a>(
		&'a self,
		llm: &'a LlmProviderConfig,
		moderation: &'a ModerationConfig,
		dialogue: &'a [Turn],
		k: usize,
	) -> BoxFuture<'a, multiverse_providers::Result<(Vec<String>, Usage)>> {
		Box::pin(mutator::variants(llm, moderation, dialogue, k))
	}
}

impl ResponderProvider for DefaultProviders {
	fn respond<'a>(
		&'a self,
		llm: &'a LlmProviderConfig,
		moderation: &'a ModerationConfig,
		dialogue: &'a [Turn],
	) -> BoxFuture<'a, multiverse_providers::Result<Completion>> {
		Box::pin(responder::respond(llm, moderation, dialogue))
	}
}

impl CriticProvider for DefaultProviders {
	fn score<'a>(
		&'a self,
		llm: &'a LlmProviderConfig,
		moderation: &'a ModerationConfig,
		dialogue: &'a [Turn],
	) -> BoxFuture<'a, multiverse_providers::Result<(Critique, Usage)>> {
		Box::pin(critic::score(llm, moderation, dialogue))
	}
}

pub struct ExplorerService {
	pub cfg: Config,
	pub store: Store,
	pub providers: Providers,
}
impl ExplorerService {
	pub fn new(cfg: Config, store: Store) -> Self {
		Self { cfg, store, providers: Providers::default() }
	}

	pub fn with_providers(cfg: Config, store: Store, providers: Providers) -> Self {
		Self { cfg, store, providers }
	}

	pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
		let texts = [text.to_string()];
		let vectors = self.providers.embedding.embed(&self.cfg.providers.embedding, &texts).await?;

		vectors.into_iter().next().ok_or_else(|| Error::Provider {
			message: "Embedding provider returned no vectors.".to_string(),
		})
	}

	/// Up to `k` new stimuli for `dialogue`. Usage of every call that succeeded is accrued
	/// before returning.
	pub async fn mutate(&self, dialogue: &[Turn], k: usize) -> Result<(Vec<String>, Usage)> {
		let providers = &self.cfg.providers;
		let (variants, usage) = self
			.providers
			.mutator
			.variants(&providers.mutator, &providers.moderation, dialogue, k)
			.await?;

		self.accrue("mutator", usage).await?;

		Ok((variants, usage))
	}

	pub async fn respond(&self, dialogue: &[Turn]) -> Result<Completion> {
		let providers = &self.cfg.providers;
		let completion = self
			.providers
			.responder
			.respond(&providers.responder, &providers.moderation, dialogue)
			.await?;

		self.accrue("responder", completion.usage).await?;

		Ok(completion)
	}

	pub async fn critique(&self, dialogue: &[Turn]) -> Result<(Critique, Usage)> {
		let providers = &self.cfg.providers;
		let (critique, usage) = self
			.providers
			.critic
			.score(&providers.critic, &providers.moderation, dialogue)
			.await?;

		self.accrue("critic", usage).await?;

		Ok((critique, usage))
	}

	/// Embeddings of the globally best-scored nodes, the similarity reference for priorities.
	pub async fn top_k_embeddings(&self) -> Result<Vec<Vec<f32>>> {
		let nodes = self.store.top_scored(self.cfg.scheduler.top_k as usize).await?;

		Ok(nodes.into_iter().map(|node| node.embedding).collect())
	}

	async fn accrue(&self, collaborator: &'static str, usage: Usage) -> Result<Usage> {
		let totals = self.store.add_usage(usage).await?;

		tracing::info!(
			collaborator,
			prompt_tokens = usage.prompt_tokens,
			completion_tokens = usage.completion_tokens,
			call_cost = usage.cost,
			total_cost = totals.cost,
			"Collaborator usage accrued."
		);

		Ok(totals)
	}
}
