//! Deterministic stand-ins for the HTTP collaborators.

use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use multiverse_config::{EmbeddingProviderConfig, LlmProviderConfig, ModerationConfig};
use multiverse_domain::{Role, Turn, Usage};
use multiverse_providers::{Error, Result, chat::Completion, critic::Critique};
use multiverse_service::{
	BoxFuture, CriticProvider, EmbeddingProvider, MutatorProvider, Providers, ResponderProvider,
};

pub const MUTATOR_CALL_USAGE: Usage =
	Usage { prompt_tokens: 20, completion_tokens: 10, cost: 0.002 };
pub const RESPONDER_CALL_USAGE: Usage =
	Usage { prompt_tokens: 10, completion_tokens: 5, cost: 0.001 };
pub const CRITIC_CALL_USAGE: Usage =
	Usage { prompt_tokens: 8, completion_tokens: 4, cost: 0.0005 };

/// Hashes text into a vector in `[0, 1)^dimensions`, so equal texts embed equally.
#[derive(Default)]
pub struct HashEmbedder {
	pub calls: AtomicUsize,
}

impl EmbeddingProvider for HashEmbedder {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		self.calls.fetch_add(texts.len(), Ordering::SeqCst);

		let vectors = texts.iter().map(|text| hash_vector(text, cfg.dimensions as usize)).collect();

		Box::pin(async move { Ok(vectors) })
	}
}

/// Returns numbered variants. `k` outputs per call, each billed as one call.
#[derive(Default)]
pub struct ScriptedMutator {
	pub calls: AtomicUsize,
}

impl MutatorProvider for ScriptedMutator {
	fn variants<'a>(
		&'a self,
		_llm: &'a LlmProviderConfig,
		_moderation: &'a ModerationConfig,
		dialogue: &'a [Turn],
		k: usize,
	) -> BoxFuture<'a, Result<(Vec<String>, Usage)>> {
		let call = self.calls.fetch_add(1, Ordering::SeqCst);
		let variants =
			(0..k).map(|i| format!("variant {call}.{i} after {} turns", dialogue.len())).collect();
		let mut usage = Usage::default();

		for _ in 0..k {
			usage = usage.add(MUTATOR_CALL_USAGE);
		}

		Box::pin(async move { Ok((variants, usage)) })
	}
}

/// What the responder does on its n-th call (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
	Error,
	Moderation,
}

#[derive(Default)]
pub struct ScriptedResponder {
	pub calls: AtomicUsize,
	pub failures: Vec<(usize, Failure)>,
}
impl ScriptedResponder {
	pub fn failing(failures: Vec<(usize, Failure)>) -> Self {
		Self { calls: AtomicUsize::new(0), failures }
	}
}

impl ResponderProvider for ScriptedResponder {
	fn respond<'a>(
		&'a self,
		_llm: &'a LlmProviderConfig,
		_moderation: &'a ModerationConfig,
		dialogue: &'a [Turn],
	) -> BoxFuture<'a, Result<Completion>> {
		let call = self.calls.fetch_add(1, Ordering::SeqCst);
		let failure = self.failures.iter().find(|(index, _)| *index == call).map(|(_, f)| *f);
		let stimulus = dialogue
			.iter()
			.rev()
			.find(|turn| turn.role == Role::User)
			.map(|turn| turn.content.clone())
			.unwrap_or_default();

		Box::pin(async move {
			match failure {
				Some(Failure::Error) => Err(Error::InvalidResponse {
					message: format!("Scripted responder failure on call {call}."),
				}),
				Some(Failure::Moderation) =>
					Err(Error::Moderation { categories: "harassment".to_string() }),
				None => Ok(Completion {
					content: format!("reply {call} to {stimulus}"),
					usage: RESPONDER_CALL_USAGE,
				}),
			}
		})
	}
}

/// Scores a dialogue from its length, clamped to `[0, 1]`.
#[derive(Default)]
pub struct ScriptedCritic {
	pub calls: AtomicUsize,
}

impl CriticProvider for ScriptedCritic {
	fn score<'a>(
		&'a self,
		_llm: &'a LlmProviderConfig,
		_moderation: &'a ModerationConfig,
		dialogue: &'a [Turn],
	) -> BoxFuture<'a, Result<(Critique, Usage)>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let score = (dialogue.len() as f64 / 10.0).min(1.0);
		let critique = Critique { score, reasoning: format!("{} turns", dialogue.len()) };

		Box::pin(async move { Ok((critique, CRITIC_CALL_USAGE)) })
	}
}

/// Handles on the scripted collaborators behind a [`Providers`] value.
pub struct Scripted {
	pub embedder: Arc<HashEmbedder>,
	pub mutator: Arc<ScriptedMutator>,
	pub responder: Arc<ScriptedResponder>,
	pub critic: Arc<ScriptedCritic>,
}
impl Scripted {
	pub fn new() -> Self {
		Self::with_responder(ScriptedResponder::default())
	}

	pub fn with_responder(responder: ScriptedResponder) -> Self {
		Self {
			embedder: Arc::new(HashEmbedder::default()),
			mutator: Arc::new(ScriptedMutator::default()),
			responder: Arc::new(responder),
			critic: Arc::new(ScriptedCritic::default()),
		}
	}

	pub fn providers(&self) -> Providers {
		Providers::new(
			self.embedder.clone(),
			self.mutator.clone(),
			self.responder.clone(),
			self.critic.clone(),
		)
	}
}

impl Default for Scripted {
	fn default() -> Self {
		Self::new()
	}
}

/// Deterministic components in `[0, 1)` drawn from the BLAKE3 output stream of `text`.
pub fn hash_vector(text: &str, dimensions: usize) -> Vec<f32> {
	let mut stream = blake3::Hasher::new().update(text.as_bytes()).finalize_xof();
	let mut bytes = vec![0_u8; dimensions * 4];

	stream.fill(&mut bytes);

	bytes
		.chunks_exact(4)
		.map(|chunk| {
			let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);

			// The top 24 bits fit an f32 mantissa exactly.
			(word >> 8) as f32 / 16_777_216.0
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hash_vector_is_stable_and_bounded() {
		let first = hash_vector("Where do rivers end?", 64);

		assert_eq!(first.len(), 64);
		assert_eq!(first, hash_vector("Where do rivers end?", 64));
		assert_ne!(first, hash_vector("Where do rivers begin?", 64));
		assert!(first.iter().all(|value| (0.0..1.0).contains(value)));
		// Shorter vectors are prefixes of the same output stream.
		assert_eq!(hash_vector("Where do rivers end?", 8), first[..8]);
	}
}
