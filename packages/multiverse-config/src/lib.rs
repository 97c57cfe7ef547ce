mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Budget, Config, EmbeddingProviderConfig, Focus, LlmProviderConfig, ModerationConfig, Postgres,
	Projection, Providers, Scheduler, Service, Storage, StorageBackend, Worker,
};

use std::{env, fs, path::Path};

pub const ENV_PG_DSN: &str = "MULTIVERSE_PG_DSN";
pub const ENV_EMBEDDING_API_KEY: &str = "MULTIVERSE_EMBEDDING_API_KEY";
pub const ENV_LLM_API_KEY: &str = "MULTIVERSE_LLM_API_KEY";

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	apply_env_overrides(&mut cfg, |key| env::var(key).ok());
	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

/// Secrets may live outside the file. Empty values are ignored.
pub fn apply_env_overrides<F>(cfg: &mut Config, lookup: F)
where
	F: Fn(&str) -> Option<String>,
{
	let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

	if let Some(dsn) = lookup(ENV_PG_DSN) {
		match cfg.storage.postgres.as_mut() {
			Some(postgres) => postgres.dsn = dsn,
			None => cfg.storage.postgres = Some(Postgres { dsn, pool_max_conns: 10 }),
		}
	}
	if let Some(key) = lookup(ENV_EMBEDDING_API_KEY) {
		cfg.providers.embedding.api_key = key;
	}
	if let Some(key) = lookup(ENV_LLM_API_KEY) {
		cfg.providers.mutator.api_key = key.clone();
		cfg.providers.responder.api_key = key.clone();
		cfg.providers.critic.api_key = key.clone();
		cfg.providers.moderation.api_key = key;
	}
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.service.admin_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.admin_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.vector_dim == 0 {
		return Err(Error::Validation {
			message: "storage.vector_dim must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.vector_dim.".to_string(),
		});
	}
	if cfg.storage.fanout_capacity == 0 {
		return Err(Error::Validation {
			message: "storage.fanout_capacity must be greater than zero.".to_string(),
		});
	}

	match cfg.storage.backend {
		StorageBackend::Postgres => {
			let Some(postgres) = cfg.storage.postgres.as_ref() else {
				return Err(Error::Validation {
					message: "storage.postgres is required when storage.backend is postgres."
						.to_string(),
				});
			};

			if postgres.dsn.trim().is_empty() {
				return Err(Error::Validation {
					message: "storage.postgres.dsn must be non-empty.".to_string(),
				});
			}
			if postgres.pool_max_conns == 0 {
				return Err(Error::Validation {
					message: "storage.postgres.pool_max_conns must be greater than zero."
						.to_string(),
				});
			}
		},
		StorageBackend::Memory =>
			if !cfg.worker.embedded {
				return Err(Error::Validation {
					message: "worker.embedded must be true when storage.backend is memory."
						.to_string(),
				});
			},
	}

	if cfg.providers.embedding.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "providers.embedding.api_key must be non-empty.".to_string(),
		});
	}
	if cfg.providers.moderation.enabled && cfg.providers.moderation.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "providers.moderation.api_key must be non-empty when moderation is enabled."
				.to_string(),
		});
	}

	for (name, llm) in [
		("mutator", &cfg.providers.mutator),
		("responder", &cfg.providers.responder),
		("critic", &cfg.providers.critic),
	] {
		validate_llm(name, llm)?;
	}

	validate_weight("scheduler.lambda_trend", cfg.scheduler.lambda_trend)?;
	validate_weight("scheduler.lambda_sim", cfg.scheduler.lambda_sim)?;
	validate_weight("scheduler.lambda_depth", cfg.scheduler.lambda_depth)?;

	if cfg.scheduler.top_k == 0 {
		return Err(Error::Validation {
			message: "scheduler.top_k must be greater than zero.".to_string(),
		});
	}
	if !(0.0..=1.0).contains(&cfg.scheduler.seed_score) {
		return Err(Error::Validation {
			message: "scheduler.seed_score must be in the range 0.0-1.0.".to_string(),
		});
	}
	if !cfg.scheduler.seed_priority.is_finite() {
		return Err(Error::Validation {
			message: "scheduler.seed_priority must be a finite number.".to_string(),
		});
	}
	if !cfg.budget.ceiling_usd.is_finite() || cfg.budget.ceiling_usd < 0.0 {
		return Err(Error::Validation {
			message: "budget.ceiling_usd must be a finite number zero or greater.".to_string(),
		});
	}
	if cfg.worker.batch_size == 0 {
		return Err(Error::Validation {
			message: "worker.batch_size must be greater than zero.".to_string(),
		});
	}
	if cfg.worker.children_per_node == 0 {
		return Err(Error::Validation {
			message: "worker.children_per_node must be greater than zero.".to_string(),
		});
	}
	if cfg.worker.heartbeat_interval_ms == 0 {
		return Err(Error::Validation {
			message: "worker.heartbeat_interval_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.projection.min_corpus < 2 {
		return Err(Error::Validation {
			message: "projection.min_corpus must be at least 2.".to_string(),
		});
	}
	if cfg.projection.refit_every == 0 {
		return Err(Error::Validation {
			message: "projection.refit_every must be greater than zero.".to_string(),
		});
	}
	if cfg.projection.power_iterations == 0 {
		return Err(Error::Validation {
			message: "projection.power_iterations must be greater than zero.".to_string(),
		});
	}
	if !cfg.focus.explore_boost.is_finite() || cfg.focus.explore_boost < 1.0 {
		return Err(Error::Validation {
			message: "focus.explore_boost must be a finite number of at least 1.0.".to_string(),
		});
	}
	if !cfg.focus.extend_boost.is_finite() || cfg.focus.extend_boost < 1.0 {
		return Err(Error::Validation {
			message: "focus.extend_boost must be a finite number of at least 1.0.".to_string(),
		});
	}
	if cfg.focus.explore_boost < cfg.focus.extend_boost {
		return Err(Error::Validation {
			message: "focus.explore_boost must be greater than or equal to focus.extend_boost."
				.to_string(),
		});
	}
	if !cfg.focus.seed_priority.is_finite() {
		return Err(Error::Validation {
			message: "focus.seed_priority must be a finite number.".to_string(),
		});
	}
	if !(0.0..=1.0).contains(&cfg.focus.seed_blend) {
		return Err(Error::Validation {
			message: "focus.seed_blend must be in the range 0.0-1.0.".to_string(),
		});
	}

	Ok(())
}

fn validate_llm(name: &str, llm: &LlmProviderConfig) -> Result<()> {
	if llm.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: format!("providers.{name}.api_key must be non-empty."),
		});
	}
	if llm.model.trim().is_empty() {
		return Err(Error::Validation {
			message: format!("providers.{name}.model must be non-empty."),
		});
	}
	if llm.max_attempts == 0 {
		return Err(Error::Validation {
			message: format!("providers.{name}.max_attempts must be greater than zero."),
		});
	}
	if llm.max_prompt_tokens == 0 {
		return Err(Error::Validation {
			message: format!("providers.{name}.max_prompt_tokens must be greater than zero."),
		});
	}
	if llm.input_usd_per_1k < 0.0 || llm.output_usd_per_1k < 0.0 {
		return Err(Error::Validation {
			message: format!("providers.{name} pricing must be zero or greater."),
		});
	}

	Ok(())
}

fn validate_weight(key: &str, value: f64) -> Result<()> {
	if !value.is_finite() || value < 0.0 {
		return Err(Error::Validation {
			message: format!("{key} must be a finite number zero or greater."),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	for api_base in [
		&mut cfg.providers.embedding.api_base,
		&mut cfg.providers.mutator.api_base,
		&mut cfg.providers.responder.api_base,
		&mut cfg.providers.critic.api_base,
		&mut cfg.providers.moderation.api_base,
	] {
		let trimmed = api_base.trim().trim_end_matches('/').to_string();

		*api_base = trimmed;
	}

	if cfg.storage.backend == StorageBackend::Memory
		&& cfg.storage.postgres.as_ref().map(|pg| pg.dsn.trim().is_empty()).unwrap_or(false)
	{
		cfg.storage.postgres = None;
	}
}
