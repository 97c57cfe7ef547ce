use serde::{Deserialize, Serialize};

use crate::{Error, ExplorerService, Result};
use multiverse_domain::{SchedulerSettings, SettingsPatch};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
	pub prompt_tokens: u64,
	pub completion_tokens: u64,
	pub total_cost: f64,
	pub ceiling_usd: f64,
	pub throttled: bool,
}

impl ExplorerService {
	/// The record a fresh store starts from: configured weights and ceiling at version 1.
	pub fn default_settings(&self) -> SchedulerSettings {
		let scheduler = &self.cfg.scheduler;

		SchedulerSettings {
			lambda_trend: scheduler.lambda_trend,
			lambda_sim: scheduler.lambda_sim,
			lambda_depth: scheduler.lambda_depth,
			budget_usd: self.cfg.budget.ceiling_usd,
			version: 1,
		}
	}

	pub async fn settings(&self) -> Result<SchedulerSettings> {
		Ok(self.store.load_settings(self.default_settings()).await?)
	}

	pub async fn patch_settings(&self, patch: SettingsPatch) -> Result<SchedulerSettings> {
		if patch.is_empty() {
			return Err(Error::InvalidRequest {
				message: "Provide at least one of lambda_trend, lambda_sim, lambda_depth, budget_usd."
					.to_string(),
				fields: Vec::new(),
			});
		}

		let invalid = patch.invalid_fields();

		if !invalid.is_empty() {
			return Err(Error::InvalidRequest {
				message: "Settings must be finite and non-negative.".to_string(),
				fields: invalid.into_iter().map(|name| format!("$.{name}")).collect(),
			});
		}

		let updated = self.store.patch_settings(patch, self.default_settings()).await?;

		tracing::info!(
			lambda_trend = updated.lambda_trend,
			lambda_sim = updated.lambda_sim,
			lambda_depth = updated.lambda_depth,
			budget_usd = updated.budget_usd,
			version = updated.version,
			"Scheduler settings updated."
		);

		Ok(updated)
	}

	pub async fn usage(&self) -> Result<UsageReport> {
		let usage = self.store.usage().await?;
		let settings = self.settings().await?;

		Ok(UsageReport {
			prompt_tokens: usage.prompt_tokens,
			completion_tokens: usage.completion_tokens,
			total_cost: usage.cost,
			ceiling_usd: settings.budget_usd,
			throttled: is_throttled(usage.cost, settings.budget_usd),
		})
	}
}

/// Expansion stops once spending reaches the ceiling.
pub fn is_throttled(total_cost: f64, ceiling_usd: f64) -> bool {
	total_cost >= ceiling_usd
}
