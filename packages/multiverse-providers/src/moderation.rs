use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// Returns the flagged categories, or `None` when the text passes.
///
/// Disabled moderation passes everything. A moderation endpoint that cannot be reached
/// does not block the call: the failure is logged and the text passes.
pub async fn flagged(
	cfg: &multiverse_config::ModerationConfig,
	text: &str,
) -> Result<Option<String>> {
	if !cfg.enabled {
		return Ok(None);
	}

	match request(cfg, text).await {
		Ok(json) => parse_moderation_response(&json),
		Err(err) => {
			tracing::error!(error = %err, "Moderation check failed. Allowing content.");

			Ok(None)
		},
	}
}

async fn request(cfg: &multiverse_config::ModerationConfig, text: &str) -> Result<Value> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({ "model": cfg.model, "input": text });
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;

	Ok(res.error_for_status()?.json().await?)
}

fn parse_moderation_response(json: &Value) -> Result<Option<String>> {
	let result = json
		.get("results")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Moderation response is missing results.".to_string(),
		})?;

	if !result.get("flagged").and_then(|v| v.as_bool()).unwrap_or(false) {
		return Ok(None);
	}

	let mut categories: Vec<&str> = result
		.get("categories")
		.and_then(|v| v.as_object())
		.map(|map| {
			map.iter()
				.filter(|(_, hit)| hit.as_bool() == Some(true))
				.map(|(name, _)| name.as_str())
				.collect()
		})
		.unwrap_or_default();

	categories.sort_unstable();

	if categories.is_empty() {
		return Ok(Some("unspecified".to_string()));
	}

	Ok(Some(categories.join(", ")))
}
