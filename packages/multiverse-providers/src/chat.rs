use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use unicode_segmentation::UnicodeSegmentation;

use crate::{Error, Result};
use multiverse_domain::{Role, Turn, Usage};

const CHARS_PER_TOKEN: usize = 4;
const MIN_PARTIAL_CHARS: usize = 100;
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
	pub role: &'static str,
	pub content: String,
}
impl Message {
	pub fn system(content: impl Into<String>) -> Self {
		Self { role: "system", content: content.into() }
	}

	pub fn user(content: impl Into<String>) -> Self {
		Self { role: "user", content: content.into() }
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Self { role: "assistant", content: content.into() }
	}

	pub fn from_turn(turn: &Turn) -> Self {
		match turn.role {
			Role::User => Self::user(turn.content.clone()),
			Role::Assistant => Self::assistant(turn.content.clone()),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
	pub content: String,
	pub usage: Usage,
}

/// One chat completion: moderation, truncation, retried request, priced usage.
pub async fn chat(
	llm: &multiverse_config::LlmProviderConfig,
	moderation: &multiverse_config::ModerationConfig,
	messages: &[Message],
	response_format: Option<&Value>,
) -> Result<Completion> {
	for message in messages.iter().filter(|message| message.role == "user") {
		if let Some(categories) = crate::moderation::flagged(moderation, &message.content).await? {
			tracing::warn!(model = %llm.model, %categories, "Moderation rejected chat input.");

			return Err(Error::Moderation { categories });
		}
	}

	let messages = truncate(messages, llm.max_prompt_tokens as usize);
	let client = Client::builder().timeout(Duration::from_millis(llm.timeout_ms)).build()?;
	let url = format!("{}{}", llm.api_base, llm.path);
	let mut body = serde_json::json!({
		"model": llm.model,
		"temperature": llm.temperature,
		"messages": messages,
	});

	if let Some(format) = response_format {
		body["response_format"] = format.clone();
	}

	let headers = crate::auth_headers(&llm.api_key, &llm.default_headers)?;
	let mut attempt = 1;
	let json: Value = loop {
		let outcome = client.post(&url).headers(headers.clone()).json(&body).send().await;
		let retryable = match &outcome {
			Ok(res) => is_retryable_status(res.status()),
			Err(err) => err.is_timeout() || err.is_connect(),
		};

		if retryable && attempt < llm.max_attempts {
			let delay = backoff(attempt);

			tracing::warn!(
				model = %llm.model,
				attempt,
				delay_ms = delay.as_millis() as u64,
				"Chat request failed. Retrying."
			);
			tokio::time::sleep(delay).await;

			attempt += 1;

			continue;
		}

		break outcome?.error_for_status()?.json().await?;
	};
	let (content, prompt_tokens, completion_tokens) = parse_chat_response(&json)?;
	let usage = Usage {
		prompt_tokens,
		completion_tokens,
		cost: price(llm, prompt_tokens, completion_tokens),
	};

	tracing::info!(
		model = %llm.model,
		prompt_tokens,
		completion_tokens,
		cost = usage.cost,
		"Chat call completed."
	);

	Ok(Completion { content, usage })
}

pub fn price(llm: &multiverse_config::LlmProviderConfig, prompt: u64, completion: u64) -> f64 {
	prompt as f64 / 1_000.0 * llm.input_usd_per_1k
		+ completion as f64 / 1_000.0 * llm.output_usd_per_1k
}

/// Keeps whole messages until the character budget is spent. The first message that does
/// not fit is cut on a grapheme boundary, and kept only if more than 100 characters remain.
pub fn truncate(messages: &[Message], max_tokens: usize) -> Vec<Message> {
	let max_chars = max_tokens * CHARS_PER_TOKEN;
	let mut used = 0;
	let mut kept = Vec::with_capacity(messages.len());

	for message in messages {
		let graphemes = message.content.graphemes(true).count();

		if used + graphemes <= max_chars {
			used += graphemes;

			kept.push(message.clone());

			continue;
		}

		let remaining = max_chars - used;

		if remaining > MIN_PARTIAL_CHARS {
			let mut content: String = message.content.graphemes(true).take(remaining).collect();

			content.push_str("...");

			kept.push(Message { role: message.role, content });
		}

		break;
	}

	kept
}

fn is_retryable_status(status: StatusCode) -> bool {
	status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(attempt: u32) -> Duration {
	let exponent = attempt.saturating_sub(1).min(16);
	let ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << exponent).min(BACKOFF_CAP_MS);

	Duration::from_millis(ms)
}

fn parse_chat_response(json: &Value) -> Result<(String, u64, u64)> {
	let content = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Chat response is missing message content.".to_string(),
		})?;
	let usage = json.get("usage");
	let tokens = |key: &str| usage.and_then(|u| u.get(key)).and_then(|v| v.as_u64()).unwrap_or(0);

	Ok((content.trim().to_string(), tokens("prompt_tokens"), tokens("completion_tokens")))
}
