use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::{
	Result,
	chat::{self, Message},
};
use multiverse_domain::{Turn, Usage};

const NEUTRAL_SCORE: f64 = 0.5;
const PARSE_FAILURE: &str = "Failed to parse critic response";

static OUT_OF_TEN: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(-?\d+(?:\.\d+)?)\s*/\s*10\b").expect("Valid regex."));
static FIRST_NUMBER: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("Valid regex."));

#[derive(Debug, Clone, PartialEq)]
pub struct Critique {
	pub score: f64,
	pub reasoning: String,
}

/// Scores the whole trajectory, not the last turn alone.
pub async fn score(
	llm: &multiverse_config::LlmProviderConfig,
	moderation: &multiverse_config::ModerationConfig,
	dialogue: &[Turn],
) -> Result<(Critique, Usage)> {
	let messages = vec![
		Message::system(llm.system_prompt.clone()),
		Message::user(format!(
			"Conversation:\n\n{}\n\nAnalyze the trajectory and score it.",
			crate::transcript(dialogue)
		)),
	];
	let completion = chat::chat(llm, moderation, &messages, Some(&response_schema())).await?;
	let critique = parse_critique(&completion.content);

	tracing::debug!(score = critique.score, "Critic scored trajectory.");

	Ok((critique, completion.usage))
}

fn response_schema() -> Value {
	serde_json::json!({
		"type": "json_schema",
		"json_schema": {
			"name": "trajectory_analysis",
			"strict": true,
			"schema": {
				"type": "object",
				"properties": {
					"analysis": { "type": "string" },
					"score": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
				},
				"required": ["analysis", "score"],
				"additionalProperties": false
			}
		}
	})
}

/// Structured JSON first, then an `n/10` rating, then the first number in the text, then a
/// neutral score.
pub fn parse_critique(content: &str) -> Critique {
	if let Ok(json) = serde_json::from_str::<Value>(content)
		&& let Some(score) = json.get("score").and_then(|v| v.as_f64())
	{
		let reasoning = json
			.get("analysis")
			.and_then(|v| v.as_str())
			.unwrap_or("No reasoning provided")
			.to_string();

		return Critique { score: clamp(score), reasoning };
	}

	let out_of_ten = OUT_OF_TEN
		.captures(content)
		.and_then(|caps| caps[1].parse::<f64>().ok())
		.map(|rating| rating / 10.0);
	let first_number =
		|| FIRST_NUMBER.find(content).and_then(|m| m.as_str().parse::<f64>().ok());

	match out_of_ten.or_else(first_number) {
		Some(score) => Critique { score: clamp(score), reasoning: content.trim().to_string() },
		None => {
			tracing::warn!("Critic response had no score.");

			Critique { score: NEUTRAL_SCORE, reasoning: PARSE_FAILURE.to_string() }
		},
	}
}

fn clamp(score: f64) -> f64 {
	if score.is_finite() { score.clamp(0.0, 1.0) } else { NEUTRAL_SCORE }
}
