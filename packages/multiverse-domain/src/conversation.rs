use serde::{Deserialize, Serialize};

use crate::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	/// The stimulus side of the dialogue.
	User,
	/// The reply side of the dialogue.
	Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
	pub role: Role,
	pub content: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub score: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reasoning: Option<String>,
}
impl Turn {
	pub fn user(content: impl Into<String>) -> Self {
		Self { role: Role::User, content: content.into(), score: None, reasoning: None }
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Self { role: Role::Assistant, content: content.into(), score: None, reasoning: None }
	}
}

/// What the expansion of a node produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
	/// The dialogue is empty or ends with a stimulus: children carry replies to it.
	NeedsResponse,
	/// The dialogue ends with a reply: children carry new stimuli and replies to them.
	NeedsStimulus,
}
impl NextStep {
	pub fn of(dialogue: &[Turn]) -> Self {
		match dialogue.last() {
			None => Self::NeedsResponse,
			Some(turn) if turn.role == Role::User => Self::NeedsResponse,
			Some(_) => Self::NeedsStimulus,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::NeedsResponse => "needs_response",
			Self::NeedsStimulus => "needs_stimulus",
		}
	}
}

/// Flattens a root-to-node path into alternating turns.
///
/// A prompt repeated by a response child is emitted once. Scored replies carry the
/// node's score and reasoning.
pub fn dialogue<'a, I>(path: I) -> Vec<Turn>
where
	I: IntoIterator<Item = &'a Node>,
{
	let mut turns = Vec::new();
	let mut previous_prompt: Option<&str> = None;

	for node in path {
		if previous_prompt != Some(node.prompt.as_str()) {
			turns.push(Turn::user(node.prompt.clone()));
		}
		if let Some(reply) = node.reply.as_ref() {
			let mut turn = Turn::assistant(reply.clone());

			turn.score = node.score;
			turn.reasoning = node.score_reasoning.clone();

			turns.push(turn);
		}

		previous_prompt = Some(node.prompt.as_str());
	}

	turns
}

/// Turns without score annotations, as handed to collaborators.
pub fn plain(turns: &[Turn]) -> Vec<Turn> {
	turns.iter().map(|turn| Turn { score: None, reasoning: None, ..turn.clone() }).collect()
}
