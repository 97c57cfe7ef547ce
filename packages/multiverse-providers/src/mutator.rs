use futures::future;

use crate::{
	Result,
	chat::{self, Message},
};
use multiverse_domain::{Turn, Usage};

const OPENING_REQUEST: &str = "Write the opening message of the conversation.";

/// Up to `k` independent stimulus variants for the dialogue so far, with the combined usage
/// of the calls that succeeded.
///
/// A failed call only drops its own variant. The first error is returned when every call
/// failed. An empty dialogue asks for opening messages.
pub async fn variants(
	llm: &multiverse_config::LlmProviderConfig,
	moderation: &multiverse_config::ModerationConfig,
	dialogue: &[Turn],
	k: usize,
) -> Result<(Vec<String>, Usage)> {
	let messages = variant_messages(&llm.system_prompt, dialogue);
	let calls = (0..k).map(|_| chat::chat(llm, moderation, &messages, None));
	let mut texts = Vec::with_capacity(k);
	let mut usage = Usage::default();
	let mut first_err = None;

	for outcome in future::join_all(calls).await {
		match outcome {
			Ok(completion) => {
				usage = usage.add(completion.usage);

				texts.push(completion.content);
			},
			Err(err) => {
				tracing::warn!(model = %llm.model, error = %err, "Mutator call failed.");

				first_err.get_or_insert(err);
			},
		}
	}

	match first_err {
		Some(err) if texts.is_empty() => Err(err),
		_ => Ok((texts, usage)),
	}
}

fn variant_messages(system_prompt: &str, dialogue: &[Turn]) -> Vec<Message> {
	let request = if dialogue.is_empty() {
		OPENING_REQUEST.to_string()
	} else {
		format!(
			"Conversation so far:\n\n{}\n\nWrite the next user message. Output only the message text.",
			crate::transcript(dialogue)
		)
	};

	vec![Message::system(system_prompt), Message::user(request)]
}
