use crate::{
	Result,
	chat::{self, Completion, Message},
};
use multiverse_domain::Turn;

/// Replies to the last stimulus of `dialogue`, which is replayed as chat history.
pub async fn respond(
	llm: &multiverse_config::LlmProviderConfig,
	moderation: &multiverse_config::ModerationConfig,
	dialogue: &[Turn],
) -> Result<Completion> {
	let messages = std::iter::once(Message::system(llm.system_prompt.clone()))
		.chain(dialogue.iter().map(Message::from_turn))
		.collect::<Vec<_>>();

	chat::chat(llm, moderation, &messages, None).await
}
