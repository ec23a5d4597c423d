//! Long-term memory micro-tasks run before each chat turn.

use crate::core::message::MessageItem;
use crate::core::runtime::run_cancellable;
use crate::llm::{ConversationEntry, LlmAdapter, ResponseFragment};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const NO_CHANGE: &str = "NO_CHANGE";
pub const NONE: &str = "NONE";

pub const UPDATE_INSTRUCTION: &str = "You maintain a short memory of durable personal facts about the user \
(names, relationships, preferences, recurring plans). You are given the current memory and a new message \
from the user. If the message adds or corrects durable facts, reply with the complete rewritten memory as \
plain text and nothing else. Otherwise reply with exactly NO_CHANGE.";

pub const RETRIEVAL_INSTRUCTION: &str = "You are given the user's stored memory and a new message from the \
user. Reply with only the parts of the memory that are relevant to answering the message, copied as plain \
text. If nothing is relevant, reply with exactly NONE.";

/// Asks the provider whether `prompt` changes the stored memory. Returns the
/// rewritten memory, or `None` when it stays as is.
pub async fn updated_memory(
    adapter: &dyn LlmAdapter,
    memory: &str,
    prompt: &str,
    cancel_token: &CancellationToken,
) -> Option<String> {
    let request = format!("Current memory:\n{}\n\nNew message:\n{prompt}", memory.trim());
    let reply = ask(adapter, UPDATE_INSTRUCTION, request, cancel_token).await?;
    if reply == NO_CHANGE || reply == memory.trim() {
        return None;
    }
    debug!(length = reply.len(), "Long-term memory rewritten");
    Some(reply)
}

/// Extracts the fragments of `memory` relevant to `prompt`.
pub async fn related_memory(
    adapter: &dyn LlmAdapter,
    memory: &str,
    prompt: &str,
    cancel_token: &CancellationToken,
) -> Option<String> {
    if memory.trim().is_empty() {
        return None;
    }
    let request = format!("Memory:\n{}\n\nMessage:\n{prompt}", memory.trim());
    ask(adapter, RETRIEVAL_INSTRUCTION, request, cancel_token)
        .await
        .filter(|reply| reply != NONE)
}

pub fn system_prompt_with_memory(base: &str, related: Option<&str>) -> String {
    match related {
        Some(related) if base.trim().is_empty() => {
            format!("Things you remember about the user:\n{related}")
        }
        Some(related) => format!("{base}\n\nThings you remember about the user:\n{related}"),
        None => base.to_string(),
    }
}

/// One tool-less request; the joined text parts of the reply, trimmed.
async fn ask(
    adapter: &dyn LlmAdapter,
    instruction: &str,
    request: String,
    cancel_token: &CancellationToken,
) -> Option<String> {
    let entries = [ConversationEntry::Message(MessageItem::user(request))];
    let reply = run_cancellable(cancel_token, adapter.complete(instruction, &entries, &[])).await?;
    match reply {
        Ok(fragments) => {
            let text = fragments
                .into_iter()
                .filter_map(|fragment| match fragment {
                    ResponseFragment::Text(text) => Some(text),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Err(err) => {
            warn!(error = %err, "Memory request failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_support::ScriptedAdapter;
    use crate::llm::LlmError;

    fn reply(text: &str) -> Result<Vec<ResponseFragment>, LlmError> {
        Ok(vec![ResponseFragment::Text(text.to_string())])
    }

    #[tokio::test]
    async fn no_change_sentinel_keeps_memory() {
        let adapter = ScriptedAdapter::new(vec![reply(" NO_CHANGE \n")]);
        let token = CancellationToken::new();

        assert_eq!(updated_memory(&adapter, "Likes tea.", "hello", &token).await, None);

        let request = &adapter.take_requests()[0];
        assert_eq!(request.system_prompt, UPDATE_INSTRUCTION);
        assert!(request.tool_names.is_empty());
    }

    #[tokio::test]
    async fn rewritten_memory_is_returned() {
        let adapter = ScriptedAdapter::new(vec![reply("Likes tea.\nSister is Mina.")]);
        let updated = updated_memory(
            &adapter,
            "Likes tea.",
            "my sister Mina visits friday",
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(updated.as_deref(), Some("Likes tea.\nSister is Mina."));
    }

    #[tokio::test]
    async fn retrieval_skips_empty_memory_and_none_replies() {
        let adapter = ScriptedAdapter::new(vec![reply("NONE"), reply("Sister is Mina.")]);
        let token = CancellationToken::new();

        assert_eq!(related_memory(&adapter, "   ", "hi", &token).await, None);
        assert_eq!(adapter.request_count(), 0);
        assert_eq!(related_memory(&adapter, "Likes tea.", "weather?", &token).await, None);
        assert_eq!(
            related_memory(&adapter, "Sister is Mina.", "call my sister", &token)
                .await
                .as_deref(),
            Some("Sister is Mina.")
        );
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let adapter = ScriptedAdapter::new(vec![Err(LlmError::Decode("bad".to_string()))]);
        assert_eq!(
            updated_memory(&adapter, "", "hi", &CancellationToken::new()).await,
            None
        );
    }

    #[test]
    fn related_memory_is_appended_to_the_system_prompt() {
        assert_eq!(system_prompt_with_memory("Be brief.", None), "Be brief.");
        assert_eq!(
            system_prompt_with_memory("Be brief.", Some("Sister is Mina.")),
            "Be brief.\n\nThings you remember about the user:\nSister is Mina."
        );
        assert_eq!(
            system_prompt_with_memory("", Some("Sister is Mina.")),
            "Things you remember about the user:\nSister is Mina."
        );
    }
}
