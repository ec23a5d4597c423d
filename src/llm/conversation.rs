//! The tool-calling loop shared by every provider.

use super::{
    ConversationEntry, LlmAdapter, LlmError, ResponseFragment, ToolExchange, TOOL_CALL_FAILED,
};
use crate::core::message::MessageItem;
use crate::core::runtime::{checkpoint, run_cancellable};
use crate::mcp::tool::{ToolCallOutcome, ToolDescriptor};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
const ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Text,
    Thinking,
    System,
}

/// Receives the events of one conversation.
#[async_trait]
pub trait ConversationHandler: Send + Sync {
    fn on_event(&self, kind: ResponseKind, text: &str);

    /// Runs a requested tool. `None` means the call produced no result.
    async fn on_tool_call(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Option<ToolCallOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationEnd {
    /// The provider answered without requesting tools.
    Completed,
    Cancelled,
    /// The provider call failed after retries; reported as a system event.
    Failed,
    /// The provider kept requesting tools past the round limit.
    RoundLimit,
}

/// Drives `adapter` until it answers without tool calls.
///
/// Each response is walked in provider order: text and thinking parts are
/// forwarded and each tool-use part is executed through the handler as it is
/// reached, so later text never overtakes an earlier tool call. The results
/// are fed back as one tool round and the provider is asked again, for at
/// most `max_tool_rounds` rounds.
pub async fn send_conversation(
    adapter: &dyn LlmAdapter,
    system_prompt: &str,
    messages: &[MessageItem],
    tools: &[ToolDescriptor],
    handler: &dyn ConversationHandler,
    cancel_token: &CancellationToken,
    max_tool_rounds: usize,
) -> ConversationEnd {
    let mut entries: Vec<ConversationEntry> = messages
        .iter()
        .cloned()
        .map(ConversationEntry::Message)
        .collect();
    let mut rounds = 0;

    loop {
        let fragments =
            match request_with_retry(adapter, system_prompt, &entries, tools, cancel_token).await {
                Some(Ok(fragments)) => fragments,
                Some(Err(err)) => {
                    handler.on_event(ResponseKind::System, &format!("Error: {err}"));
                    return ConversationEnd::Failed;
                }
                None => return ConversationEnd::Cancelled,
            };

        let mut text: Option<String> = None;
        let mut exchanges = Vec::new();
        for fragment in fragments {
            match fragment {
                ResponseFragment::Text(part) => {
                    handler.on_event(ResponseKind::Text, &part);
                    match text.as_mut() {
                        Some(existing) => {
                            existing.push('\n');
                            existing.push_str(&part);
                        }
                        None => text = Some(part),
                    }
                }
                ResponseFragment::Thinking(part) => {
                    handler.on_event(ResponseKind::Thinking, &part);
                }
                ResponseFragment::ToolUse(call) => {
                    if exchanges.is_empty() {
                        if rounds >= max_tool_rounds {
                            warn!(rounds, "Provider exceeded the tool round limit");
                            handler.on_event(
                                ResponseKind::System,
                                &format!(
                                    "Too many tool calls: stopped after {max_tool_rounds} rounds."
                                ),
                            );
                            return ConversationEnd::RoundLimit;
                        }
                        rounds += 1;
                    }
                    debug!(tool = %call.name, round = rounds, "Provider requested tool");
                    let pending = handler.on_tool_call(&call.name, &call.arguments);
                    let Some(outcome) = run_cancellable(cancel_token, pending).await else {
                        return ConversationEnd::Cancelled;
                    };
                    let result = outcome
                        .map(|outcome| outcome.text)
                        .unwrap_or_else(|| TOOL_CALL_FAILED.to_string());
                    exchanges.push(ToolExchange { call, result });
                    if !checkpoint(cancel_token).await {
                        return ConversationEnd::Cancelled;
                    }
                }
            }
        }

        if exchanges.is_empty() {
            return ConversationEnd::Completed;
        }
        entries.push(ConversationEntry::ToolRound { text, exchanges });
    }
}

/// `None` when cancelled before or during an attempt.
async fn request_with_retry(
    adapter: &dyn LlmAdapter,
    system_prompt: &str,
    entries: &[ConversationEntry],
    tools: &[ToolDescriptor],
    cancel_token: &CancellationToken,
) -> Option<Result<Vec<ResponseFragment>, LlmError>> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        if !checkpoint(cancel_token).await {
            return None;
        }
        let pending = adapter.complete(system_prompt, entries, tools);
        match run_cancellable(cancel_token, pending).await? {
            Ok(fragments) => return Some(Ok(fragments)),
            Err(err) if attempt < ATTEMPTS && err.is_transient() => {
                warn!(
                    service = %adapter.service(),
                    attempt,
                    error = %err,
                    "Provider call failed, retrying"
                );
            }
            Err(err) => {
                warn!(service = %adapter.service(), attempt, error = %err, "Provider call failed");
                return Some(Err(err));
            }
        }
    }
}

#[cfg(test)]
mod tests;
