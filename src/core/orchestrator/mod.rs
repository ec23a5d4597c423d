//! Drives chat turns: memory, provider conversation and tool dispatch.
//!
//! Only one turn runs at a time. The chat state is a single value published
//! through a watch channel and replaced whole on every change; nothing but
//! the orchestrator writes it.

pub mod memory;

#[cfg(test)]
mod tests;

use crate::core::config::{Config, ConfigStore};
use crate::core::message::{history_window, Message};
use crate::llm::conversation::DEFAULT_MAX_TOOL_ROUNDS;
use crate::llm::{
    resolve_model, send_conversation, ConversationHandler, LlmAdapter, ProviderRegistry,
    ResponseKind,
};
use crate::mcp::manager::ToolDispatchError;
use crate::mcp::tool::{ToolCallOutcome, ToolDescriptor};
use crate::mcp::McpConnectionManager;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const HISTORY_LIMIT: usize = 100;
pub const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(20);
pub const NOT_COMPLETED: &str = "The previous request is not completed yet.";

const SUMMARY_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatPhase {
    #[default]
    Idle,
    Running,
}

#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub phase: ChatPhase,
    /// Incremented each time a turn starts.
    pub turn: u64,
    pub messages: Vec<Message>,
}

/// Where the orchestrator finds and runs tools.
#[async_trait]
pub trait ToolRouter: Send + Sync {
    fn tools(&self) -> Vec<ToolDescriptor>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallOutcome, ToolDispatchError>;
}

#[async_trait]
impl ToolRouter for McpConnectionManager {
    fn tools(&self) -> Vec<ToolDescriptor> {
        self.connected_tools()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallOutcome, ToolDispatchError> {
        McpConnectionManager::call_tool(self, name, arguments).await
    }
}

struct ActiveTurn {
    turn: u64,
    cancel_token: CancellationToken,
}

pub struct Orchestrator {
    state: watch::Sender<ChatState>,
    active: Mutex<Option<ActiveTurn>>,
    providers: Arc<ProviderRegistry>,
    tools: Arc<dyn ToolRouter>,
    config: Arc<ConfigStore>,
    tool_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        config: Arc<ConfigStore>,
        providers: Arc<ProviderRegistry>,
        tools: Arc<dyn ToolRouter>,
    ) -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self {
            state,
            active: Mutex::new(None),
            providers,
            tools,
            config,
            tool_timeout: TOOL_CALL_TIMEOUT,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().phase == ChatPhase::Running
    }

    fn replace<F>(&self, mutator: F)
    where
        F: FnOnce(&mut ChatState),
    {
        self.state.send_modify(|current| {
            let mut next = current.clone();
            mutator(&mut next);
            *current = next;
        });
    }

    fn push(&self, message: Message) -> String {
        let id = message.id().to_string();
        self.replace(|state| state.messages.push(message));
        id
    }

    fn update_tool_message(&self, id: &str, value: String, is_error: bool) {
        self.replace(|state| {
            if let Some(Message::Tool { text, failed, .. }) =
                state.messages.iter_mut().find(|message| message.id() == id)
            {
                *text = value;
                *failed = is_error;
            }
        });
    }

    /// Starts a turn for `text`. While a turn is running the request is
    /// refused with a system message instead. Returns whether a turn started.
    pub fn chat_request(self: &Arc<Self>, text: &str) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let mut started = None;
        self.replace(|state| {
            if state.phase == ChatPhase::Running {
                state.messages.push(Message::system(NOT_COMPLETED));
            } else {
                state.messages.push(Message::user(text));
                state.phase = ChatPhase::Running;
                state.turn += 1;
                started = Some(state.turn);
            }
        });
        let Some(turn) = started else {
            debug!("Chat request refused while a turn is running");
            return false;
        };

        let cancel_token = CancellationToken::new();
        *active = Some(ActiveTurn {
            turn,
            cancel_token: cancel_token.clone(),
        });
        drop(active);

        let orchestrator = Arc::clone(self);
        let prompt = text.to_string();
        tokio::spawn(async move {
            orchestrator.run_turn(&prompt, &cancel_token).await;
            orchestrator.finish(turn);
        });
        true
    }

    /// Cancels the running turn and returns to idle without waiting for it
    /// to unwind.
    pub fn cancel_chat_request(&self) -> bool {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(ActiveTurn { turn, cancel_token }) = active else {
            return false;
        };
        cancel_token.cancel();
        self.replace(|state| {
            if state.turn == turn {
                state.phase = ChatPhase::Idle;
            }
        });
        info!(turn, "Chat request cancelled");
        true
    }

    fn finish(&self, turn: u64) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|current| current.turn == turn) {
            *active = None;
        }
        self.replace(|state| {
            if state.turn == turn {
                state.phase = ChatPhase::Idle;
            }
        });
    }

    async fn run_turn(&self, prompt: &str, cancel_token: &CancellationToken) {
        let config = self.config.load().unwrap_or_else(|err| {
            warn!(error = %err, "Failed to load config; using defaults");
            Config::default()
        });
        let model = resolve_model(config.selected_model.as_deref());
        let adapter = self.providers.select(&model);
        debug!(model = %model.id, "Starting chat turn");

        let base_prompt = config.system_prompt.clone().unwrap_or_default();
        let system_prompt = if config.memory.enabled && !prompt.trim().is_empty() {
            let stored = self.refresh_memory(adapter.as_ref(), &config, prompt, cancel_token).await;
            let related =
                memory::related_memory(adapter.as_ref(), &stored, prompt, cancel_token).await;
            memory::system_prompt_with_memory(&base_prompt, related.as_deref())
        } else {
            base_prompt
        };
        if cancel_token.is_cancelled() {
            return;
        }

        let messages = history_window(&self.state.borrow().messages, HISTORY_LIMIT);
        let tools = self.tools.tools();
        let handler = TurnHandler {
            orchestrator: self,
            cancel_token,
        };
        let end = send_conversation(
            adapter.as_ref(),
            &system_prompt,
            &messages,
            &tools,
            &handler,
            cancel_token,
            config.max_tool_rounds.unwrap_or(DEFAULT_MAX_TOOL_ROUNDS),
        )
        .await;
        debug!(?end, "Chat turn finished");
    }

    /// Runs the memory update step and returns the memory to consult.
    async fn refresh_memory(
        &self,
        adapter: &dyn LlmAdapter,
        config: &Config,
        prompt: &str,
        cancel_token: &CancellationToken,
    ) -> String {
        let current = config.memory.content.clone();
        let Some(updated) = memory::updated_memory(adapter, &current, prompt, cancel_token).await
        else {
            return current;
        };
        let stored = updated.clone();
        if let Err(err) = self.config.mutate(move |config| {
            config.memory.content = stored;
        }) {
            warn!(error = %err, "Failed to save long-term memory");
        }
        updated
    }
}

/// Bridges one turn's conversation events into the chat state.
struct TurnHandler<'a> {
    orchestrator: &'a Orchestrator,
    cancel_token: &'a CancellationToken,
}

#[async_trait]
impl ConversationHandler for TurnHandler<'_> {
    fn on_event(&self, kind: ResponseKind, text: &str) {
        if self.cancel_token.is_cancelled() {
            return;
        }
        let message = match kind {
            ResponseKind::Text => Message::agent(text),
            ResponseKind::Thinking => Message::thinking(text),
            ResponseKind::System => Message::system(text),
        };
        self.orchestrator.push(message);
    }

    async fn on_tool_call(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Option<ToolCallOutcome> {
        let rendered = Value::Object(arguments.clone()).to_string();
        let id = self
            .orchestrator
            .push(Message::tool(format!("Tool call: {name}({rendered})")));

        let call = self.orchestrator.tools.call_tool(name, arguments.clone());
        let outcome = match tokio::time::timeout(self.orchestrator.tool_timeout, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(ToolDispatchError::NotFound(_))) => {
                ToolCallOutcome::failure(format!("Tool {name} not found."))
            }
            Ok(Err(ToolDispatchError::Failed(message))) => ToolCallOutcome::failure(message),
            Err(_) => {
                warn!(tool = %name, "Tool call timed out");
                self.orchestrator
                    .update_tool_message(&id, format!("Tool call: {name}({rendered})"), true);
                self.orchestrator
                    .push(Message::system(format!("Tool call {name} timed out.")));
                return None;
            }
        };

        self.orchestrator.update_tool_message(
            &id,
            format!("Tool response: {name} => {}", summarize(&outcome.text)),
            outcome.is_error,
        );
        Some(outcome)
    }
}

fn summarize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SUMMARY_LIMIT {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(SUMMARY_LIMIT).collect();
    truncated.push_str("...");
    truncated
}
