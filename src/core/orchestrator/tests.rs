use super::*;
use crate::core::credentials::CredentialStore;
use crate::core::message::{MessageItem, MessageKind};
use crate::llm::test_support::ScriptedAdapter;
use crate::llm::{ConversationEntry, LlmError, LlmService, ResponseFragment, ToolUse};
use crate::mcp::local::LocalServices;
use crate::mcp::manager::DefaultConnector;
use crate::mcp::permissions::{PermissionGate, CALL_PHONE};
use crate::mcp::LOCAL_CONNECTION_NAME;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Offers one tool that never answers in time.
struct SlowRouter;

#[async_trait]
impl ToolRouter for SlowRouter {
    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new("slow-tool", "Never finishes", json!({}), &[])]
    }

    async fn call_tool(
        &self,
        _name: &str,
        _arguments: Map<String, Value>,
    ) -> Result<ToolCallOutcome, ToolDispatchError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(ToolCallOutcome::success("too late"))
    }
}

struct NoTools;

#[async_trait]
impl ToolRouter for NoTools {
    fn tools(&self) -> Vec<ToolDescriptor> {
        Vec::new()
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: Map<String, Value>,
    ) -> Result<ToolCallOutcome, ToolDispatchError> {
        Err(ToolDispatchError::NotFound(name.to_string()))
    }
}

/// Never answers; counts requests.
#[derive(Default)]
struct StalledAdapter {
    requests: AtomicUsize,
}

#[async_trait]
impl LlmAdapter for StalledAdapter {
    fn service(&self) -> LlmService {
        LlmService::Claude
    }

    fn set_credential(&self, _key: &str) {}

    fn set_model(&self, _model_id: &str) {}

    fn model(&self) -> String {
        "stalled".to_string()
    }

    async fn complete(
        &self,
        _system_prompt: &str,
        _entries: &[ConversationEntry],
        _tools: &[ToolDescriptor],
    ) -> Result<Vec<ResponseFragment>, LlmError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

fn text(value: &str) -> Result<Vec<ResponseFragment>, LlmError> {
    Ok(vec![ResponseFragment::Text(value.to_string())])
}

fn tool_use(name: &str, arguments: Value) -> Result<Vec<ResponseFragment>, LlmError> {
    Ok(vec![ResponseFragment::ToolUse(ToolUse {
        id: format!("{name}-0"),
        name: name.to_string(),
        arguments: arguments.as_object().cloned().unwrap_or_default(),
    })])
}

fn store_in(dir: &TempDir) -> Arc<ConfigStore> {
    Arc::new(ConfigStore::new(dir.path().join("config.toml")))
}

fn registry_with(adapter: Arc<dyn LlmAdapter>) -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::with_factory(
        Arc::new(CredentialStore::new_with_keyring(false)),
        Box::new(move |_: LlmService| adapter.clone()),
    ))
}

fn orchestrator(
    config: Arc<ConfigStore>,
    adapter: Arc<dyn LlmAdapter>,
    tools: Arc<dyn ToolRouter>,
) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(config, registry_with(adapter), tools))
}

async fn wait_idle(orchestrator: &Orchestrator) -> ChatState {
    let mut receiver = orchestrator.subscribe();
    let state = tokio::time::timeout(
        Duration::from_secs(300),
        receiver.wait_for(|state| state.phase == ChatPhase::Idle),
    )
    .await
    .expect("turn should finish")
    .expect("state sender should be alive")
    .clone();
    state
}

fn kinds(state: &ChatState) -> Vec<MessageKind> {
    state.messages.iter().map(Message::kind).collect()
}

#[tokio::test]
async fn second_request_while_running_only_appends_a_system_message() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(vec![text("first answer")]));
    let orchestrator = orchestrator(store_in(&dir), adapter.clone(), Arc::new(NoTools));

    assert!(orchestrator.chat_request("hello"));
    assert!(orchestrator.is_running());
    assert!(!orchestrator.chat_request("hello again"));

    let state = wait_idle(&orchestrator).await;
    assert_eq!(adapter.request_count(), 1);
    assert_eq!(state.turn, 1);
    assert_eq!(state.messages[0].text(), "hello");
    assert_eq!(state.messages[1].kind(), MessageKind::System);
    assert_eq!(state.messages[1].text(), NOT_COMPLETED);
    assert_eq!(state.messages[2].text(), "first answer");
    assert_eq!(state.messages[2].kind(), MessageKind::Agent);
}

#[tokio::test]
async fn phone_call_through_the_local_connection_updates_one_tool_message() {
    let dir = TempDir::new().unwrap();
    let config = store_in(&dir);
    let gate = Arc::new(PermissionGate::new());
    gate.grant(CALL_PHONE);
    let manager = Arc::new(McpConnectionManager::new(
        config.clone(),
        Arc::new(DefaultConnector::new(
            reqwest::Client::new(),
            LocalServices::in_memory(),
            gate,
        )),
    ));
    assert!(manager.connect(LOCAL_CONNECTION_NAME).await);

    let adapter = Arc::new(ScriptedAdapter::new(vec![
        tool_use("phone-call-tool", json!({"number": "123"})),
        text("I called 123 for you."),
    ]));
    let orchestrator = orchestrator(config, adapter.clone(), manager.clone());

    assert!(orchestrator.chat_request("call phone-call-tool with number 123"));
    let state = wait_idle(&orchestrator).await;

    assert_eq!(
        kinds(&state),
        vec![MessageKind::User, MessageKind::Tool, MessageKind::Agent]
    );
    match &state.messages[1] {
        Message::Tool { text, failed, .. } => {
            assert!(text.starts_with("Tool response: phone-call-tool => "));
            assert!(text.contains("\"callResult\":true"));
            assert!(!failed);
        }
        other => panic!("expected tool message, got {other:?}"),
    }

    let requests = adapter.take_requests();
    assert!(requests[0].tool_names.contains(&"phone-call-tool".to_string()));
    assert!(requests[0].tool_names.contains(&"contact-list-info-tool".to_string()));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn tool_timeout_marks_the_call_failed_and_the_turn_still_finishes() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        tool_use("slow-tool", json!({})),
        text("The tool did not respond."),
    ]));
    let orchestrator = orchestrator(store_in(&dir), adapter.clone(), Arc::new(SlowRouter));

    assert!(orchestrator.chat_request("run the slow tool"));
    let state = wait_idle(&orchestrator).await;

    assert_eq!(
        kinds(&state),
        vec![
            MessageKind::User,
            MessageKind::Tool,
            MessageKind::System,
            MessageKind::Agent
        ]
    );
    match &state.messages[1] {
        Message::Tool { text, failed, .. } => {
            assert_eq!(text, "Tool call: slow-tool({})");
            assert!(failed);
        }
        other => panic!("expected tool message, got {other:?}"),
    }
    assert_eq!(state.messages[2].text(), "Tool call slow-tool timed out.");

    let requests = adapter.take_requests();
    match &requests[1].entries[1] {
        ConversationEntry::ToolRound { exchanges, .. } => {
            assert_eq!(exchanges[0].result, crate::llm::TOOL_CALL_FAILED);
        }
        other => panic!("expected tool round, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_tool_is_reported_as_an_error_result() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        tool_use("missing-tool", json!({"x": 1})),
        text("That tool is unavailable."),
    ]));
    let orchestrator = orchestrator(store_in(&dir), adapter.clone(), Arc::new(NoTools));

    orchestrator.chat_request("use missing-tool");
    let state = wait_idle(&orchestrator).await;

    match &state.messages[1] {
        Message::Tool { text, failed, .. } => {
            assert_eq!(text, "Tool response: missing-tool => Tool missing-tool not found.");
            assert!(failed);
        }
        other => panic!("expected tool message, got {other:?}"),
    }
    match &adapter.take_requests()[1].entries[1] {
        ConversationEntry::ToolRound { exchanges, .. } => {
            assert_eq!(exchanges[0].result, "Tool missing-tool not found.");
        }
        other => panic!("expected tool round, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_returns_to_idle_immediately() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(StalledAdapter::default());
    let orchestrator = orchestrator(store_in(&dir), adapter.clone(), Arc::new(NoTools));

    assert!(!orchestrator.cancel_chat_request());
    assert!(orchestrator.chat_request("hello"));
    tokio::time::timeout(Duration::from_secs(5), async {
        while adapter.requests.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("provider should be called");

    assert!(orchestrator.cancel_chat_request());
    let state = orchestrator.state();
    assert_eq!(state.phase, ChatPhase::Idle);
    assert_eq!(kinds(&state), vec![MessageKind::User]);

    assert!(orchestrator.chat_request("again"));
    assert_eq!(orchestrator.state().turn, 2);
    orchestrator.cancel_chat_request();
}

#[tokio::test]
async fn provider_failure_ends_the_turn_with_a_system_message() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(vec![Err(LlmError::MissingCredential(
        LlmService::Claude,
    ))]));
    let orchestrator = orchestrator(store_in(&dir), adapter, Arc::new(NoTools));

    orchestrator.chat_request("hello");
    let state = wait_idle(&orchestrator).await;

    assert_eq!(kinds(&state), vec![MessageKind::User, MessageKind::System]);
    assert_eq!(
        state.messages[1].text(),
        "Error: No API key configured for Claude."
    );
}

#[tokio::test]
async fn memory_is_updated_and_related_fragments_reach_the_system_prompt() {
    let dir = TempDir::new().unwrap();
    let config = store_in(&dir);
    config
        .mutate(|config| {
            config.system_prompt = Some("You are a helpful assistant.".to_string());
            config.memory.enabled = true;
            config.memory.content = "Likes tea.".to_string();
        })
        .unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        text("Likes tea.\nSister is Mina."),
        text("Sister is Mina."),
        text("Calling Mina now."),
    ]));
    let orchestrator = orchestrator(config.clone(), adapter.clone(), Arc::new(NoTools));

    orchestrator.chat_request("my sister Mina wants a call");
    wait_idle(&orchestrator).await;

    assert_eq!(
        config.load().unwrap().memory.content,
        "Likes tea.\nSister is Mina."
    );
    let requests = adapter.take_requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].system_prompt, memory::UPDATE_INSTRUCTION);
    assert_eq!(requests[1].system_prompt, memory::RETRIEVAL_INSTRUCTION);
    assert_eq!(
        requests[2].system_prompt,
        "You are a helpful assistant.\n\nThings you remember about the user:\nSister is Mina."
    );
    assert_eq!(
        requests[2].entries,
        vec![ConversationEntry::Message(MessageItem::user(
            "my sister Mina wants a call"
        ))]
    );
}

#[tokio::test]
async fn history_window_includes_previous_turns() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(vec![text("Hi!")]));
    let orchestrator = orchestrator(store_in(&dir), adapter.clone(), Arc::new(NoTools));

    orchestrator.chat_request("hello");
    wait_idle(&orchestrator).await;
    adapter.push(text("Still here."));
    orchestrator.chat_request("are you there?");
    wait_idle(&orchestrator).await;

    let requests = adapter.take_requests();
    assert_eq!(
        requests[1].entries,
        vec![
            ConversationEntry::Message(MessageItem::user("hello")),
            ConversationEntry::Message(MessageItem::assistant("Hi!")),
            ConversationEntry::Message(MessageItem::user("are you there?")),
        ]
    );
}
