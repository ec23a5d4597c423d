use super::*;
use crate::llm::test_support::ScriptedAdapter;
use crate::llm::ToolUse;
use reqwest::StatusCode;
use serde_json::json;
use std::sync::Mutex;

#[derive(Default)]
struct RecordingHandler {
    events: Mutex<Vec<(ResponseKind, String)>>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    order: Mutex<Vec<String>>,
    result: Option<ToolCallOutcome>,
    cancel_on_call: Option<CancellationToken>,
}

impl RecordingHandler {
    fn answering(result: Option<ToolCallOutcome>) -> Self {
        Self {
            result,
            ..Self::default()
        }
    }

    fn events(&self) -> Vec<(ResponseKind, String)> {
        self.events.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ConversationHandler for RecordingHandler {
    fn on_event(&self, kind: ResponseKind, text: &str) {
        self.order.lock().unwrap().push(format!("event:{text}"));
        self.events.lock().unwrap().push((kind, text.to_string()));
    }

    async fn on_tool_call(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Option<ToolCallOutcome> {
        self.order.lock().unwrap().push(format!("tool:{name}"));
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        self.result.clone()
    }
}

fn text(value: &str) -> ResponseFragment {
    ResponseFragment::Text(value.to_string())
}

fn tool_use(name: &str, arguments: Value) -> ResponseFragment {
    ResponseFragment::ToolUse(ToolUse {
        id: format!("{name}-id"),
        name: name.to_string(),
        arguments: arguments.as_object().cloned().unwrap_or_default(),
    })
}

fn api_error(status: StatusCode, message: &str) -> LlmError {
    LlmError::Api {
        status,
        body: json!({"error": {"message": message}}).to_string(),
    }
}

async fn run(
    adapter: &ScriptedAdapter,
    handler: &RecordingHandler,
    cancel_token: &CancellationToken,
    max_tool_rounds: usize,
) -> ConversationEnd {
    send_conversation(
        adapter,
        "system",
        &[MessageItem::user("call 123")],
        &[],
        handler,
        cancel_token,
        max_tool_rounds,
    )
    .await
}

#[tokio::test]
async fn plain_answer_completes_in_one_request() {
    let adapter = ScriptedAdapter::new(vec![Ok(vec![text("Hello!")])]);
    let handler = RecordingHandler::default();

    let end = run(&adapter, &handler, &CancellationToken::new(), DEFAULT_MAX_TOOL_ROUNDS).await;

    assert_eq!(end, ConversationEnd::Completed);
    assert_eq!(handler.events(), vec![(ResponseKind::Text, "Hello!".to_string())]);
    assert_eq!(adapter.request_count(), 1);
}

#[tokio::test]
async fn tool_results_are_fed_back_and_the_conversation_continues() {
    let adapter = ScriptedAdapter::new(vec![
        Ok(vec![
            ResponseFragment::Thinking("need to call".to_string()),
            text("Calling."),
            tool_use("phone-call-tool", json!({"number": "123"})),
        ]),
        Ok(vec![text("Done, the call was placed.")]),
    ]);
    let handler = RecordingHandler::answering(Some(ToolCallOutcome::success(
        r#"{"phoneNumber":"123","callResult":true}"#,
    )));

    let end = run(&adapter, &handler, &CancellationToken::new(), DEFAULT_MAX_TOOL_ROUNDS).await;

    assert_eq!(end, ConversationEnd::Completed);
    assert_eq!(
        handler.events(),
        vec![
            (ResponseKind::Thinking, "need to call".to_string()),
            (ResponseKind::Text, "Calling.".to_string()),
            (ResponseKind::Text, "Done, the call was placed.".to_string()),
        ]
    );
    let calls = handler.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "phone-call-tool");
    assert_eq!(calls[0].1["number"], "123");

    let requests = adapter.take_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].system_prompt, "system");
    match &requests[1].entries[1] {
        ConversationEntry::ToolRound { text, exchanges } => {
            assert_eq!(text.as_deref(), Some("Calling."));
            assert_eq!(exchanges[0].call.id, "phone-call-tool-id");
            assert!(exchanges[0].result.contains("\"callResult\":true"));
        }
        other => panic!("expected a tool round, got {other:?}"),
    }
}

#[tokio::test]
async fn tool_calls_run_where_they_appear_in_the_response() {
    let adapter = ScriptedAdapter::new(vec![
        Ok(vec![text("before"), tool_use("a", json!({})), text("after")]),
        Ok(vec![text("done")]),
    ]);
    let handler = RecordingHandler::answering(Some(ToolCallOutcome::success("ok")));

    let end = run(&adapter, &handler, &CancellationToken::new(), DEFAULT_MAX_TOOL_ROUNDS).await;

    assert_eq!(end, ConversationEnd::Completed);
    assert_eq!(
        handler.order.lock().unwrap().clone(),
        vec!["event:before", "tool:a", "event:after", "event:done"]
    );
    let requests = adapter.take_requests();
    let Some(ConversationEntry::ToolRound { text, exchanges }) = requests[1].entries.last() else {
        panic!("second request should end with the tool round");
    };
    assert_eq!(text.as_deref(), Some("before\nafter"));
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].result, "ok");
}

#[tokio::test]
async fn missing_tool_result_is_reported_to_the_provider() {
    let adapter = ScriptedAdapter::new(vec![
        Ok(vec![tool_use("slow-tool", json!({}))]),
        Ok(vec![text("The tool did not answer.")]),
    ]);
    let handler = RecordingHandler::answering(None);

    let end = run(&adapter, &handler, &CancellationToken::new(), DEFAULT_MAX_TOOL_ROUNDS).await;

    assert_eq!(end, ConversationEnd::Completed);
    let requests = adapter.take_requests();
    match &requests[1].entries[1] {
        ConversationEntry::ToolRound { text, exchanges } => {
            assert_eq!(*text, None);
            assert_eq!(exchanges[0].result, TOOL_CALL_FAILED);
        }
        other => panic!("expected a tool round, got {other:?}"),
    }
}

#[tokio::test]
async fn transient_failure_is_retried_once() {
    let adapter = ScriptedAdapter::new(vec![
        Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "overloaded")),
        Ok(vec![text("Recovered.")]),
    ]);
    let handler = RecordingHandler::default();

    let end = run(&adapter, &handler, &CancellationToken::new(), DEFAULT_MAX_TOOL_ROUNDS).await;

    assert_eq!(end, ConversationEnd::Completed);
    assert_eq!(adapter.request_count(), 2);
    assert_eq!(handler.events(), vec![(ResponseKind::Text, "Recovered.".to_string())]);
}

#[tokio::test]
async fn exhausted_retries_surface_a_system_error() {
    let adapter = ScriptedAdapter::new(vec![
        Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "overloaded")),
        Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "still overloaded")),
        Ok(vec![text("never reached")]),
    ]);
    let handler = RecordingHandler::default();

    let end = run(&adapter, &handler, &CancellationToken::new(), DEFAULT_MAX_TOOL_ROUNDS).await;

    assert_eq!(end, ConversationEnd::Failed);
    assert_eq!(adapter.request_count(), 2);
    assert_eq!(
        handler.events(),
        vec![(
            ResponseKind::System,
            "Error: API Error (503 Service Unavailable): still overloaded".to_string()
        )]
    );
}

#[tokio::test]
async fn authentication_failures_are_not_retried() {
    let adapter = ScriptedAdapter::new(vec![Err(api_error(StatusCode::UNAUTHORIZED, "bad key"))]);
    let handler = RecordingHandler::default();

    let end = run(&adapter, &handler, &CancellationToken::new(), DEFAULT_MAX_TOOL_ROUNDS).await;

    assert_eq!(end, ConversationEnd::Failed);
    assert_eq!(adapter.request_count(), 1);
}

#[tokio::test]
async fn round_limit_stops_a_provider_that_keeps_calling_tools() {
    let adapter = ScriptedAdapter::new(
        (0..5)
            .map(|_| Ok(vec![tool_use("get-all-memory", json!({}))]))
            .collect(),
    );
    let handler = RecordingHandler::answering(Some(ToolCallOutcome::success("[]")));

    let end = run(&adapter, &handler, &CancellationToken::new(), 2).await;

    assert_eq!(end, ConversationEnd::RoundLimit);
    assert_eq!(adapter.request_count(), 3);
    assert_eq!(handler.call_count(), 2);
    let events = handler.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, ResponseKind::System);
    assert!(events[0].1.starts_with("Too many tool calls"));
}

#[tokio::test]
async fn cancelled_before_start_sends_nothing() {
    let adapter = ScriptedAdapter::new(vec![Ok(vec![text("unused")])]);
    let handler = RecordingHandler::default();
    let token = CancellationToken::new();
    token.cancel();

    let end = run(&adapter, &handler, &token, DEFAULT_MAX_TOOL_ROUNDS).await;

    assert_eq!(end, ConversationEnd::Cancelled);
    assert_eq!(adapter.request_count(), 0);
    assert!(handler.events().is_empty());
}

#[tokio::test]
async fn cancellation_during_a_tool_call_stops_before_the_next_request() {
    let token = CancellationToken::new();
    let adapter = ScriptedAdapter::new(vec![
        Ok(vec![tool_use("phone-call-tool", json!({"number": "1"}))]),
        Ok(vec![text("unused")]),
    ]);
    let handler = RecordingHandler {
        result: Some(ToolCallOutcome::success("ok")),
        cancel_on_call: Some(token.clone()),
        ..RecordingHandler::default()
    };

    let end = run(&adapter, &handler, &token, DEFAULT_MAX_TOOL_ROUNDS).await;

    assert_eq!(end, ConversationEnd::Cancelled);
    assert_eq!(adapter.request_count(), 1);
    assert_eq!(handler.call_count(), 1);
}
