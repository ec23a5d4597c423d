use super::*;
use crate::mcp::bridge::{readiness, BridgeEnd, LocalBridge};
use crate::mcp::client::{ClientHandle, McpClient, McpSession};
use crate::mcp::permissions::{PermissionAction, PermissionRequestHandler, CALL_PHONE};
use rust_mcp_schema::{InitializeResult, ListToolsResult, LATEST_PROTOCOL_VERSION};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};
use tokio::task::JoinHandle;

/// Records the order of the invocation phases it observes.
struct GatedTool {
    executed: AtomicUsize,
}

#[async_trait]
impl LocalTool for GatedTool {
    fn name(&self) -> &'static str {
        "gated-tool"
    }

    fn description(&self) -> &'static str {
        "Needs two arguments and CALL_PHONE"
    }

    fn properties(&self) -> Value {
        json!({"a": {"type": "string"}, "b": {"type": "string"}})
    }

    fn required_properties(&self) -> &'static [&'static str] {
        &["a", "b"]
    }

    fn required_permissions(&self) -> &'static [&'static str] {
        &[CALL_PHONE]
    }

    async fn execute(
        &self,
        _arguments: &Map<String, Value>,
        _gate: &PermissionGate,
    ) -> ToolCallOutcome {
        self.executed.fetch_add(1, Ordering::SeqCst);
        success_outcome("ran")
    }
}

struct CountingHandler {
    approve: bool,
    asked: StdMutex<Vec<Vec<String>>>,
}

#[async_trait]
impl PermissionRequestHandler for CountingHandler {
    async fn on_request_permission(&self, permissions: &[String]) -> bool {
        self.asked.lock().unwrap().push(permissions.to_vec());
        self.approve
    }

    fn on_request_custom_permission(&self, _guide_text: &str, _action: Option<&PermissionAction>) {}
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn missing_arguments_are_reported_before_permissions_are_requested() {
    let tool = GatedTool {
        executed: AtomicUsize::new(0),
    };
    let gate = PermissionGate::new();
    let handler = Arc::new(CountingHandler {
        approve: true,
        asked: StdMutex::new(Vec::new()),
    });
    gate.attach(handler.clone());

    let outcome = invoke(&tool, &args(json!({"a": "x", "b": null})), &gate).await;

    assert!(outcome.is_error);
    assert_eq!(
        outcome.text,
        r#"{"isSucceed":false,"errorMessage":"Parameter b is required."}"#
    );
    assert!(handler.asked.lock().unwrap().is_empty());
    assert_eq!(tool.executed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn denied_permission_stops_before_execute() {
    let tool = GatedTool {
        executed: AtomicUsize::new(0),
    };
    let gate = PermissionGate::new();
    let handler = Arc::new(CountingHandler {
        approve: false,
        asked: StdMutex::new(Vec::new()),
    });
    gate.attach(handler.clone());

    let outcome = invoke(&tool, &args(json!({"a": "x", "b": "y"})), &gate).await;

    assert_eq!(
        outcome.text,
        r#"{"isSucceed":false,"errorMessage":"Permission CALL_PHONE is not granted."}"#
    );
    assert_eq!(
        handler.asked.lock().unwrap().as_slice(),
        &[vec![CALL_PHONE.to_string()]]
    );
    assert_eq!(tool.executed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn approved_permission_runs_and_is_not_asked_again() {
    let tool = GatedTool {
        executed: AtomicUsize::new(0),
    };
    let gate = PermissionGate::new();
    let handler = Arc::new(CountingHandler {
        approve: true,
        asked: StdMutex::new(Vec::new()),
    });
    gate.attach(handler.clone());
    let arguments = args(json!({"a": "x", "b": "y"}));

    assert!(!invoke(&tool, &arguments, &gate).await.is_error);
    assert!(!invoke(&tool, &arguments, &gate).await.is_error);

    assert_eq!(handler.asked.lock().unwrap().len(), 1);
    assert_eq!(tool.executed.load(Ordering::SeqCst), 2);
}

async fn local_session(gate: Arc<PermissionGate>) -> McpSession {
    let LocalBridge { server, client } = LocalBridge::new();
    let (ready, ready_rx) = readiness();
    let local = Arc::new(LocalServer::new(&LocalServices::in_memory(), gate));
    tokio::spawn(local.listen(server, ready));
    ready_rx.await.expect("server should signal readiness");

    McpSession::establish(McpClient::over_bridge(LOCAL_CONNECTION, client))
        .await
        .expect("local handshake")
}

const LOCAL_CONNECTION: &str = server::LOCAL_SERVER_NAME;

#[tokio::test]
async fn handshake_lists_tools_prompts_and_resources() {
    let session = local_session(Arc::new(PermissionGate::new())).await;

    assert_eq!(session.server_name(), "LocalMcp");
    assert_eq!(session.server_version(), env!("CARGO_PKG_VERSION"));
    let names: Vec<&str> = session.tools().iter().map(|tool| tool.name.as_str()).collect();
    assert!(names.contains(&"contact-list-info-tool"));
    assert!(names.contains(&"phone-call-tool"));
    assert_eq!(names.len(), 11);
    assert_eq!(session.prompts()[0].name, "ask-contact-prompt");
    assert_eq!(session.resources()[0].uri, "sample://code/hello-world");

    let phone = session
        .tools()
        .iter()
        .find(|tool| tool.name == "phone-call-tool")
        .unwrap();
    assert_eq!(phone.required(), vec!["number".to_string()]);
}

#[tokio::test]
async fn tool_calls_over_the_bridge_return_structured_results() {
    let gate = Arc::new(PermissionGate::new());
    let session = local_session(gate.clone()).await;

    let denied = session
        .call_tool("phone-call-tool", args(json!({"number": "123"})))
        .await
        .expect("call should complete");
    assert!(denied.is_error);
    assert!(denied.text.contains("Permission CALL_PHONE is not granted."));

    gate.grant(CALL_PHONE);
    let placed = session
        .call_tool("phone-call-tool", args(json!({"number": "123"})))
        .await
        .expect("call should complete");
    assert!(!placed.is_error);
    assert!(placed.text.contains("\"callResult\":true"));

    let unknown = session.call_tool("no-such-tool", Map::new()).await;
    assert!(unknown.unwrap_err().contains("Unknown tool: no-such-tool"));

    session.ping().await.expect("ping");
    session.close().await;
}

struct RawPeer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    listener: JoinHandle<()>,
}

impl RawPeer {
    async fn start() -> Self {
        let LocalBridge { server, client } = LocalBridge::new();
        let (ready, ready_rx) = readiness();
        let local = Arc::new(LocalServer::new(
            &LocalServices::in_memory(),
            Arc::new(PermissionGate::new()),
        ));
        let listener = tokio::spawn(local.listen(server, ready));
        ready_rx.await.expect("server should signal readiness");
        let BridgeEnd { reader, writer } = client;
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
            listener,
        }
    }

    async fn request(&mut self, request: Value) -> Value {
        let mut bytes = serde_json::to_vec(&request).unwrap();
        bytes.push(b'\n');
        self.writer.write_all(&bytes).await.unwrap();
        let line = self.lines.next_line().await.unwrap().expect("server reply");
        serde_json::from_str(&line).unwrap()
    }
}

#[tokio::test]
async fn initialize_and_tools_list_replies_follow_the_mcp_schema() {
    let mut peer = RawPeer::start().await;

    let reply = peer
        .request(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": LATEST_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "raw", "version": "0.0.1"}
            }
        }))
        .await;
    assert_eq!(reply["id"], 1);
    assert!(reply["result"]["serverInfo"].get("icons").is_none());
    let initialized: InitializeResult = serde_json::from_value(reply["result"].clone()).unwrap();
    assert_eq!(initialized.server_info.name, "LocalMcp");
    assert_eq!(initialized.protocol_version, LATEST_PROTOCOL_VERSION);
    let tools_capability = initialized.capabilities.tools.expect("tools capability");
    assert_eq!(tools_capability.list_changed, Some(true));

    let reply = peer
        .request(json!({"jsonrpc": "2.0", "id": "tools", "method": "tools/list"}))
        .await;
    assert_eq!(reply["id"], "tools");
    let listed: ListToolsResult = serde_json::from_value(reply["result"].clone()).unwrap();
    assert_eq!(listed.tools.len(), 11);
    let phone = listed
        .tools
        .iter()
        .find(|tool| tool.name == "phone-call-tool")
        .expect("phone tool listed");
    assert_eq!(phone.input_schema.required, vec!["number".to_string()]);
    assert!(phone
        .input_schema
        .properties
        .as_ref()
        .is_some_and(|properties| properties.contains_key("number")));

    let reply = peer
        .request(json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {}}))
        .await;
    assert_eq!(reply["error"]["code"], -32602);

    let reply = peer
        .request(json!({"jsonrpc": "2.0", "id": 4, "method": "completion/unknown"}))
        .await;
    assert_eq!(reply["id"], 4);
    assert_eq!(reply["error"]["code"], -32601);

    let reply = peer.request(json!({"jsonrpc": "2.0", "id": 5, "method": "ping"})).await;
    assert_eq!(reply["result"], json!({}));
}

#[tokio::test]
async fn unreadable_input_stops_the_listener() {
    let mut peer = RawPeer::start().await;

    peer.writer.write_all(b"\xff\xfe\n").await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), &mut peer.listener)
        .await
        .expect("listener should stop on a read error")
        .unwrap();
    assert!(peer.lines.next_line().await.unwrap().is_none());
}
