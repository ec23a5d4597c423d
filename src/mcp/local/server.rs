use super::{default_tools, invoke, LocalServices, LocalTool};
use crate::mcp::bridge::{BridgeEnd, ReadySignal};
use crate::mcp::permissions::PermissionGate;
use crate::mcp::tool::{ToolCallOutcome, ToolDescriptor};
use rust_mcp_schema::schema_utils::{
    ClientJsonrpcRequest, ClientMessage, FromMessage, MessageFromServer, ResultFromServer,
    ServerMessage,
};
use rust_mcp_schema::{
    CallToolRequestParams, CallToolResult, ContentBlock, GetPromptRequestParams, GetPromptResult,
    Implementation, InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult,
    Prompt, PromptArgument, PromptMessage, ReadResourceResult, RequestId, Resource, Role, RpcError,
    ServerCapabilities, ServerCapabilitiesPrompts, ServerCapabilitiesResources,
    ServerCapabilitiesTools, TextContent, TextResourceContents, Tool, ToolInputSchema,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub const LOCAL_SERVER_NAME: &str = "LocalMcp";

const ASK_CONTACT_PROMPT: &str = "ask-contact-prompt";
const SAMPLE_RESOURCE_URI: &str = "sample://code/hello-world";
const SAMPLE_CODE: &str = "fn main() {\n    println!(\"Hello, world!\");\n}\n";

/// Methods this server answers; a request for one of them that does not
/// match its schema is rejected as invalid params rather than unknown.
const SERVED_METHODS: &[&str] = &[
    "initialize",
    "ping",
    "tools/list",
    "tools/call",
    "prompts/list",
    "prompts/get",
    "resources/list",
    "resources/read",
];

/// JSON-RPC MCP server answering over one end of a local bridge.
pub struct LocalServer {
    tools: Vec<Arc<dyn LocalTool>>,
    gate: Arc<PermissionGate>,
}

impl LocalServer {
    pub fn new(services: &LocalServices, gate: Arc<PermissionGate>) -> Self {
        Self::with_tools(default_tools(services), gate)
    }

    pub fn with_tools(tools: Vec<Arc<dyn LocalTool>>, gate: Arc<PermissionGate>) -> Self {
        Self { tools, gate }
    }

    pub fn tools(&self) -> &[Arc<dyn LocalTool>] {
        &self.tools
    }

    fn find_tool(&self, name: &str) -> Option<Arc<dyn LocalTool>> {
        self.tools.iter().find(|tool| tool.name() == name).cloned()
    }

    /// Serves requests until the peer closes its side of the bridge or the
    /// bridge can no longer be read.
    ///
    /// `ready` fires once the read loop is about to start. Tool calls run
    /// concurrently so a call waiting on a permission prompt does not block
    /// pings; they are aborted when this future is dropped.
    pub async fn listen(self: Arc<Self>, end: BridgeEnd, mut ready: ReadySignal) {
        let BridgeEnd { reader, writer } = end;
        let writer = Arc::new(Mutex::new(writer));
        let mut lines = BufReader::new(reader).lines();
        let mut calls = JoinSet::new();

        debug!(server = LOCAL_SERVER_NAME, "Local MCP server listening");
        ready.notify();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "Local MCP server failed to read from the bridge");
                    break;
                }
            };
            while calls.try_join_next().is_some() {}
            if line.trim().is_empty() {
                continue;
            }

            let request = match serde_json::from_str::<ClientMessage>(&line) {
                Ok(ClientMessage::Request(request)) => request,
                Ok(ClientMessage::Notification(notification)) => {
                    debug!(
                        method = %notification.method(),
                        "Local MCP server received notification"
                    );
                    continue;
                }
                Ok(ClientMessage::Response(_) | ClientMessage::Error(_)) => {
                    debug!("Local MCP server ignoring a client response");
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "Local MCP server received a malformed message");
                    let error = if err.is_syntax() || err.is_eof() {
                        RpcError::parse_error()
                    } else {
                        RpcError::invalid_request()
                    };
                    write_message(&writer, error.into(), None).await;
                    continue;
                }
            };

            let id = request.request_id().clone();
            if let ClientJsonrpcRequest::CallToolRequest(call) = request {
                let server = self.clone();
                let writer = writer.clone();
                calls.spawn(async move {
                    let reply = server.call_tool(call.params).await;
                    write_message(&writer, reply, Some(id)).await;
                });
                continue;
            }

            let reply = self.handle(request);
            write_message(&writer, reply, Some(id)).await;
        }

        calls.shutdown().await;
        let _ = writer.lock().await.shutdown().await;
        debug!(server = LOCAL_SERVER_NAME, "Local MCP server stopped");
    }

    fn handle(&self, request: ClientJsonrpcRequest) -> MessageFromServer {
        match request {
            ClientJsonrpcRequest::InitializeRequest(request) => {
                reply(initialize_result(request.params.protocol_version))
            }
            ClientJsonrpcRequest::PingRequest(_) => reply(rust_mcp_schema::Result::default()),
            ClientJsonrpcRequest::ListToolsRequest(_) => reply(ListToolsResult {
                meta: None,
                next_cursor: None,
                tools: self
                    .tools
                    .iter()
                    .map(|tool| schema_tool(&tool.descriptor()))
                    .collect(),
            }),
            ClientJsonrpcRequest::ListPromptsRequest(_) => reply(ListPromptsResult {
                meta: None,
                next_cursor: None,
                prompts: vec![ask_contact_prompt()],
            }),
            ClientJsonrpcRequest::GetPromptRequest(request) => get_prompt(request.params),
            ClientJsonrpcRequest::ListResourcesRequest(_) => reply(ListResourcesResult {
                meta: None,
                next_cursor: None,
                resources: vec![sample_resource()],
            }),
            ClientJsonrpcRequest::ReadResourceRequest(request) => {
                let uri = request.params.uri;
                if uri != SAMPLE_RESOURCE_URI {
                    return RpcError::invalid_params()
                        .with_message(format!("Unknown resource: {uri}"))
                        .into();
                }
                reply(ReadResourceResult {
                    contents: vec![TextResourceContents {
                        meta: None,
                        mime_type: Some("text/plain".to_string()),
                        text: SAMPLE_CODE.to_string(),
                        uri,
                    }
                    .into()],
                    meta: None,
                })
            }
            ClientJsonrpcRequest::CustomRequest(request)
                if SERVED_METHODS.contains(&request.method.as_str()) =>
            {
                debug!(method = %request.method, "Local MCP request did not match its schema");
                RpcError::invalid_params()
                    .with_message(format!("Invalid params for {}", request.method))
                    .into()
            }
            other => {
                debug!(method = %other.method(), "Local MCP server does not support method");
                RpcError::method_not_found().into()
            }
        }
    }

    async fn call_tool(&self, params: CallToolRequestParams) -> MessageFromServer {
        let name = params.name;
        let Some(tool) = self.find_tool(&name) else {
            return RpcError::invalid_params()
                .with_message(format!("Unknown tool: {name}"))
                .into();
        };
        let arguments = params.arguments.unwrap_or_default();

        debug!(tool = %name, "Local MCP tool call");
        let outcome = invoke(tool.as_ref(), &arguments, &self.gate).await;
        reply(call_tool_result(outcome))
    }
}

fn reply(result: impl Into<ResultFromServer>) -> MessageFromServer {
    MessageFromServer::ResultFromServer(result.into())
}

/// Echoes the client's protocol version; the local client always speaks
/// the version this crate was built against.
fn initialize_result(protocol_version: String) -> InitializeResult {
    InitializeResult {
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(true),
            }),
            prompts: Some(ServerCapabilitiesPrompts {
                list_changed: Some(true),
            }),
            resources: Some(ServerCapabilitiesResources {
                list_changed: Some(true),
                subscribe: Some(true),
            }),
            ..ServerCapabilities::default()
        },
        instructions: None,
        meta: None,
        protocol_version,
        server_info: Implementation {
            description: None,
            icons: Vec::new(),
            name: LOCAL_SERVER_NAME.to_string(),
            title: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            website_url: None,
        },
    }
}

fn schema_tool(descriptor: &ToolDescriptor) -> Tool {
    let properties: HashMap<_, _> = descriptor
        .properties()
        .into_iter()
        .filter_map(|(name, schema)| match schema {
            Value::Object(schema) => Some((name, schema)),
            _ => None,
        })
        .collect();
    Tool {
        annotations: None,
        description: descriptor.description.clone(),
        execution: None,
        icons: Vec::new(),
        input_schema: ToolInputSchema::new(descriptor.required(), Some(properties), None),
        meta: None,
        name: descriptor.name.clone(),
        output_schema: None,
        title: None,
    }
}

fn ask_contact_prompt() -> Prompt {
    Prompt {
        arguments: vec![PromptArgument {
            description: Some("Name who finds contact information".to_string()),
            name: "name".to_string(),
            required: Some(true),
            title: None,
        }],
        description: Some("Ask contact information".to_string()),
        icons: Vec::new(),
        meta: None,
        name: ASK_CONTACT_PROMPT.to_string(),
        title: None,
    }
}

fn get_prompt(params: GetPromptRequestParams) -> MessageFromServer {
    let name = params.name;
    if name != ASK_CONTACT_PROMPT {
        return RpcError::invalid_params()
            .with_message(format!("Unknown prompt: {name}"))
            .into();
    }
    let person = params
        .arguments
        .as_ref()
        .and_then(|arguments| arguments.get("name"))
        .map_or("unknown", String::as_str);
    let question = format!("What are {person}'s phone number and email address?");
    reply(GetPromptResult {
        description: Some(format!("Description for {name}")),
        messages: vec![PromptMessage {
            content: ContentBlock::from(TextContent::new(question, None, None)),
            role: Role::User,
        }],
        meta: None,
    })
}

fn sample_resource() -> Resource {
    Resource {
        annotations: None,
        description: Some("Local code".to_string()),
        icons: Vec::new(),
        meta: None,
        mime_type: Some("text/plain".to_string()),
        name: "Local Code Search".to_string(),
        size: None,
        title: None,
        uri: SAMPLE_RESOURCE_URI.to_string(),
    }
}

fn call_tool_result(outcome: ToolCallOutcome) -> CallToolResult {
    CallToolResult {
        is_error: Some(outcome.is_error),
        ..CallToolResult::text_content(vec![TextContent::new(outcome.text, None, None)])
    }
}

async fn write_message<W>(writer: &Mutex<W>, message: MessageFromServer, id: Option<RequestId>)
where
    W: AsyncWrite + Unpin,
{
    let message = match ServerMessage::from_message(message, id) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "Failed to build local MCP response");
            return;
        }
    };
    let mut bytes = match serde_json::to_vec(&message) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "Failed to encode local MCP response");
            return;
        }
    };
    bytes.push(b'\n');
    let mut writer = writer.lock().await;
    if let Err(err) = writer.write_all(&bytes).await {
        debug!(error = %err, "Local MCP client went away");
        return;
    }
    let _ = writer.flush().await;
}
