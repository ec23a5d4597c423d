//! JSON-RPC MCP client shared by the local and remote transports.

use crate::mcp::bridge::BridgeEnd;
use crate::mcp::tool::{PromptDescriptor, ResourceDescriptor, ToolCallOutcome, ToolDescriptor};
use crate::mcp::transport::{is_method_not_found, LineChannel, OutboundChannel};
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{
    CallToolRequestParams, ClientCapabilities, Implementation, InitializeRequestParams,
    InitializeResult, PaginatedRequestParams, RequestId, RpcError, LATEST_PROTOCOL_VERSION,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::debug;

pub mod protocol;
pub mod session;


pub use session::{ClientHandle, McpSession};

const MCP_MAX_TOOL_PAGES: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) type PendingRequests = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

pub struct McpClient {
    connection: String,
    outbound: Box<dyn OutboundChannel>,
    pending: PendingRequests,
    next_request_id: AtomicI64,
    server_details: RwLock<Option<InitializeResult>>,
    inbound: std::sync::Mutex<Option<AbortHandle>>,
    request_timeout: Duration,
}

impl McpClient {
    /// Connects a client to the local server over one end of the bridge.
    pub fn over_bridge(connection: impl Into<String>, end: BridgeEnd) -> Arc<Self> {
        let connection = connection.into();
        let pending = PendingRequests::default();
        let inbound = spawn_line_reader(connection.clone(), end.reader, pending.clone());
        Self::from_parts(
            connection,
            Box::new(LineChannel::new(end.writer)),
            pending,
            Some(inbound),
        )
    }

    pub(crate) fn from_parts(
        connection: String,
        outbound: Box<dyn OutboundChannel>,
        pending: PendingRequests,
        inbound: Option<AbortHandle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection,
            outbound,
            pending,
            next_request_id: AtomicI64::new(0),
            server_details: RwLock::new(None),
            inbound: std::sync::Mutex::new(inbound),
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub async fn server_details(&self) -> Option<InitializeResult> {
        self.server_details.read().await.clone()
    }

    fn next_request_id(&self) -> RequestId {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        RequestId::Integer(id)
    }

    pub async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        let request_id = self.next_request_id();
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| err.to_string())?;
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        debug!(
            connection = %self.connection,
            request_id = ?request_id,
            bytes = payload.len(),
            "Sending MCP request"
        );
        if let Err(err) = self.outbound.send(payload).await {
            self.pending.lock().await.remove(&request_id);
            return Err(err);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err("MCP connection closed.".to_string()),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(format!(
                    "Timed out waiting for MCP response after {}s.",
                    self.request_timeout.as_secs()
                ))
            }
        }
    }

    pub async fn send_notification(
        &self,
        notification: NotificationFromClient,
    ) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| err.to_string())?;
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;
        debug!(connection = %self.connection, "Sending MCP notification");
        self.outbound.send(payload).await
    }

    pub async fn initialize(
        &self,
        details: InitializeRequestParams,
    ) -> Result<InitializeResult, String> {
        let response = self
            .send_request(RequestFromClient::InitializeRequest(details))
            .await?;
        let result = protocol::parse_initialize_result(response)?;
        *self.server_details.write().await = Some(result.clone());
        self.send_notification(NotificationFromClient::InitializedNotification(None))
            .await?;
        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MCP_MAX_TOOL_PAGES {
            let params = cursor.take().map(|cursor| PaginatedRequestParams {
                cursor: Some(cursor),
                meta: None,
            });
            let response = self
                .send_request(RequestFromClient::ListToolsRequest(params))
                .await?;
            let (page, next_cursor) = protocol::parse_tool_page(response)?;
            tools.extend(page);
            match next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }
        debug!(connection = %self.connection, "Stopped tool pagination at page limit");
        Ok(tools)
    }

    /// Lists prompts, treating an unsupported method as an empty list.
    pub async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>, String> {
        let response = self
            .send_request(RequestFromClient::ListPromptsRequest(None))
            .await?;
        if is_method_not_found(&response) {
            return Ok(Vec::new());
        }
        protocol::parse_prompts(response)
    }

    /// Lists resources, treating an unsupported method as an empty list.
    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, String> {
        let response = self
            .send_request(RequestFromClient::ListResourcesRequest(None))
            .await?;
        if is_method_not_found(&response) {
            return Ok(Vec::new());
        }
        protocol::parse_resources(response)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallOutcome, String> {
        let params = CallToolRequestParams::new(name).with_arguments(arguments);
        let response = self
            .send_request(RequestFromClient::CallToolRequest(params))
            .await?;
        protocol::parse_call_tool(response)
    }

    pub async fn ping(&self) -> Result<(), String> {
        let response = self
            .send_request(RequestFromClient::PingRequest(None))
            .await?;
        protocol::parse_response_value(response).map(|_| ())
    }

    /// Closes the outbound side, stops the inbound reader and fails every
    /// request still waiting for a response.
    pub async fn close(&self) {
        self.outbound.close().await;
        let inbound = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = inbound {
            handle.abort();
        }
        self.pending.lock().await.clear();
        debug!(connection = %self.connection, "MCP client closed");
    }
}

pub fn client_details() -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "mcp-assistant".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("MCP Assistant".to_string()),
            description: Some("Personal assistant MCP client".to_string()),
            icons: Vec::new(),
            website_url: None,
        },
        meta: None,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    }
}

/// Reads newline-delimited JSON-RPC messages until EOF, then fails any
/// requests still pending.
pub(crate) fn spawn_line_reader<R>(
    connection: String,
    reader: R,
    pending: PendingRequests,
) -> AbortHandle
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ServerMessage>(&line) {
                Ok(message) => dispatch_message(&pending, message, &connection).await,
                Err(err) => {
                    debug!(connection = %connection, error = %err, "Ignoring malformed MCP line")
                }
            }
        }
        debug!(connection = %connection, "MCP inbound stream ended");
        pending.lock().await.clear();
    });
    task.abort_handle()
}

pub(crate) async fn dispatch_message(
    pending: &PendingRequests,
    message: ServerMessage,
    connection: &str,
) {
    match &message {
        ServerMessage::Response(response) => {
            debug!(connection = %connection, response_id = ?response.id, "Received MCP response");
            if let Some(tx) = pending.lock().await.remove(&response.id) {
                let _ = tx.send(message);
            }
        }
        ServerMessage::Error(error) => {
            debug!(
                connection = %connection,
                error_id = ?error.id,
                error_code = error.error.code,
                "Received MCP error"
            );
            if let Some(id) = error.id.as_ref() {
                if let Some(tx) = pending.lock().await.remove(id) {
                    let _ = tx.send(message);
                }
            }
        }
        ServerMessage::Request(request) => {
            debug!(
                connection = %connection,
                method = %request.method(),
                "Ignoring MCP server request"
            );
        }
        ServerMessage::Notification(_) => {
            debug!(connection = %connection, "Received MCP notification");
        }
    }
}

pub(crate) fn format_rpc_error(error: &RpcError) -> String {
    let mut output = format!("MCP error {}: {}", error.code, error.message);
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()))
            .or_else(|| serde_json::to_string_pretty(data).ok());

        if let Some(details) = details {
            if !details.is_empty() {
                output.push('\n');
                output.push_str(&details);
            }
        }
    }
    output
}

pub(crate) fn format_unexpected_server_message(message: &ServerMessage) -> String {
    format!("Unexpected MCP server message: {message:?}")
}
