use super::{client_details, McpClient};
use crate::mcp::tool::{PromptDescriptor, ResourceDescriptor, ToolCallOutcome, ToolDescriptor};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
/// A live, handshaken connection to one MCP peer.
pub trait ClientHandle: Send + Sync {
    fn server_name(&self) -> &str;
    fn server_version(&self) -> &str;
    fn tools(&self) -> &[ToolDescriptor];
    fn prompts(&self) -> &[PromptDescriptor];
    fn resources(&self) -> &[ResourceDescriptor];

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallOutcome, String>;

    async fn ping(&self) -> Result<(), String>;

    async fn close(&self);
}

/// Client plus the capability listing captured during the handshake.
pub struct McpSession {
    client: Arc<McpClient>,
    server_name: String,
    server_version: String,
    tools: Vec<ToolDescriptor>,
    prompts: Vec<PromptDescriptor>,
    resources: Vec<ResourceDescriptor>,
}

impl McpSession {
    /// Performs the handshake and fetches tools, prompts and resources.
    ///
    /// Failing to list tools fails the handshake; prompt and resource
    /// listing failures only leave those lists empty.
    pub async fn establish(client: Arc<McpClient>) -> Result<Self, String> {
        let details = client.initialize(client_details()).await?;
        let tools = client.list_tools().await?;
        let prompts = client.list_prompts().await.unwrap_or_else(|err| {
            warn!(connection = %client.connection(), error = %err, "Prompt listing failed");
            Vec::new()
        });
        let resources = client.list_resources().await.unwrap_or_else(|err| {
            warn!(connection = %client.connection(), error = %err, "Resource listing failed");
            Vec::new()
        });
        debug!(
            connection = %client.connection(),
            server = %details.server_info.name,
            tools = tools.len(),
            prompts = prompts.len(),
            resources = resources.len(),
            "MCP session established"
        );

        Ok(Self {
            server_name: details.server_info.name,
            server_version: details.server_info.version,
            client,
            tools,
            prompts,
            resources,
        })
    }
}

#[async_trait]
impl ClientHandle for McpSession {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn server_version(&self) -> &str {
        &self.server_version
    }

    fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    fn prompts(&self) -> &[PromptDescriptor] {
        &self.prompts
    }

    fn resources(&self) -> &[ResourceDescriptor] {
        &self.resources
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallOutcome, String> {
        self.client.call_tool(name, arguments).await
    }

    async fn ping(&self) -> Result<(), String> {
        self.client.ping().await
    }

    async fn close(&self) {
        self.client.close().await;
    }
}
