use super::Endpoint;
use crate::mcp::bridge::{readiness, LocalBridge};
use crate::mcp::client::{ClientHandle, McpClient, McpSession};
use crate::mcp::local::{LocalServer, LocalServices};
use crate::mcp::permissions::PermissionGate;
use crate::mcp::transport::sse;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;

const LOCAL_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// A handshaken client plus the background task serving it, if any.
pub struct OpenedClient {
    pub handle: Arc<dyn ClientHandle>,
    pub listener: Option<AbortHandle>,
}

/// Opens a client for an endpoint. Implementations must leave nothing
/// running when they return an error.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn open(&self, name: &str, endpoint: &Endpoint) -> Result<OpenedClient, String>;
}

pub struct DefaultConnector {
    http: reqwest::Client,
    services: LocalServices,
    gate: Arc<PermissionGate>,
}

impl DefaultConnector {
    pub fn new(http: reqwest::Client, services: LocalServices, gate: Arc<PermissionGate>) -> Self {
        Self {
            http,
            services,
            gate,
        }
    }

    async fn open_local(&self, name: &str) -> Result<OpenedClient, String> {
        let LocalBridge { server, client } = LocalBridge::new();
        let (ready, ready_rx) = readiness();
        let local = Arc::new(LocalServer::new(&self.services, self.gate.clone()));
        let listener = tokio::spawn(local.listen(server, ready)).abort_handle();

        match tokio::time::timeout(LOCAL_READY_TIMEOUT, ready_rx).await {
            Ok(Ok(())) => {}
            _ => {
                listener.abort();
                return Err("Local MCP server did not become ready.".to_string());
            }
        }
        debug!(connection = %name, "Local MCP server ready");

        match McpSession::establish(McpClient::over_bridge(name, client)).await {
            Ok(session) => Ok(OpenedClient {
                handle: Arc::new(session),
                listener: Some(listener),
            }),
            Err(err) => {
                listener.abort();
                Err(err)
            }
        }
    }

    async fn open_remote(
        &self,
        name: &str,
        url: &str,
        headers: &std::collections::BTreeMap<String, String>,
    ) -> Result<OpenedClient, String> {
        if url.trim().is_empty() {
            return Err(format!("Remote connection {name} has no URL."));
        }
        let client = sse::connect(name, &self.http, url.trim(), headers).await?;
        match McpSession::establish(client.clone()).await {
            Ok(session) => Ok(OpenedClient {
                handle: Arc::new(session),
                listener: None,
            }),
            Err(err) => {
                client.close().await;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl McpConnector for DefaultConnector {
    async fn open(&self, name: &str, endpoint: &Endpoint) -> Result<OpenedClient, String> {
        match endpoint {
            Endpoint::Local => self.open_local(name).await,
            Endpoint::Remote { url, headers } => self.open_remote(name, url, headers).await,
        }
    }
}
