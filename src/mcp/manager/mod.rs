//! Named MCP connections: one fixed local connection plus the user's remote
//! servers, each connected, health-checked and torn down independently.

use crate::core::config::{ConfigError, ConfigStore, RemoteServerConfig};
use crate::mcp::client::ClientHandle;
use crate::mcp::tool::{ToolCallOutcome, ToolDescriptor};
use futures_util::future::join_all;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

mod connector;


pub use connector::{DefaultConnector, McpConnector, OpenedClient};

pub const LOCAL_CONNECTION_NAME: &str = "LocalMcp";

const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);
const PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Local,
    Remote {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

#[derive(Clone)]
pub struct McpConnection {
    pub name: String,
    pub endpoint: Endpoint,
    pub client: Option<Arc<dyn ClientHandle>>,
    pub last_error: Option<String>,
    listener: Option<AbortHandle>,
}

impl McpConnection {
    fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            name: name.into(),
            endpoint,
            client: None,
            last_error: None,
            listener: None,
        }
    }

    fn from_remote(config: &RemoteServerConfig) -> Self {
        Self::new(
            config.connection_name.clone(),
            Endpoint::Remote {
                url: config.url.clone(),
                headers: config.headers.clone(),
            },
        )
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn is_local(&self) -> bool {
        matches!(self.endpoint, Endpoint::Local)
    }

    pub fn url(&self) -> Option<&str> {
        match &self.endpoint {
            Endpoint::Local => None,
            Endpoint::Remote { url, .. } => Some(url),
        }
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        self.client.as_ref().map_or(&[], |client| client.tools())
    }
}

impl fmt::Debug for McpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpConnection")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("last_error", &self.last_error)
            .finish()
    }
}

#[derive(Debug)]
pub enum ConnectionError {
    Unknown(String),
    DuplicateName(String),
    BlankName,
    LocalNotEditable,
    StillConnected(String),
    Config(ConfigError),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Unknown(name) => write!(f, "No connection named {name}"),
            ConnectionError::DuplicateName(name) => {
                write!(f, "A connection named {name} already exists")
            }
            ConnectionError::BlankName => write!(f, "Connection name must not be blank"),
            ConnectionError::LocalNotEditable => {
                write!(f, "{LOCAL_CONNECTION_NAME} cannot be edited or removed")
            }
            ConnectionError::StillConnected(name) => {
                write!(f, "Disconnect {name} before changing it")
            }
            ConnectionError::Config(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for ConnectionError {
    fn from(err: ConfigError) -> Self {
        ConnectionError::Config(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDispatchError {
    NotFound(String),
    Failed(String),
}

impl fmt::Display for ToolDispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolDispatchError::NotFound(name) => write!(f, "Tool {name} not found."),
            ToolDispatchError::Failed(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for ToolDispatchError {}

pub type ConnectionList = Arc<Vec<McpConnection>>;

/// Owns the connection list.
///
/// The list is published through a watch channel and only ever replaced
/// whole. Lifecycle operations on one name are serialized, so at most one
/// client exists per connection name, while different names connect and
/// disconnect independently. Edits to the set of remotes hold `edits` as well.
pub struct McpConnectionManager {
    connections: watch::Sender<ConnectionList>,
    connector: Arc<dyn McpConnector>,
    config: Arc<ConfigStore>,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    edits: Mutex<()>,
}

impl McpConnectionManager {
    /// Builds `LocalMcp` plus every persisted remote, all disconnected.
    pub fn new(config: Arc<ConfigStore>, connector: Arc<dyn McpConnector>) -> Self {
        let remotes = match config.load() {
            Ok(loaded) => loaded.remote_servers,
            Err(err) => {
                warn!(error = %err, "Failed to load remote MCP servers");
                Vec::new()
            }
        };
        let mut list = vec![McpConnection::new(LOCAL_CONNECTION_NAME, Endpoint::Local)];
        list.extend(
            remotes
                .iter()
                .filter(|remote| remote.connection_name != LOCAL_CONNECTION_NAME)
                .map(McpConnection::from_remote),
        );
        let (connections, _) = watch::channel(Arc::new(list));

        Self {
            connections,
            connector,
            config,
            locks: std::sync::Mutex::new(HashMap::new()),
            edits: Mutex::new(()),
        }
    }

    async fn lock_for(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionList> {
        self.connections.subscribe()
    }

    pub fn connections(&self) -> ConnectionList {
        self.connections.borrow().clone()
    }

    pub fn connection(&self, name: &str) -> Option<McpConnection> {
        self.connections
            .borrow()
            .iter()
            .find(|connection| connection.name == name)
            .cloned()
    }

    fn replace<F>(&self, mutator: F)
    where
        F: FnOnce(&mut Vec<McpConnection>),
    {
        let mut next = self.connections.borrow().as_ref().clone();
        mutator(&mut next);
        self.connections.send_replace(Arc::new(next));
    }

    fn update_connection<F>(&self, name: &str, mutator: F)
    where
        F: FnOnce(&mut McpConnection),
    {
        self.replace(|list| {
            if let Some(connection) = list.iter_mut().find(|connection| connection.name == name) {
                mutator(connection);
            }
        });
    }

    /// Connects `name` unless it is unknown or already connected. Returns
    /// whether the connection is live afterwards; failures are recorded in
    /// `last_error`.
    pub async fn connect(&self, name: &str) -> bool {
        let _guard = self.lock_for(name).await;
        let Some(connection) = self.connection(name) else {
            debug!(connection = %name, "Ignoring connect for unknown connection");
            return false;
        };
        if connection.is_connected() {
            return true;
        }

        match self.connector.open(name, &connection.endpoint).await {
            Ok(opened) => {
                info!(
                    connection = %name,
                    server = %opened.handle.server_name(),
                    tools = opened.handle.tools().len(),
                    "MCP connection established"
                );
                self.update_connection(name, |connection| {
                    connection.client = Some(opened.handle);
                    connection.listener = opened.listener;
                    connection.last_error = None;
                });
                true
            }
            Err(err) => {
                warn!(connection = %name, error = %err, "MCP connection failed");
                self.update_connection(name, |connection| {
                    connection.last_error = Some(err);
                });
                false
            }
        }
    }

    pub async fn disconnect(&self, name: &str) {
        let _guard = self.lock_for(name).await;
        let Some(connection) = self.connection(name) else {
            return;
        };
        let Some(client) = connection.client else {
            return;
        };

        shutdown_client(name, client, connection.listener).await;
        self.update_connection(name, |connection| {
            connection.client = None;
            connection.listener = None;
        });
        info!(connection = %name, "MCP connection closed");
    }

    /// Pings every live connection, and every connection when auto-reconnect
    /// is enabled; each failing one is disconnected and connected again.
    /// Returns the names whose reconnect succeeded.
    pub async fn check_connection(&self) -> Vec<String> {
        let auto_reconnect = self
            .config
            .load()
            .map(|config| config.auto_reconnect)
            .unwrap_or(false);

        let candidates: Vec<McpConnection> = self
            .connections()
            .iter()
            .filter(|connection| auto_reconnect || connection.is_connected())
            .cloned()
            .collect();

        let checks = candidates.iter().map(|connection| async move {
            let healthy = match &connection.client {
                Some(client) => matches!(
                    tokio::time::timeout(PING_TIMEOUT, client.ping()).await,
                    Ok(Ok(()))
                ),
                None => false,
            };
            (connection.name.clone(), healthy)
        });

        let mut reconnected = Vec::new();
        for (name, healthy) in join_all(checks).await {
            if healthy {
                continue;
            }
            debug!(connection = %name, "MCP health check failed");
            self.disconnect(&name).await;
            if self.connect(&name).await {
                reconnected.push(name);
            }
        }
        reconnected
    }

    pub async fn add_remote(&self, remote: RemoteServerConfig) -> Result<(), ConnectionError> {
        let _edits = self.edits.lock().await;
        let name = remote.connection_name.trim().to_string();
        if name.is_empty() {
            return Err(ConnectionError::BlankName);
        }
        if self.connection(&name).is_some() {
            return Err(ConnectionError::DuplicateName(name));
        }
        let remote = RemoteServerConfig {
            connection_name: name,
            ..remote
        };

        self.config.mutate(|config| {
            config.remote_servers.push(remote.clone());
        })?;
        self.replace(|list| list.push(McpConnection::from_remote(&remote)));
        Ok(())
    }

    /// Replaces a remote definition. A live client keeps running against the
    /// old definition until it is reconnected.
    pub async fn edit_remote(
        &self,
        previous_name: &str,
        remote: RemoteServerConfig,
    ) -> Result<(), ConnectionError> {
        let _edits = self.edits.lock().await;
        let _guard = self.lock_for(previous_name).await;
        if previous_name == LOCAL_CONNECTION_NAME {
            return Err(ConnectionError::LocalNotEditable);
        }
        if self.connection(previous_name).is_none() {
            return Err(ConnectionError::Unknown(previous_name.to_string()));
        }
        let name = remote.connection_name.trim().to_string();
        if name.is_empty() {
            return Err(ConnectionError::BlankName);
        }
        if name != previous_name && self.connection(&name).is_some() {
            return Err(ConnectionError::DuplicateName(name));
        }
        let remote = RemoteServerConfig {
            connection_name: name,
            ..remote
        };

        self.config.mutate(|config| {
            match config
                .remote_servers
                .iter_mut()
                .find(|entry| entry.connection_name == previous_name)
            {
                Some(entry) => *entry = remote.clone(),
                None => config.remote_servers.push(remote.clone()),
            }
        })?;
        self.update_connection(previous_name, |connection| {
            let updated = McpConnection::from_remote(&remote);
            connection.name = updated.name;
            connection.endpoint = updated.endpoint;
        });
        Ok(())
    }

    pub async fn remove_remote(&self, name: &str) -> Result<(), ConnectionError> {
        let _edits = self.edits.lock().await;
        let _guard = self.lock_for(name).await;
        if name == LOCAL_CONNECTION_NAME {
            return Err(ConnectionError::LocalNotEditable);
        }
        let Some(connection) = self.connection(name) else {
            return Err(ConnectionError::Unknown(name.to_string()));
        };
        if connection.is_connected() {
            return Err(ConnectionError::StillConnected(name.to_string()));
        }

        self.config.mutate(|config| {
            config
                .remote_servers
                .retain(|entry| entry.connection_name != name);
        })?;
        self.replace(|list| list.retain(|connection| connection.name != name));
        Ok(())
    }

    /// Tools of every live connection in list order; on duplicate names
    /// the first connection wins.
    pub fn connected_tools(&self) -> Vec<ToolDescriptor> {
        let connections = self.connections();
        let mut seen = HashSet::new();
        connections
            .iter()
            .flat_map(|connection| connection.tools().iter().cloned())
            .filter(|tool| seen.insert(tool.name.clone()))
            .collect()
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallOutcome, ToolDispatchError> {
        let owner = self.connections().iter().find_map(|connection| {
            let client = connection.client.as_ref()?;
            client
                .tools()
                .iter()
                .any(|tool| tool.name == name)
                .then(|| (connection.name.clone(), client.clone()))
        });
        let Some((connection, client)) = owner else {
            return Err(ToolDispatchError::NotFound(name.to_string()));
        };

        debug!(connection = %connection, tool = %name, "Dispatching MCP tool call");
        client
            .call_tool(name, arguments)
            .await
            .map_err(ToolDispatchError::Failed)
    }

    /// Closes every live connection.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self
            .connections()
            .iter()
            .filter(|connection| connection.is_connected())
            .map(|connection| connection.name.clone())
            .collect();
        for name in names {
            self.disconnect(&name).await;
        }
    }
}

/// Closes the client within [`CLOSE_TIMEOUT`], then aborts the serving task
/// and the close job regardless of whether the close finished.
async fn shutdown_client(
    name: &str,
    client: Arc<dyn ClientHandle>,
    listener: Option<AbortHandle>,
) {
    let close_job = tokio::spawn(async move { client.close().await });
    let close_abort = close_job.abort_handle();
    if tokio::time::timeout(CLOSE_TIMEOUT, close_job).await.is_err() {
        warn!(connection = %name, "MCP close did not finish in time; abandoning it");
    }
    if let Some(listener) = listener {
        listener.abort();
    }
    close_abort.abort();
}
