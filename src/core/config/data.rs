use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A user-defined remote MCP endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RemoteServerConfig {
    pub connection_name: String,
    pub url: String,
    /// Static request headers sent with every request (e.g. `Authorization`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl RemoteServerConfig {
    pub fn new(connection_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            connection_name: connection_name.into(),
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// JSON interchange form of the remote list: `{"list":[{"connectionName","url","headers"}]}`.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct RemoteServerList {
    #[serde(default)]
    pub list: Vec<RemoteServerEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteServerEntry {
    pub connection_name: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl RemoteServerList {
    pub fn from_configs(configs: &[RemoteServerConfig]) -> Self {
        Self {
            list: configs
                .iter()
                .map(|config| RemoteServerEntry {
                    connection_name: config.connection_name.clone(),
                    url: config.url.clone(),
                    headers: config.headers.clone(),
                })
                .collect(),
        }
    }

    pub fn into_configs(self) -> Vec<RemoteServerConfig> {
        self.list
            .into_iter()
            .map(|entry| RemoteServerConfig {
                connection_name: entry.connection_name,
                url: entry.url,
                headers: entry.headers,
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct MemorySettings {
    #[serde(default)]
    pub enabled: bool,
    /// Free-text long-term memory blob.
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct HotWordSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    /// Model id from the provider catalogue (e.g. "claude-3-5-sonnet-latest")
    pub selected_model: Option<String>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub hot_word: HotWordSettings,
    #[serde(default)]
    pub tts_enabled: bool,
    /// Submit speech recognition results without confirmation
    #[serde(default)]
    pub asr_auto_result: bool,
    /// Reconnect dropped connections during health checks
    #[serde(default)]
    pub auto_reconnect: bool,
    /// Upper bound on tool-call rounds in one chat turn
    pub max_tool_rounds: Option<usize>,
    #[serde(default)]
    pub remote_servers: Vec<RemoteServerConfig>,
}

impl Config {
    pub fn remote_server(&self, name: &str) -> Option<&RemoteServerConfig> {
        self.remote_servers
            .iter()
            .find(|server| server.connection_name == name)
    }
}

pub fn path_display(path: &Path) -> String {
    path.display().to_string()
}
