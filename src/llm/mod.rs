//! LLM provider adapters.
//!
//! Each adapter turns the provider-neutral conversation (history plus any
//! tool rounds so far) into one vendor request and classifies the response
//! into text, thinking and tool-use fragments. [`conversation`] drives the
//! tool-calling loop on top of that single-shot contract.

pub mod catalogue;
pub mod claude;
pub mod conversation;
pub mod gemini;
pub mod openai;
pub mod registry;

use crate::api::format_api_error;
use crate::core::message::MessageItem;
use crate::mcp::tool::ToolDescriptor;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt;
use std::sync::{PoisonError, RwLock};

pub use catalogue::{default_model, find_model, resolve_model, LlmModel, LlmService, MODELS};
pub use conversation::{send_conversation, ConversationEnd, ConversationHandler, ResponseKind};
pub use registry::ProviderRegistry;

/// Text fed back to the provider when a tool produced no result.
pub const TOOL_CALL_FAILED: &str = "Failed to call tool.";

#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    /// Vendor call id; synthesized for vendors that do not issue one.
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// One logical part of a provider response, in provider order.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFragment {
    Text(String),
    Thinking(String),
    ToolUse(ToolUse),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolExchange {
    pub call: ToolUse,
    pub result: String,
}

/// Provider-neutral conversation history.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEntry {
    Message(MessageItem),
    /// One response that requested tools, with the results that were fed
    /// back. `text` is whatever the assistant said alongside the calls.
    ToolRound {
        text: Option<String>,
        exchanges: Vec<ToolExchange>,
    },
}

#[derive(Debug)]
pub enum LlmError {
    MissingCredential(LlmService),
    Request(reqwest::Error),
    Api { status: StatusCode, body: String },
    Decode(String),
}

impl LlmError {
    /// Worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::MissingCredential(_) | LlmError::Decode(_) => false,
            LlmError::Request(_) => true,
            LlmError::Api { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::MissingCredential(service) => {
                write!(f, "No API key configured for {}.", service.display_name())
            }
            LlmError::Request(err) => write!(f, "Request failed: {err}"),
            LlmError::Api { status, body } => f.write_str(&format_api_error(*status, body)),
            LlmError::Decode(message) => write!(f, "Unexpected response: {message}"),
        }
    }
}

impl Error for LlmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LlmError::Request(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Request(err)
    }
}

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    fn service(&self) -> LlmService;

    fn set_credential(&self, key: &str);

    fn set_model(&self, model_id: &str);

    fn model(&self) -> String;

    /// Sends one request and returns the classified response.
    async fn complete(
        &self,
        system_prompt: &str,
        entries: &[ConversationEntry],
        tools: &[ToolDescriptor],
    ) -> Result<Vec<ResponseFragment>, LlmError>;
}

/// Credential, model and endpoint shared by the HTTP adapters.
pub(crate) struct ProviderSettings {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: String,
    api_key: RwLock<Option<String>>,
    model: RwLock<String>,
}

impl ProviderSettings {
    pub(crate) fn new(http: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: RwLock::new(None),
            model: RwLock::new(model.to_string()),
        }
    }

    pub(crate) fn set_api_key(&self, key: &str) {
        let key = key.trim();
        *self.api_key.write().unwrap_or_else(PoisonError::into_inner) =
            (!key.is_empty()).then(|| key.to_string());
    }

    pub(crate) fn api_key(&self, service: LlmService) -> Result<String, LlmError> {
        self.api_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(LlmError::MissingCredential(service))
    }

    pub(crate) fn set_model(&self, model_id: &str) {
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = model_id.to_string();
    }

    pub(crate) fn model(&self) -> String {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Sends a prepared request and decodes a successful JSON body.
pub(crate) async fn send_json<T>(request: reqwest::RequestBuilder) -> Result<T, LlmError>
where
    T: serde::de::DeserializeOwned,
{
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(LlmError::Api { status, body });
    }
    serde_json::from_str(&body).map_err(|err| LlmError::Decode(err.to_string()))
}

/// Renders a tool result the way it is fed back to text-only vendors.
pub(crate) fn tool_result_text(tool_name: &str, result: &str) -> String {
    format!("\"type\": \"tool_result\",\n\"tool_name\": {tool_name},\n\"result\": {result}")
}

pub(crate) fn arguments_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_use_the_summary_format() {
        let err = LlmError::Api {
            status: StatusCode::UNAUTHORIZED,
            body: r#"{"error":{"message":"Incorrect API key provided"}}"#.to_string(),
        };
        assert_eq!(
            err.to_string(),
            "API Error (401 Unauthorized): Incorrect API key provided"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        let limited = LlmError::Api {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: String::new(),
        };
        let overloaded = LlmError::Api {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(limited.is_transient());
        assert!(overloaded.is_transient());
        assert!(!LlmError::MissingCredential(LlmService::Claude).is_transient());
    }

    #[test]
    fn settings_treat_blank_keys_as_missing() {
        let settings =
            ProviderSettings::new(reqwest::Client::new(), "https://api.example.com/", "m");
        assert_eq!(settings.base_url, "https://api.example.com");
        settings.set_api_key("   ");
        assert!(matches!(
            settings.api_key(LlmService::OpenAi),
            Err(LlmError::MissingCredential(LlmService::OpenAi))
        ));
        settings.set_api_key(" sk-test ");
        assert_eq!(settings.api_key(LlmService::OpenAi).unwrap(), "sk-test");
    }
}
