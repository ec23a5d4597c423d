use super::{
    arguments_object, send_json, ConversationEntry, LlmAdapter, LlmError, LlmService,
    ProviderSettings, ResponseFragment, ToolUse,
};
use crate::api::openai::{
    ChatCompletion, ChatMessage, ChatRequest, ChatToolCall, ChatToolCallFunction,
    ChatToolDefinition, ChatToolFunction,
};
use crate::core::message::Role;
use crate::mcp::tool::ToolDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_COMPLETION_TOKENS: u32 = 2048;

pub struct OpenAiAdapter {
    settings: ProviderSettings,
}

impl OpenAiAdapter {
    pub fn new(http: reqwest::Client, model: &str) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL, model)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            settings: ProviderSettings::new(http, base_url, model),
        }
    }
}

/// Closes the top-level object schema to undeclared properties.
fn function_parameters(tool: &ToolDescriptor) -> Value {
    let mut schema = tool.input_schema.clone();
    if let Some(object) = schema.as_object_mut() {
        object
            .entry("type")
            .or_insert_with(|| Value::String("object".to_string()));
        object
            .entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
        object.insert("additionalProperties".to_string(), Value::Bool(false));
    }
    schema
}

pub fn build_request(
    model: &str,
    system_prompt: &str,
    entries: &[ConversationEntry],
    tools: &[ToolDescriptor],
) -> ChatRequest {
    let mut messages = Vec::new();
    if !system_prompt.trim().is_empty() {
        messages.push(ChatMessage::text("system", system_prompt));
    }

    for entry in entries {
        match entry {
            ConversationEntry::Message(item) => {
                let role = match item.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                messages.push(ChatMessage::text(role, item.text.clone()));
            }
            ConversationEntry::ToolRound { text, exchanges } => {
                messages.push(ChatMessage {
                    role: "assistant".to_string(),
                    content: text.clone().filter(|text| !text.is_empty()),
                    tool_call_id: None,
                    tool_calls: Some(
                        exchanges
                            .iter()
                            .map(|exchange| ChatToolCall {
                                id: exchange.call.id.clone(),
                                kind: "function".to_string(),
                                function: ChatToolCallFunction {
                                    name: exchange.call.name.clone(),
                                    arguments: Value::Object(exchange.call.arguments.clone())
                                        .to_string(),
                                },
                            })
                            .collect(),
                    ),
                });
                for exchange in exchanges {
                    messages.push(ChatMessage {
                        role: "tool".to_string(),
                        content: Some(exchange.result.clone()),
                        tool_call_id: Some(exchange.call.id.clone()),
                        tool_calls: None,
                    });
                }
            }
        }
    }

    let tools = (!tools.is_empty()).then(|| {
        tools
            .iter()
            .map(|tool| ChatToolDefinition {
                kind: "function".to_string(),
                function: ChatToolFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: function_parameters(tool),
                },
            })
            .collect()
    });

    ChatRequest {
        model: model.to_string(),
        messages,
        max_completion_tokens: MAX_COMPLETION_TOKENS,
        tools,
    }
}

pub fn parse_response(completion: ChatCompletion) -> Result<Vec<ResponseFragment>, LlmError> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Decode("response has no choices".to_string()))?;
    debug!(finish_reason = ?choice.finish_reason, "OpenAI response received");

    let mut fragments = Vec::new();
    if let Some(content) = choice.message.content.filter(|content| !content.is_empty()) {
        fragments.push(ResponseFragment::Text(content));
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        let arguments = match serde_json::from_str::<Value>(&call.function.arguments) {
            Ok(value) => arguments_object(value),
            Err(err) => {
                warn!(
                    tool = %call.function.name,
                    error = %err,
                    "Tool call arguments are not valid JSON"
                );
                Default::default()
            }
        };
        fragments.push(ResponseFragment::ToolUse(ToolUse {
            id: call.id,
            name: call.function.name,
            arguments,
        }));
    }
    Ok(fragments)
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    fn service(&self) -> LlmService {
        LlmService::OpenAi
    }

    fn set_credential(&self, key: &str) {
        self.settings.set_api_key(key);
    }

    fn set_model(&self, model_id: &str) {
        self.settings.set_model(model_id);
    }

    fn model(&self) -> String {
        self.settings.model()
    }

    async fn complete(
        &self,
        system_prompt: &str,
        entries: &[ConversationEntry],
        tools: &[ToolDescriptor],
    ) -> Result<Vec<ResponseFragment>, LlmError> {
        let api_key = self.settings.api_key(LlmService::OpenAi)?;
        let model = self.settings.model();
        let body = build_request(&model, system_prompt, entries, tools);
        debug!(model = %model, messages = body.messages.len(), "Sending OpenAI request");

        let request = self
            .settings
            .http
            .post(format!("{}/chat/completions", self.settings.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body);
        let completion: ChatCompletion = send_json(request).await?;
        parse_response(completion)
    }
}
