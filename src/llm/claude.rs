use super::{
    arguments_object, send_json, tool_result_text, ConversationEntry, LlmAdapter, LlmError,
    LlmService, ProviderSettings, ResponseFragment, ToolUse,
};
use crate::api::claude::{
    ClaudeMessage, ClaudeTool, ContentBlock, MessagesRequest, MessagesResponse, ANTHROPIC_VERSION,
};
use crate::core::message::Role;
use crate::mcp::tool::ToolDescriptor;
use async_trait::async_trait;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const MAX_TOKENS: u32 = 8192;

pub struct ClaudeAdapter {
    settings: ProviderSettings,
}

impl ClaudeAdapter {
    pub fn new(http: reqwest::Client, model: &str) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL, model)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            settings: ProviderSettings::new(http, base_url, model),
        }
    }
}

pub fn build_request(
    model: &str,
    system_prompt: &str,
    entries: &[ConversationEntry],
    tools: &[ToolDescriptor],
) -> MessagesRequest {
    let mut messages = Vec::new();
    for entry in entries {
        match entry {
            ConversationEntry::Message(item) => messages.push(ClaudeMessage {
                role: match item.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                }
                .to_string(),
                content: item.text.clone(),
            }),
            ConversationEntry::ToolRound { text, exchanges } => {
                if let Some(text) = text.as_deref().filter(|text| !text.trim().is_empty()) {
                    messages.push(ClaudeMessage {
                        role: "assistant".to_string(),
                        content: text.to_string(),
                    });
                }
                for exchange in exchanges {
                    messages.push(ClaudeMessage {
                        role: "user".to_string(),
                        content: tool_result_text(&exchange.call.name, &exchange.result),
                    });
                }
            }
        }
    }

    MessagesRequest {
        model: model.to_string(),
        max_tokens: MAX_TOKENS,
        system: (!system_prompt.trim().is_empty()).then(|| system_prompt.to_string()),
        messages,
        tools: tools
            .iter()
            .map(|tool| ClaudeTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema.clone(),
            })
            .collect(),
    }
}

pub fn parse_response(response: MessagesResponse) -> Vec<ResponseFragment> {
    response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(ResponseFragment::Text(text)),
            ContentBlock::Thinking { thinking } => Some(ResponseFragment::Thinking(thinking)),
            ContentBlock::RedactedThinking { data } => Some(ResponseFragment::Thinking(data)),
            ContentBlock::ToolUse { id, name, input } => Some(ResponseFragment::ToolUse(ToolUse {
                id,
                name,
                arguments: arguments_object(input),
            })),
            ContentBlock::Unknown => None,
        })
        .collect()
}

#[async_trait]
impl LlmAdapter for ClaudeAdapter {
    fn service(&self) -> LlmService {
        LlmService::Claude
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
        let api_key = self.settings.api_key(LlmService::Claude)?;
        let model = self.settings.model();
        let body = build_request(&model, system_prompt, entries, tools);
        debug!(
            model = %model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "Sending Claude request"
        );

        let request = self
            .settings
            .http
            .post(format!("{}/messages", self.settings.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let response: MessagesResponse = send_json(request).await?;
        debug!(stop_reason = ?response.stop_reason, "Claude response received");
        Ok(parse_response(response))
    }
}
