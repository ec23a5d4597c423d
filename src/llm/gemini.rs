use super::{
    arguments_object, send_json, ConversationEntry, LlmAdapter, LlmError, LlmService,
    ProviderSettings, ResponseFragment, ToolUse,
};
use crate::api::gemini::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GeminiTool,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part,
};
use crate::core::message::Role;
use crate::mcp::tool::ToolDescriptor;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const TEMPERATURE: f32 = 0.7;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Schema keywords the function-declaration dialect understands.
const SCHEMA_KEYS: &[&str] = &["type", "description", "enum", "format", "nullable", "required"];

pub struct GeminiAdapter {
    settings: ProviderSettings,
}

impl GeminiAdapter {
    pub fn new(http: reqwest::Client, model: &str) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL, model)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            settings: ProviderSettings::new(http, base_url, model),
        }
    }
}

/// Reduces a JSON schema to the subset accepted in function declarations.
fn declaration_schema(schema: &Value) -> Value {
    let Some(object) = schema.as_object() else {
        return json!({"type": "string"});
    };

    let mut reduced = Map::new();
    for key in SCHEMA_KEYS {
        if let Some(value) = object.get(*key) {
            reduced.insert((*key).to_string(), value.clone());
        }
    }
    if let Some(items) = object.get("items") {
        reduced.insert("items".to_string(), declaration_schema(items));
    }
    if let Some(Value::Object(properties)) = object.get("properties") {
        let properties: Map<String, Value> = properties
            .iter()
            .map(|(name, property)| (name.clone(), declaration_schema(property)))
            .collect();
        reduced.insert("properties".to_string(), Value::Object(properties));
        reduced
            .entry("type")
            .or_insert_with(|| Value::String("object".to_string()));
    }
    reduced
        .entry("type")
        .or_insert_with(|| Value::String("string".to_string()));
    Value::Object(reduced)
}

fn declaration(tool: &ToolDescriptor) -> FunctionDeclaration {
    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone().unwrap_or_default(),
        parameters: (!tool.properties().is_empty())
            .then(|| declaration_schema(&tool.input_schema)),
    }
}

pub fn build_request(
    system_prompt: &str,
    entries: &[ConversationEntry],
    tools: &[ToolDescriptor],
) -> GenerateContentRequest {
    let mut contents = Vec::new();
    for entry in entries {
        match entry {
            ConversationEntry::Message(item) => contents.push(Content {
                role: Some(
                    match item.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    }
                    .to_string(),
                ),
                parts: vec![Part::text(item.text.clone())],
            }),
            ConversationEntry::ToolRound { text, exchanges } => {
                let mut parts: Vec<Part> = text
                    .iter()
                    .filter(|text| !text.is_empty())
                    .map(|text| Part::text(text.clone()))
                    .collect();
                parts.extend(exchanges.iter().map(|exchange| Part {
                    function_call: Some(FunctionCall {
                        name: exchange.call.name.clone(),
                        args: Value::Object(exchange.call.arguments.clone()),
                    }),
                    ..Part::default()
                }));
                contents.push(Content {
                    role: Some("model".to_string()),
                    parts,
                });
                contents.push(Content {
                    role: Some("user".to_string()),
                    parts: exchanges
                        .iter()
                        .map(|exchange| Part {
                            function_response: Some(FunctionResponse {
                                name: exchange.call.name.clone(),
                                response: json!({"result": exchange.result}),
                            }),
                            ..Part::default()
                        })
                        .collect(),
                });
            }
        }
    }

    GenerateContentRequest {
        contents,
        system_instruction: (!system_prompt.trim().is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(system_prompt)],
        }),
        tools: if tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiTool {
                function_declarations: tools.iter().map(declaration).collect(),
            }]
        },
        generation_config: GenerationConfig {
            temperature: TEMPERATURE,
        },
    }
}

pub fn parse_response(
    response: GenerateContentResponse,
) -> Result<Vec<ResponseFragment>, LlmError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Decode("response has no candidates".to_string()))?;
    let parts = candidate.content.map(|content| content.parts).unwrap_or_default();

    let mut fragments = Vec::new();
    for (index, part) in parts.into_iter().enumerate() {
        if let Some(call) = part.function_call {
            fragments.push(ResponseFragment::ToolUse(ToolUse {
                id: format!("{}-{index}", call.name),
                name: call.name,
                arguments: arguments_object(call.args),
            }));
        } else if let Some(text) = part.text {
            if part.thought == Some(true) {
                fragments.push(ResponseFragment::Thinking(text));
            } else {
                fragments.push(ResponseFragment::Text(text));
            }
        }
    }
    Ok(fragments)
}

#[async_trait]
impl LlmAdapter for GeminiAdapter {
    fn service(&self) -> LlmService {
        LlmService::Gemini
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
        let api_key = self.settings.api_key(LlmService::Gemini)?;
        let model = self.settings.model();
        let body = build_request(system_prompt, entries, tools);
        debug!(model = %model, contents = body.contents.len(), "Sending Gemini request");

        let request = self
            .settings
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.settings.base_url, model
            ))
            .header("x-goog-api-key", api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&body);
        let response: GenerateContentResponse = send_json(request).await?;
        parse_response(response)
    }
}
