use super::{format_rpc_error, format_unexpected_server_message};
use crate::mcp::tool::{PromptDescriptor, ResourceDescriptor, ToolCallOutcome, ToolDescriptor};
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{InitializeResult, ListPromptsResult, ListResourcesResult};
use serde_json::Value;

pub(crate) fn parse_initialize_result(message: ServerMessage) -> Result<InitializeResult, String> {
    let value = parse_response_value(message)?;
    let result =
        serde_json::from_value::<InitializeResult>(value).map_err(|err| err.to_string())?;
    if result.protocol_version.trim().is_empty() {
        return Err("Unexpected initialize response.".to_string());
    }
    Ok(result)
}

/// Returns one page of tools plus the cursor for the next page.
pub(crate) fn parse_tool_page(
    message: ServerMessage,
) -> Result<(Vec<ToolDescriptor>, Option<String>), String> {
    let value = parse_response_value(message)?;
    let tools = value
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| "Malformed tools/list response.".to_string())?
        .iter()
        .filter_map(ToolDescriptor::from_value)
        .collect();
    let next_cursor = value
        .get("nextCursor")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok((tools, next_cursor))
}

pub(crate) fn parse_prompts(message: ServerMessage) -> Result<Vec<PromptDescriptor>, String> {
    let list: ListPromptsResult = parse_response(message)?;
    Ok(list
        .prompts
        .into_iter()
        .map(|prompt| PromptDescriptor {
            name: prompt.name,
            description: prompt.description,
        })
        .collect())
}

pub(crate) fn parse_resources(message: ServerMessage) -> Result<Vec<ResourceDescriptor>, String> {
    let list: ListResourcesResult = parse_response(message)?;
    Ok(list
        .resources
        .into_iter()
        .map(|resource| ResourceDescriptor {
            uri: resource.uri,
            name: resource.name,
        })
        .collect())
}

pub(crate) fn parse_call_tool(message: ServerMessage) -> Result<ToolCallOutcome, String> {
    let value = parse_response_value(message)?;
    Ok(ToolCallOutcome::from_result_value(&value))
}

fn parse_response<T: serde::de::DeserializeOwned>(message: ServerMessage) -> Result<T, String> {
    let value = parse_response_value(message)?;
    serde_json::from_value::<T>(value).map_err(|err| err.to_string())
}

pub(crate) fn parse_response_value(message: ServerMessage) -> Result<Value, String> {
    match message {
        ServerMessage::Response(response) => {
            serde_json::to_value(&response.result).map_err(|err| err.to_string())
        }
        ServerMessage::Error(error) => Err(format_rpc_error(&error.error)),
        other => Err(format_unexpected_server_message(&other)),
    }
}
