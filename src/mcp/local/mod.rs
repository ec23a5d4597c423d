//! The in-process MCP server and the tools it exposes.

use crate::mcp::permissions::PermissionGate;
use crate::mcp::tool::{ToolCallOutcome, ToolDescriptor};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

pub mod contacts;
pub mod device;
pub mod memory;
pub mod server;
pub mod stores;

#[cfg(test)]
mod tests;

pub use server::LocalServer;
pub use stores::LocalServices;

/// A tool served by the local MCP server.
#[async_trait]
pub trait LocalTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON-schema `properties` object.
    fn properties(&self) -> Value;

    fn required_properties(&self) -> &'static [&'static str] {
        &[]
    }

    fn required_permissions(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, arguments: &Map<String, Value>, gate: &PermissionGate)
        -> ToolCallOutcome;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            self.name(),
            self.description(),
            self.properties(),
            self.required_properties(),
        )
    }
}

/// Runs a tool: required arguments are checked first, then permissions,
/// and only then the tool body.
pub async fn invoke(
    tool: &dyn LocalTool,
    arguments: &Map<String, Value>,
    gate: &PermissionGate,
) -> ToolCallOutcome {
    let missing_arguments: Vec<&str> = tool
        .required_properties()
        .iter()
        .copied()
        .filter(|name| arguments.get(*name).map_or(true, Value::is_null))
        .collect();
    if !missing_arguments.is_empty() {
        debug!(tool = %tool.name(), missing = ?missing_arguments, "Rejecting local tool call");
        return error_outcome(format!(
            "Parameter {} is required.",
            missing_arguments.join(", ")
        ));
    }

    let missing_permissions = gate.missing(tool.required_permissions());
    if !missing_permissions.is_empty() && !gate.request(&missing_permissions).await {
        return error_outcome(format!(
            "Permission {} is not granted.",
            missing_permissions.join(", ")
        ));
    }

    tool.execute(arguments, gate).await
}

/// Every tool the local server offers, over the given backing stores.
pub fn default_tools(services: &LocalServices) -> Vec<Arc<dyn LocalTool>> {
    vec![
        Arc::new(contacts::ContactListTool::new(services.contacts.clone())),
        Arc::new(contacts::ContactDetailTool::new(services.contacts.clone())),
        Arc::new(contacts::AddContactTool::new(services.contacts.clone())),
        Arc::new(contacts::RemoveContactTool::new(services.contacts.clone())),
        Arc::new(device::PhoneCallTool::new(services.dialer.clone())),
        Arc::new(device::NotificationReadTool::new(services.notifications.clone())),
        Arc::new(memory::AddMemoryTool::new(services.memory.clone())),
        Arc::new(memory::SearchMemoryTool::new(services.memory.clone())),
        Arc::new(memory::GetAllMemoryTool::new(services.memory.clone())),
        Arc::new(memory::UpdateMemoryTool::new(services.memory.clone())),
        Arc::new(memory::DeleteMemoryTool::new(services.memory.clone())),
    ]
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommonError<'a> {
    is_succeed: bool,
    error_message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommonSuccess<'a> {
    is_succeed: bool,
    message: &'a str,
}

pub fn error_outcome(message: impl AsRef<str>) -> ToolCallOutcome {
    let payload = CommonError {
        is_succeed: false,
        error_message: message.as_ref(),
    };
    ToolCallOutcome::failure(serde_json::to_string(&payload).unwrap_or_default())
}

pub fn success_outcome(message: impl AsRef<str>) -> ToolCallOutcome {
    let payload = CommonSuccess {
        is_succeed: true,
        message: message.as_ref(),
    };
    ToolCallOutcome::success(serde_json::to_string(&payload).unwrap_or_default())
}

pub fn json_outcome<T: Serialize>(payload: &T) -> ToolCallOutcome {
    match serde_json::to_string(payload) {
        Ok(text) => ToolCallOutcome::success(text),
        Err(err) => error_outcome(format!("Failed to encode tool result: {err}")),
    }
}

/// String argument; numbers and booleans are accepted in their text form.
pub fn string_arg(arguments: &Map<String, Value>, key: &str) -> Option<String> {
    match arguments.get(key)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

pub fn int_arg(arguments: &Map<String, Value>, key: &str) -> Option<i64> {
    match arguments.get(key)? {
        Value::Number(value) => value.as_i64(),
        Value::String(value) => value.trim().parse().ok(),
        _ => None,
    }
}
