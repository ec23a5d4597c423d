use super::stores::{MemoryItem, MemoryStore};
use super::{error_outcome, int_arg, json_outcome, string_arg, success_outcome, LocalTool};
use crate::mcp::permissions::PermissionGate;
use crate::mcp::tool::ToolCallOutcome;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MemoryResult {
    memory_list: Vec<MemoryItem>,
}

pub struct AddMemoryTool {
    store: Arc<dyn MemoryStore>,
}

impl AddMemoryTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LocalTool for AddMemoryTool {
    fn name(&self) -> &'static str {
        "add-memory"
    }

    fn description(&self) -> &'static str {
        "Add a new memory item to the memory database."
    }

    fn properties(&self) -> Value {
        json!({
            "content": {"type": "string", "description": "The full text content of the memory to store."},
            "tags": {"type": "string", "description": "Comma-separated keywords used to categorize and retrieve the memory. Optional."}
        })
    }

    fn required_properties(&self) -> &'static [&'static str] {
        &["content"]
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        _gate: &PermissionGate,
    ) -> ToolCallOutcome {
        let content = string_arg(arguments, "content").unwrap_or_default();
        if content.is_empty() {
            return error_outcome("Memory content is empty.");
        }
        let tags = string_arg(arguments, "tags");
        let id = self.store.insert(&content, tags.as_deref());
        success_outcome(format!("Memory {id} ({content}) has been added."))
    }
}

pub struct SearchMemoryTool {
    store: Arc<dyn MemoryStore>,
}

impl SearchMemoryTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LocalTool for SearchMemoryTool {
    fn name(&self) -> &'static str {
        "search-memory"
    }

    fn description(&self) -> &'static str {
        "Search memory items using keyword-based matching."
    }

    fn properties(&self) -> Value {
        json!({
            "keyword": {"type": "string", "description": "Keyword to search for in memory content or tags."}
        })
    }

    fn required_properties(&self) -> &'static [&'static str] {
        &["keyword"]
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        _gate: &PermissionGate,
    ) -> ToolCallOutcome {
        let keyword = string_arg(arguments, "keyword").unwrap_or_default();
        if keyword.is_empty() {
            return error_outcome("Keyword is empty.");
        }
        let memory_list = self.store.search(&keyword);
        if memory_list.is_empty() {
            return error_outcome("Memory is empty.");
        }
        json_outcome(&MemoryResult { memory_list })
    }
}

pub struct GetAllMemoryTool {
    store: Arc<dyn MemoryStore>,
}

impl GetAllMemoryTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LocalTool for GetAllMemoryTool {
    fn name(&self) -> &'static str {
        "get-all-memory"
    }

    fn description(&self) -> &'static str {
        "Retrieve the complete list of stored memory items."
    }

    fn properties(&self) -> Value {
        json!({})
    }

    async fn execute(
        &self,
        _arguments: &Map<String, Value>,
        _gate: &PermissionGate,
    ) -> ToolCallOutcome {
        let memory_list = self.store.all();
        if memory_list.is_empty() {
            return error_outcome("Memory is empty.");
        }
        json_outcome(&MemoryResult { memory_list })
    }
}

pub struct UpdateMemoryTool {
    store: Arc<dyn MemoryStore>,
}

impl UpdateMemoryTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LocalTool for UpdateMemoryTool {
    fn name(&self) -> &'static str {
        "update-memory"
    }

    fn description(&self) -> &'static str {
        "Update an existing memory item with new content or tags."
    }

    fn properties(&self) -> Value {
        json!({
            "id": {"type": "integer", "description": "The unique identifier of the memory item to update."},
            "content": {"type": "string", "description": "The new content to replace the existing memory. Optional."},
            "tags": {"type": "string", "description": "The updated comma-separated tags to associate with the memory. Optional."}
        })
    }

    fn required_properties(&self) -> &'static [&'static str] {
        &["id"]
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        _gate: &PermissionGate,
    ) -> ToolCallOutcome {
        let Some(id) = int_arg(arguments, "id") else {
            return error_outcome("id is empty.");
        };
        let content = string_arg(arguments, "content");
        let tags = string_arg(arguments, "tags");
        if content.is_none() && tags.is_none() {
            return error_outcome("content & tags both are empty.");
        }
        if self.store.update(id, content.as_deref(), tags.as_deref()) {
            success_outcome(format!("Memory {id} has been updated."))
        } else {
            error_outcome(format!("Failed to update memory {id}."))
        }
    }
}

pub struct DeleteMemoryTool {
    store: Arc<dyn MemoryStore>,
}

impl DeleteMemoryTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LocalTool for DeleteMemoryTool {
    fn name(&self) -> &'static str {
        "delete-memory"
    }

    fn description(&self) -> &'static str {
        "Delete a specific memory entry by its id."
    }

    fn properties(&self) -> Value {
        json!({
            "id": {"type": "integer", "description": "The unique identifier of the memory item to be deleted."}
        })
    }

    fn required_properties(&self) -> &'static [&'static str] {
        &["id"]
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        _gate: &PermissionGate,
    ) -> ToolCallOutcome {
        let Some(id) = int_arg(arguments, "id") else {
            return error_outcome("id is empty.");
        };
        if self.store.delete(id) {
            success_outcome(format!("Memory {id} has been deleted."))
        } else {
            error_outcome(format!("Failed to delete memory {id}."))
        }
    }
}
