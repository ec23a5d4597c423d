use super::stores::{Contact, ContactBook};
use super::{error_outcome, json_outcome, string_arg, success_outcome, LocalTool};
use crate::mcp::permissions::{PermissionGate, READ_CONTACTS, WRITE_CONTACTS};
use crate::mcp::tool::ToolCallOutcome;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContactListResult {
    contact_count: usize,
    contact_list: Vec<Contact>,
}

pub struct ContactListTool {
    book: Arc<dyn ContactBook>,
}

impl ContactListTool {
    pub fn new(book: Arc<dyn ContactBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl LocalTool for ContactListTool {
    fn name(&self) -> &'static str {
        "contact-list-info-tool"
    }

    fn description(&self) -> &'static str {
        "Get Contact List Information that contains phone number"
    }

    fn properties(&self) -> Value {
        json!({})
    }

    fn required_permissions(&self) -> &'static [&'static str] {
        &[READ_CONTACTS]
    }

    async fn execute(
        &self,
        _arguments: &Map<String, Value>,
        _gate: &PermissionGate,
    ) -> ToolCallOutcome {
        let contact_list = self.book.contacts();
        if contact_list.is_empty() {
            return error_outcome("Contact List is empty.");
        }
        json_outcome(&ContactListResult {
            contact_count: contact_list.len(),
            contact_list,
        })
    }
}

pub struct ContactDetailTool {
    book: Arc<dyn ContactBook>,
}

impl ContactDetailTool {
    pub fn new(book: Arc<dyn ContactBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl LocalTool for ContactDetailTool {
    fn name(&self) -> &'static str {
        "contact-detail-info-tool"
    }

    fn description(&self) -> &'static str {
        "Get Detail Contact Information that contains phone number"
    }

    fn properties(&self) -> Value {
        json!({
            "name": {"type": "string", "description": "person name, or person nickname"}
        })
    }

    fn required_properties(&self) -> &'static [&'static str] {
        &["name"]
    }

    fn required_permissions(&self) -> &'static [&'static str] {
        &[READ_CONTACTS]
    }

    /// Exact case-insensitive match first, then every contact whose name
    /// contains the query.
    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        _gate: &PermissionGate,
    ) -> ToolCallOutcome {
        let name = string_arg(arguments, "name")
            .unwrap_or_default()
            .to_lowercase();
        let contacts = self.book.contacts();

        if let Some(exact) = contacts
            .iter()
            .find(|contact| contact.name.to_lowercase() == name)
        {
            return json_outcome(&Contact {
                name: name.clone(),
                phone_number: exact.phone_number.clone(),
            });
        }

        let similar: Vec<&Contact> = contacts
            .iter()
            .filter(|contact| contact.name.to_lowercase().contains(&name))
            .collect();
        if similar.is_empty() {
            return error_outcome(format!("Cannot find contact information for {name}"));
        }
        json_outcome(&similar)
    }
}

pub struct AddContactTool {
    book: Arc<dyn ContactBook>,
}

impl AddContactTool {
    pub fn new(book: Arc<dyn ContactBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl LocalTool for AddContactTool {
    fn name(&self) -> &'static str {
        "add-contact-tool"
    }

    fn description(&self) -> &'static str {
        "Add the Contact Information with name and phone number"
    }

    fn properties(&self) -> Value {
        json!({
            "name": {"type": "string", "description": "person name, or person nickname"},
            "number": {"type": "string", "description": "phone number"}
        })
    }

    fn required_properties(&self) -> &'static [&'static str] {
        &["name", "number"]
    }

    fn required_permissions(&self) -> &'static [&'static str] {
        &[WRITE_CONTACTS]
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        _gate: &PermissionGate,
    ) -> ToolCallOutcome {
        let name = string_arg(arguments, "name").unwrap_or_else(|| "unknown".to_string());
        let number = string_arg(arguments, "number").unwrap_or_else(|| "unknown".to_string());
        if self.book.add(&name, &number) {
            success_outcome(format!("Contact {name} with number {number} has been added."))
        } else {
            error_outcome(format!("Failed to add contact {name} with number {number}."))
        }
    }
}

pub struct RemoveContactTool {
    book: Arc<dyn ContactBook>,
}

impl RemoveContactTool {
    pub fn new(book: Arc<dyn ContactBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl LocalTool for RemoveContactTool {
    fn name(&self) -> &'static str {
        "remove-contact-tool"
    }

    fn description(&self) -> &'static str {
        "Remove the Contact Information"
    }

    fn properties(&self) -> Value {
        json!({
            "name": {"type": "string", "description": "person name, or person nickname who want to remove"},
            "number": {"type": "string", "description": "phone number which want to remove"}
        })
    }

    fn required_permissions(&self) -> &'static [&'static str] {
        &[WRITE_CONTACTS]
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        _gate: &PermissionGate,
    ) -> ToolCallOutcome {
        let name = string_arg(arguments, "name");
        let number = string_arg(arguments, "number");
        let (target, removed) = match (&name, &number) {
            (Some(name), _) => (name, self.book.remove_by_name(name)),
            (None, Some(number)) => (number, self.book.remove_by_number(number)),
            (None, None) => return error_outcome("Contact name or number is required."),
        };
        if removed {
            success_outcome(format!("Contact {target} has been removed."))
        } else {
            error_outcome(format!("Failed to remove contact {target}."))
        }
    }
}
