use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

pub const READ_CONTACTS: &str = "READ_CONTACTS";
pub const WRITE_CONTACTS: &str = "WRITE_CONTACTS";
pub const CALL_PHONE: &str = "CALL_PHONE";
/// Granted only through a settings screen, never through a runtime prompt.
pub const NOTIFICATION_ACCESS: &str = "NOTIFICATION_ACCESS";

/// A settings destination the UI can offer alongside a custom permission guide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionAction {
    pub label: String,
    pub target: String,
}

impl PermissionAction {
    pub fn new(label: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target: target.into(),
        }
    }
}

/// Implemented by whichever UI surface is currently visible.
#[async_trait]
pub trait PermissionRequestHandler: Send + Sync {
    async fn on_request_permission(&self, permissions: &[String]) -> bool;

    fn on_request_custom_permission(&self, guide_text: &str, action: Option<&PermissionAction>);
}

/// Mediates permission requests between tool execution and the UI.
///
/// Without an attached handler, `request` denies and
/// `request_custom_permission` does nothing.
#[derive(Default)]
pub struct PermissionGate {
    handler: RwLock<Option<Arc<dyn PermissionRequestHandler>>>,
    granted: Mutex<BTreeSet<String>>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, handler: Arc<dyn PermissionRequestHandler>) {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn detach(&self) {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_handler(&self) -> bool {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn current_handler(&self) -> Option<Arc<dyn PermissionRequestHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_granted(&self, permission: &str) -> bool {
        self.granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(permission)
    }

    pub fn grant(&self, permission: impl Into<String>) {
        self.granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(permission.into());
    }

    pub fn revoke(&self, permission: &str) {
        self.granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(permission);
    }

    /// The subset of `required` not granted yet, in input order.
    pub fn missing(&self, required: &[&str]) -> Vec<String> {
        let granted = self.granted.lock().unwrap_or_else(PoisonError::into_inner);
        required
            .iter()
            .filter(|permission| !granted.contains(**permission))
            .map(|permission| permission.to_string())
            .collect()
    }

    /// Asks the attached handler for `permissions` and records them when
    /// approved.
    pub async fn request(&self, permissions: &[String]) -> bool {
        if permissions.is_empty() {
            return true;
        }
        let Some(handler) = self.current_handler() else {
            debug!(permissions = ?permissions, "Permission request denied: no handler attached");
            return false;
        };
        let approved = handler.on_request_permission(permissions).await;
        debug!(permissions = ?permissions, approved, "Permission request answered");
        if approved {
            let mut granted = self.granted.lock().unwrap_or_else(PoisonError::into_inner);
            granted.extend(permissions.iter().cloned());
        }
        approved
    }

    pub fn request_custom_permission(&self, guide_text: &str, action: Option<PermissionAction>) {
        match self.current_handler() {
            Some(handler) => handler.on_request_custom_permission(guide_text, action.as_ref()),
            None => debug!(
                guide = %guide_text,
                "Custom permission request dropped: no handler attached"
            ),
        }
    }
}
