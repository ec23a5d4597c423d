use super::stores::{Dialer, NotificationFeed};
use super::{error_outcome, json_outcome, string_arg, LocalTool};
use crate::mcp::permissions::{PermissionAction, PermissionGate, CALL_PHONE, NOTIFICATION_ACCESS};
use crate::mcp::tool::ToolCallOutcome;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

/// Settings target offered when notification access is missing.
pub const NOTIFICATION_LISTENER_SETTINGS: &str = "notification-listener-settings";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PhoneCallResult {
    phone_number: String,
    call_result: bool,
}

pub struct PhoneCallTool {
    dialer: Arc<dyn Dialer>,
}

impl PhoneCallTool {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self { dialer }
    }
}

#[async_trait]
impl LocalTool for PhoneCallTool {
    fn name(&self) -> &'static str {
        "phone-call-tool"
    }

    fn description(&self) -> &'static str {
        "Make a phone call to requested number"
    }

    fn properties(&self) -> Value {
        json!({
            "number": {"type": "string", "description": "The number to call"}
        })
    }

    fn required_properties(&self) -> &'static [&'static str] {
        &["number"]
    }

    fn required_permissions(&self) -> &'static [&'static str] {
        &[CALL_PHONE]
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        _gate: &PermissionGate,
    ) -> ToolCallOutcome {
        let number = string_arg(arguments, "number")
            .unwrap_or_default()
            .to_lowercase();
        match self.dialer.dial(&number) {
            Ok(()) => {
                info!(number = %number, "Placed phone call");
                json_outcome(&PhoneCallResult {
                    phone_number: number,
                    call_result: true,
                })
            }
            Err(err) => error_outcome(format!("Make call failed due to {err}")),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationResult {
    notification_list: Vec<NotificationItem>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationItem {
    id: i64,
    title: String,
    text: String,
    sub_text: Option<String>,
    package_name: String,
    app_name: String,
    datetime: String,
}

pub struct NotificationReadTool {
    feed: Arc<dyn NotificationFeed>,
}

impl NotificationReadTool {
    pub fn new(feed: Arc<dyn NotificationFeed>) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl LocalTool for NotificationReadTool {
    fn name(&self) -> &'static str {
        "notification-read-tool"
    }

    fn description(&self) -> &'static str {
        "Get Notification List from the system"
    }

    fn properties(&self) -> Value {
        json!({
            "appName": {"type": "string", "description": "(optional) app name to filter"},
            "content": {"type": "string", "description": "(optional) notification content to filter"}
        })
    }

    /// Notification access is a settings toggle, not a runtime permission.
    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        gate: &PermissionGate,
    ) -> ToolCallOutcome {
        if !gate.is_granted(NOTIFICATION_ACCESS) {
            gate.request_custom_permission(
                "Notification Read Permission is required.",
                Some(PermissionAction::new(
                    "Open notification access settings",
                    NOTIFICATION_LISTENER_SETTINGS,
                )),
            );
            return error_outcome("Notification Read Permission is not granted.");
        }

        let app_name = string_arg(arguments, "appName");
        let content = string_arg(arguments, "content");
        let notification_list: Vec<NotificationItem> = self
            .feed
            .search(app_name.as_deref(), content.as_deref())
            .into_iter()
            .map(|entry| NotificationItem {
                id: entry.id,
                title: entry.title,
                text: entry.text,
                sub_text: entry.sub_text,
                package_name: entry.package_name,
                app_name: entry.app_name,
                datetime: entry.posted_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();

        if notification_list.is_empty() {
            return error_outcome("Notification List is empty.");
        }
        json_outcome(&NotificationResult { notification_list })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::local::invoke;
    use crate::mcp::local::stores::{InMemoryNotifications, RecordingDialer, UserNotification};
    use crate::mcp::permissions::PermissionRequestHandler;
    use chrono::{Local, TimeZone};
    use std::sync::Mutex;

    #[derive(Default)]
    struct GuideRecorder {
        guides: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PermissionRequestHandler for GuideRecorder {
        async fn on_request_permission(&self, _permissions: &[String]) -> bool {
            false
        }

        fn on_request_custom_permission(
            &self,
            guide_text: &str,
            _action: Option<&PermissionAction>,
        ) {
            self.guides.lock().unwrap().push(guide_text.to_string());
        }
    }

    #[tokio::test]
    async fn phone_call_reports_success_payload() {
        let dialer = Arc::new(RecordingDialer::default());
        let gate = PermissionGate::new();
        gate.grant(CALL_PHONE);
        let mut arguments = Map::new();
        arguments.insert("number".to_string(), json!("123"));

        let outcome = invoke(&PhoneCallTool::new(dialer.clone()), &arguments, &gate).await;

        let payload: Value = serde_json::from_str(&outcome.text).unwrap();
        assert_eq!(payload, json!({"phoneNumber": "123", "callResult": true}));
        assert_eq!(dialer.dialed(), vec!["123".to_string()]);
    }

    #[tokio::test]
    async fn notification_read_without_access_asks_for_settings() {
        let gate = PermissionGate::new();
        let recorder = Arc::new(GuideRecorder::default());
        gate.attach(recorder.clone());
        let tool = NotificationReadTool::new(Arc::new(InMemoryNotifications::default()));

        let outcome = invoke(&tool, &Map::new(), &gate).await;

        assert!(outcome.is_error);
        assert!(outcome
            .text
            .contains("Notification Read Permission is not granted."));
        assert_eq!(
            recorder.guides.lock().unwrap().as_slice(),
            &["Notification Read Permission is required.".to_string()]
        );
    }

    #[tokio::test]
    async fn notification_read_filters_by_app() {
        let feed = Arc::new(InMemoryNotifications::default());
        let posted_at = Local.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        for (app, text) in [("Messages", "Lunch?"), ("Mail", "Invoice")] {
            feed.push(UserNotification {
                id: 0,
                title: app.to_string(),
                text: text.to_string(),
                sub_text: None,
                package_name: format!("com.example.{}", app.to_lowercase()),
                app_name: app.to_string(),
                posted_at,
            });
        }
        let gate = PermissionGate::new();
        gate.grant(NOTIFICATION_ACCESS);
        let mut arguments = Map::new();
        arguments.insert("appName".to_string(), json!("Mail"));

        let outcome = invoke(&NotificationReadTool::new(feed), &arguments, &gate).await;

        let payload: Value = serde_json::from_str(&outcome.text).unwrap();
        let list = payload["notificationList"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["text"], "Invoice");
        assert_eq!(list[0]["datetime"], "2024-03-01 09:30:00");
    }
}
