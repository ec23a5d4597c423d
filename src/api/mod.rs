//! Wire payloads for the supported LLM vendors.

pub mod claude;
pub mod gemini;
pub mod openai;

use reqwest::StatusCode;

/// Pulls a one-line message out of a vendor error body.
pub fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}

/// Formats a failed API response as `API Error (<status>): <message>`.
pub fn format_api_error(status: StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    let detail = serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .unwrap_or_else(|| {
            if trimmed.is_empty() {
                "<empty>".to_string()
            } else {
                trimmed.to_string()
            }
        });
    format!("API Error ({status}): {detail}")
}
