//! Remote MCP over the legacy SSE transport: a long-lived `GET {url}/sse`
//! event stream carries server messages, and every client message is a
//! separate POST to the endpoint announced by the first `endpoint` event.

use super::OutboundChannel;
use crate::mcp::client::{dispatch_message, McpClient, PendingRequests};
use async_trait::async_trait;
use futures_util::StreamExt;
use memchr::memchr;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use rust_mcp_schema::schema_utils::ServerMessage;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser tolerant of arbitrary chunking.
#[derive(Default)]
pub struct SseEventParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseEventParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut start = 0;
        while let Some(relative) = memchr(b'\n', &self.buffer[start..]) {
            let newline = start + relative;
            let mut end = newline;
            if end > start && self.buffer[end - 1] == b'\r' {
                end -= 1;
            }
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            self.process_line(&line, &mut events);
            start = newline + 1;
        }
        if start > 0 {
            self.buffer.drain(..start);
        }
        events
    }

    /// Flushes a trailing line and any event not terminated by a blank line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            self.process_line(&line, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self, events: &mut Vec<SseEvent>) {
        if self.data.is_empty() && self.event.is_none() {
            return;
        }
        events.push(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        });
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

/// Resolves the `endpoint` event payload against the connection's base URL.
pub fn resolve_endpoint(base_url: &str, data: &str) -> String {
    let data = data.trim();
    if data.starts_with("http://") || data.starts_with("https://") {
        return data.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        data.trim_start_matches('/')
    )
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| format!("Invalid header name {name}: {err}"))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| format!("Invalid value for header {name}: {err}"))?;
        map.insert(name, value);
    }
    Ok(map)
}

struct SsePostChannel {
    http: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    listener: AbortHandle,
}

#[async_trait]
impl OutboundChannel for SsePostChannel {
    async fn send(&self, payload: String) -> Result<(), String> {
        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status.as_u16(), body.trim()));
        }
        Ok(())
    }

    async fn close(&self) {
        self.listener.abort();
    }
}

/// Opens the event stream, waits for the endpoint announcement and returns a
/// client whose requests are POSTed to it.
pub async fn connect(
    connection: &str,
    http: &reqwest::Client,
    base_url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<Arc<McpClient>, String> {
    let headers = header_map(headers)?;
    let sse_url = format!("{}/sse", base_url.trim_end_matches('/'));
    debug!(connection = %connection, url = %sse_url, "Opening MCP SSE stream");

    let response = http
        .get(&sse_url)
        .headers(headers.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|err| err.to_string())?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(format!(
            "Authentication required by {} (HTTP {}).",
            sse_url,
            status.as_u16()
        ));
    }
    if !status.is_success() {
        return Err(format!("HTTP {} opening {}", status.as_u16(), sse_url));
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !is_event_stream_content_type(content_type) {
        return Err(format!("Expected an event stream from {sse_url}, got {content_type:?}."));
    }

    let pending = PendingRequests::default();
    let (endpoint_tx, endpoint_rx) = oneshot::channel();
    let listener = spawn_listener(
        connection.to_string(),
        base_url.to_string(),
        response,
        pending.clone(),
        endpoint_tx,
    );

    let endpoint = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
        Ok(Ok(endpoint)) => endpoint,
        Ok(Err(_)) => {
            listener.abort();
            return Err("MCP SSE stream closed before announcing an endpoint.".to_string());
        }
        Err(_) => {
            listener.abort();
            return Err("Timed out waiting for the MCP SSE endpoint event.".to_string());
        }
    };
    debug!(connection = %connection, endpoint = %endpoint, "MCP SSE endpoint announced");

    let channel = SsePostChannel {
        http: http.clone(),
        endpoint,
        headers,
        listener: listener.clone(),
    };
    Ok(McpClient::from_parts(
        connection.to_string(),
        Box::new(channel),
        pending,
        Some(listener),
    ))
}

fn spawn_listener(
    connection: String,
    base_url: String,
    response: reqwest::Response,
    pending: PendingRequests,
    endpoint_tx: oneshot::Sender<String>,
) -> AbortHandle {
    let task = tokio::spawn(async move {
        let mut endpoint_tx = Some(endpoint_tx);
        let mut parser = SseEventParser::default();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(connection = %connection, error = %err, "MCP SSE stream failed");
                    break;
                }
            };
            for event in parser.push(&chunk) {
                handle_event(&connection, &base_url, event, &pending, &mut endpoint_tx).await;
            }
        }
        for event in parser.finish() {
            handle_event(&connection, &base_url, event, &pending, &mut endpoint_tx).await;
        }

        debug!(connection = %connection, "MCP SSE stream ended");
        pending.lock().await.clear();
    });
    task.abort_handle()
}

async fn handle_event(
    connection: &str,
    base_url: &str,
    event: SseEvent,
    pending: &PendingRequests,
    endpoint_tx: &mut Option<oneshot::Sender<String>>,
) {
    match event.event.as_deref() {
        Some("endpoint") => {
            if let Some(tx) = endpoint_tx.take() {
                let _ = tx.send(resolve_endpoint(base_url, &event.data));
            }
        }
        Some("error") => {
            warn!(connection = %connection, data = %event.data, "MCP SSE error event");
        }
        Some("open") => {}
        _ => {
            if event.data.trim().is_empty() {
                return;
            }
            match serde_json::from_str::<ServerMessage>(&event.data) {
                Ok(message) => dispatch_message(pending, message, connection).await,
                Err(err) => {
                    debug!(
                        connection = %connection,
                        error = %err,
                        "Ignoring malformed MCP SSE event"
                    )
                }
            }
        }
    }
}
