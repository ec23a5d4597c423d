//! Shared MCP transport abstractions.
//!
//! A transport is split in two: inbound messages are read by a background
//! task that feeds the client's pending-request map, and outbound messages go
//! through an [`OutboundChannel`]. The local bridge writes JSON lines; the
//! remote SSE transport POSTs each message.

use async_trait::async_trait;
use rust_mcp_schema::schema_utils::ServerMessage;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

pub mod sse;

/// JSON-RPC code used by servers to indicate unsupported methods.
pub const MCP_METHOD_NOT_FOUND: i64 = -32601;

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
/// Client-to-server half of a transport.
pub trait OutboundChannel: Send + Sync {
    async fn send(&self, payload: String) -> Result<(), String>;

    /// Closes the outbound direction. Further sends fail.
    async fn close(&self);
}

/// Writes one JSON message per line to an async byte sink.
pub struct LineChannel<W> {
    writer: Mutex<Option<W>>,
}

impl<W> LineChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
        }
    }
}

#[async_trait]
impl<W> OutboundChannel for LineChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, payload: String) -> Result<(), String> {
        let mut guard = tokio::time::timeout(WRITE_TIMEOUT, self.writer.lock())
            .await
            .map_err(|_| "Timed out waiting for MCP writer lock.".to_string())?;
        let Some(writer) = guard.as_mut() else {
            return Err("MCP connection closed.".to_string());
        };

        let mut line = payload.into_bytes();
        line.push(b'\n');
        tokio::time::timeout(WRITE_TIMEOUT, writer.write_all(&line))
            .await
            .map_err(|_| "Timed out writing MCP message.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(WRITE_TIMEOUT, writer.flush())
            .await
            .map_err(|_| "Timed out flushing MCP message.".to_string())?
            .map_err(|err| err.to_string())
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

/// Returns true when a server reports the JSON-RPC method-not-found code.
pub fn is_method_not_found(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::Error(error) if error.error.code == MCP_METHOD_NOT_FOUND
    )
}
