//! In-process duplex byte pipe linking the local MCP server to its client.
//!
//! Each [`BridgeEnd`] owns the read half of one direction and the write half
//! of the other: bytes written by the server end are read by the client end
//! and vice versa. Dropping or shutting down a writer is observed as EOF on
//! the opposite reader.

use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::oneshot;

/// Per-direction buffer; writers wait when it is full.
pub const BRIDGE_BUFFER_BYTES: usize = 64 * 1024;

pub struct BridgeEnd {
    pub reader: ReadHalf<DuplexStream>,
    pub writer: WriteHalf<DuplexStream>,
}

impl BridgeEnd {
    fn from_stream(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self { reader, writer }
    }
}

/// The two ends of a local link.
pub struct LocalBridge {
    pub server: BridgeEnd,
    pub client: BridgeEnd,
}

impl LocalBridge {
    pub fn new() -> Self {
        let (server, client) = tokio::io::duplex(BRIDGE_BUFFER_BYTES);
        Self {
            server: BridgeEnd::from_stream(server),
            client: BridgeEnd::from_stream(client),
        }
    }
}

impl Default for LocalBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot readiness handshake between a listener and the connecting side.
pub fn readiness() -> (ReadySignal, oneshot::Receiver<()>) {
    let (tx, rx) = oneshot::channel();
    (ReadySignal(Some(tx)), rx)
}

pub struct ReadySignal(Option<oneshot::Sender<()>>);

impl ReadySignal {
    pub fn notify(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}
