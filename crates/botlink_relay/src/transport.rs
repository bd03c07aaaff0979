//! Frame transport — opaque payloads and the per-peer write path.
//!
//! The relay never interprets payload contents. A [`Frame`] is either a
//! text or a binary payload; anything else on the wire (ping/pong,
//! close) is transport plumbing and never reaches the fan-out layer.
//!
//! Each accepted connection keeps its WebSocket write half in a dedicated
//! writer task fed by a bounded mpsc queue. Forwarding enqueues without
//! performing network I/O, so a slow peer backs up only its own queue.

use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Type alias for the write half of a server-side WebSocket.
pub(crate) type ServerWsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// An opaque relay payload — text or binary, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text payload (e.g. a comma-delimited control or sensor line).
    Text(String),
    /// A binary payload (e.g. an encoded camera frame).
    Binary(Vec<u8>),
}

impl Frame {
    /// Whether the payload is empty or all whitespace. Blank frames are
    /// dropped by the hub, never forwarded.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Binary(data) => data.iter().all(u8::is_ascii_whitespace),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Whether the payload has zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert an inbound WebSocket message into a frame. Control
    /// messages (ping/pong/close) carry no relay payload and yield `None`.
    pub(crate) fn from_ws(msg: Message) -> Option<Self> {
        match msg {
            Message::Text(text) => Some(Self::Text(text.to_string())),
            Message::Binary(data) => Some(Self::Binary(data.to_vec())),
            _ => None,
        }
    }

    /// Convert the frame into an outbound WebSocket message.
    pub(crate) fn into_ws(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text.into()),
            Self::Binary(data) => Message::Binary(data.into()),
        }
    }
}

/// A transport-level failure on a single connection.
///
/// `Closed` means the peer ended the connection cleanly; `Failed` covers
/// protocol and I/O violations. The hub handles both the same way —
/// deregister the peer and move on — but callers of the client API can
/// tell a clean goodbye from a fault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer ended the connection normally.
    #[error("Connection closed")]
    Closed,

    /// A protocol or I/O violation ended the connection.
    #[error("Connection failed: {0}")]
    Failed(String),
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            other => Self::Failed(other.to_string()),
        }
    }
}

/// Drain a peer's frame queue into its WebSocket sink.
///
/// Runs until the queue closes (the peer was deregistered) or a send
/// fails. On a clean queue close the sink is given a Close frame so the
/// remote end unblocks promptly.
pub(crate) async fn run_writer(
    peer_addr: std::net::SocketAddr,
    mut sink: ServerWsSink,
    mut rx: mpsc::Receiver<Frame>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(frame.into_ws()).await {
            debug!("Write to {peer_addr} failed: {e}");
            return;
        }
    }

    // Queue closed: the peer was deregistered. Force the connection shut
    // so its pending receive returns instead of waiting on the remote end.
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
    debug!("Writer for {peer_addr} finished");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
