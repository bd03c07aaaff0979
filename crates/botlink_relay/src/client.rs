//! Relay client — dial the hub the way a robot or control program does.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::transport::{Frame, TransportError};

/// A client-side connection to the broadcast hub.
///
/// Sends and receives opaque [`Frame`]s. A frame sent here reaches every
/// *other* peer connected to the hub; frames received are whatever the
/// other peers sent.
pub struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RelayClient {
    /// Connect to a hub at `addr` (`host:port`, with or without a
    /// `ws://` prefix).
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let url = if addr.starts_with("ws://") || addr.starts_with("wss://") {
            addr.to_string()
        } else {
            format!("ws://{addr}")
        };

        let (ws, _) = connect_async(&url)
            .await
            .map_err(|e| TransportError::Failed(format!("Connect to {addr} failed: {e}")))?;
        debug!("Connected to relay at {addr}");

        Ok(Self { ws })
    }

    /// Send one frame to the hub.
    pub async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.ws.send(frame.into_ws()).await.map_err(Into::into)
    }

    /// Receive the next frame from the hub.
    ///
    /// Blocks until a payload frame arrives or the connection ends.
    /// Transport keep-alive messages are skipped. A clean end of
    /// connection yields [`TransportError::Closed`].
    pub async fn recv(&mut self) -> Result<Frame, TransportError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(msg)) => {
                    if let Some(frame) = Frame::from_ws(msg) {
                        return Ok(frame);
                    }
                    // Ping/pong — keep waiting for a payload frame.
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Close the connection gracefully.
    pub async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
