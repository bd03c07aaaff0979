//! Broadcast hub — accept loop, per-connection relay loops, lifecycle.
//!
//! [`RelayServer`] is the primary public API of this crate. `start()`
//! binds the listener and returns once it is accepting; every accepted
//! connection gets its own receive-loop task that fans inbound frames out
//! to all other registered peers. A connection's failure is contained to
//! that connection: it deregisters itself and dies without touching the
//! accept loop or any sibling connection.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::registry::{Peer, PeerRegistry};
use crate::transport::{self, Frame, TransportError};

/// Point-in-time observation of the relay, for a control surface.
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    /// Whether the listener is active.
    pub running: bool,
    /// The bound listener address, when running.
    pub local_addr: Option<SocketAddr>,
    /// Number of currently registered peers.
    pub peers: usize,
}

/// Handles held only while the relay is running.
struct Running {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

/// The broadcast relay server.
///
/// At most one listener is active per instance. All shared state lives in
/// the [`PeerRegistry`]; peers never reference each other directly.
pub struct RelayServer {
    config: RelayConfig,
    registry: Arc<PeerRegistry>,
    running: Option<Running>,
}

impl RelayServer {
    /// Create a relay server with the given configuration. No listener is
    /// started until [`start()`](Self::start).
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            registry: Arc::new(PeerRegistry::new()),
            running: None,
        }
    }

    /// Whether the relay is currently accepting connections.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// The bound listener address, if running. With a configured port of
    /// zero this is the actual ephemeral port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Number of currently connected peers.
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Current status snapshot.
    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            running: self.is_running(),
            local_addr: self.local_addr(),
            peers: self.peer_count(),
        }
    }

    /// Bind the configured address and begin accepting connections.
    ///
    /// Returns the bound local address once the listener is ready to
    /// accept — not once future connections are handled. Fails with
    /// [`RelayError::AlreadyRunning`] if a listener is already active,
    /// leaving existing connections untouched.
    pub async fn start(&mut self) -> Result<SocketAddr, RelayError> {
        if self.running.is_some() {
            return Err(RelayError::AlreadyRunning);
        }

        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        self.registry.reopen();

        // Subscribe before spawning: a receiver created inside the task
        // could miss a shutdown sent before the task is first polled.
        let (shutdown_tx, shutdown_rx) = broadcast::channel(8);
        let registry = Arc::clone(&self.registry);
        let peer_buffer = self.config.peer_buffer;
        let accept_shutdown = shutdown_tx.clone();
        let accept_task = tokio::spawn(async move {
            accept_loop(listener, registry, peer_buffer, accept_shutdown, shutdown_rx).await;
        });

        self.running = Some(Running {
            local_addr,
            shutdown_tx,
            accept_task,
        });

        info!("Relay listening on {local_addr}");
        Ok(local_addr)
    }

    /// Stop accepting and close every registered peer's connection.
    ///
    /// Returns after the listener is closed, guaranteeing no connection is
    /// accepted afterwards. Each peer's teardown runs through its own
    /// receive loop's normal closing path. Calling `stop()` when not
    /// running is a no-op.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(());
        if let Err(e) = running.accept_task.await {
            warn!("Accept loop join failed: {e}");
        }

        // Closing the registry refuses any registration still in flight
        // and drops the frame queues, which ends each peer's writer task,
        // force-closes its socket, and unblocks its pending receive.
        self.registry.close();

        info!("Relay stopped");
    }
}

/// Accept connections until shutdown. Each accepted connection gets its
/// own task, so accepting never waits on an existing connection's loop.
async fn accept_loop(
    listener: TcpListener,
    registry: Arc<PeerRegistry>,
    peer_buffer: usize,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        let registry = Arc::clone(&registry);
                        let conn_shutdown = shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            handle_connection(stream, peer_addr, registry, peer_buffer, conn_shutdown)
                                .await;
                        });
                    }
                    Err(e) => {
                        error!("TCP accept failed: {e}");
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("Relay listener shutting down");
                break;
            }
        }
    }
}

/// One connection's life: Connecting → Registered → Relaying → Closing →
/// Closed. Any exit path deregisters the peer and releases its transport.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<PeerRegistry>,
    peer_buffer: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket accept failed for {peer_addr}: {e}");
            return;
        }
    };

    let (sink, mut stream) = ws_stream.split();
    let (tx, rx) = mpsc::channel(peer_buffer);
    tokio::spawn(transport::run_writer(peer_addr, sink, rx));

    // Registration is refused when the registry has been closed by
    // `stop()` — a connection can finish its WebSocket handshake after
    // the listener is already gone — or on an address collision (remote
    // addresses are unique per live connection, so that means a stale
    // entry). Returning drops the frame queue, which closes the socket.
    if !registry.register(Peer::new(peer_addr, tx)) {
        return;
    }
    info!("Peer {peer_addr} connected ({} registered)", registry.len());

    // Relaying: receive until closure, error, or relay stop.
    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) => {
                        debug!("Peer {peer_addr} sent close");
                        break;
                    }
                    Some(Ok(msg)) => {
                        if let Some(frame) = Frame::from_ws(msg) {
                            if frame.is_blank() {
                                debug!("Dropping blank frame from {peer_addr}");
                            } else {
                                broadcast_from(&registry, peer_addr, frame);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        match TransportError::from(e) {
                            TransportError::Closed => {
                                debug!("Peer {peer_addr} closed");
                            }
                            TransportError::Failed(reason) => {
                                warn!("Peer {peer_addr} failed: {reason}");
                            }
                        }
                        break;
                    }
                    None => {
                        debug!("Peer {peer_addr} stream ended");
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                debug!("Connection loop for {peer_addr} shutting down");
                break;
            }
        }
    }

    registry.deregister(peer_addr);
    info!("Peer {peer_addr} disconnected ({} registered)", registry.len());
}

/// Forward a frame to every registered peer except the sender.
///
/// Iterates a registry snapshot taken at forward time; each snapshot
/// member gets exactly one forward attempt. A failed forward tears down
/// only that recipient and never aborts the remaining forwards.
fn broadcast_from(registry: &PeerRegistry, sender: SocketAddr, frame: Frame) {
    for peer in registry.snapshot() {
        if peer.addr() == sender {
            continue;
        }
        if let Err(e) = peer.forward(frame.clone()) {
            warn!("Forward to {} failed: {e}", peer.addr());
            registry.deregister(peer.addr());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RelayClient;
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_config() -> RelayConfig {
        let mut config = RelayConfig::default();
        config.listen_addr = "127.0.0.1:0".parse().unwrap();
        config
    }

    async fn wait_for_peers(server: &RelayServer, n: usize) {
        for _ in 0..100 {
            if server.peer_count() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Peer count never reached {n}");
    }

    async fn assert_no_frame(client: &mut RelayClient) {
        let result = timeout(Duration::from_millis(300), client.recv()).await;
        assert!(result.is_err(), "Expected no frame, got {result:?}");
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let mut server = RelayServer::new(test_config());
        assert!(!server.is_running());

        let addr = server.start().await.unwrap();
        assert!(server.is_running());
        assert_eq!(server.local_addr(), Some(addr));
        assert_ne!(addr.port(), 0);

        server.stop().await;
        assert!(!server.is_running());
        assert_eq!(server.local_addr(), None);

        // Stopping again is a no-op.
        server.stop().await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_stop_with_no_connections_returns_promptly() {
        // The shutdown signal must reach an accept loop that has never
        // handled a connection, even if it has not been polled yet.
        let mut server = RelayServer::new(test_config());
        server.start().await.unwrap();

        timeout(Duration::from_secs(2), server.stop())
            .await
            .expect("stop() did not return");
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_double_start_returns_already_running() {
        let mut server = RelayServer::new(test_config());
        server.start().await.unwrap();

        match server.start().await {
            Err(RelayError::AlreadyRunning) => {}
            other => panic!("Expected AlreadyRunning, got {other:?}"),
        }
        assert!(server.is_running());

        server.stop().await;
    }

    #[tokio::test]
    async fn test_fanout_exactly_once() {
        let mut server = RelayServer::new(test_config());
        let addr = server.start().await.unwrap();

        let mut alice = RelayClient::connect(&addr.to_string()).await.unwrap();
        let mut bob = RelayClient::connect(&addr.to_string()).await.unwrap();
        let mut carol = RelayClient::connect(&addr.to_string()).await.unwrap();
        wait_for_peers(&server, 3).await;

        alice
            .send(Frame::Text("wheel,100,1".to_string()))
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(2), bob.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Frame::Text("wheel,100,1".to_string()));

        let received = timeout(Duration::from_secs(2), carol.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Frame::Text("wheel,100,1".to_string()));

        // Exactly one copy each, zero copies back to the sender.
        assert_no_frame(&mut bob).await;
        assert_no_frame(&mut carol).await;
        assert_no_frame(&mut alice).await;

        server.stop().await;
    }

    #[tokio::test]
    async fn test_binary_frames_relayed() {
        let mut server = RelayServer::new(test_config());
        let addr = server.start().await.unwrap();

        let mut robot = RelayClient::connect(&addr.to_string()).await.unwrap();
        let mut viewer = RelayClient::connect(&addr.to_string()).await.unwrap();
        wait_for_peers(&server, 2).await;

        let payload = vec![0x00, 0xFF, 0x10, 0x20];
        robot.send(Frame::Binary(payload.clone())).await.unwrap();

        let received = timeout(Duration::from_secs(2), viewer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Frame::Binary(payload));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_blank_frames_never_forwarded() {
        let mut server = RelayServer::new(test_config());
        let addr = server.start().await.unwrap();

        let mut sender = RelayClient::connect(&addr.to_string()).await.unwrap();
        let mut receiver = RelayClient::connect(&addr.to_string()).await.unwrap();
        wait_for_peers(&server, 2).await;

        sender.send(Frame::Text("   ".to_string())).await.unwrap();
        sender.send(Frame::Text(String::new())).await.unwrap();
        sender.send(Frame::Text("real".to_string())).await.unwrap();

        // The first frame through is the non-blank one.
        let received = timeout(Duration::from_secs(2), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Frame::Text("real".to_string()));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_forward_failure_contained_to_one_recipient() {
        let registry = PeerRegistry::new();

        let sender_addr: SocketAddr = "127.0.0.1:9100".parse().unwrap();
        let (dead_tx, dead_rx) = mpsc::channel(4);
        let dead_addr: SocketAddr = "127.0.0.1:9101".parse().unwrap();
        let (live_tx, mut live_rx) = mpsc::channel(4);
        let live_addr: SocketAddr = "127.0.0.1:9102".parse().unwrap();

        registry.register(Peer::new(dead_addr, dead_tx));
        registry.register(Peer::new(live_addr, live_tx));
        drop(dead_rx); // dead peer's writer is gone

        broadcast_from(&registry, sender_addr, Frame::Text("m".to_string()));

        // Live peer still got its copy; dead peer was deregistered.
        assert_eq!(live_rx.try_recv().unwrap(), Frame::Text("m".to_string()));
        assert!(!registry.contains(dead_addr));
        assert!(registry.contains(live_addr));
    }

    #[tokio::test]
    async fn test_sender_excluded_from_snapshot_forward() {
        let registry = PeerRegistry::new();

        let (tx, mut rx) = mpsc::channel(4);
        let addr: SocketAddr = "127.0.0.1:9103".parse().unwrap();
        registry.register(Peer::new(addr, tx));

        // Broadcasting from the only registered peer delivers nothing.
        broadcast_from(&registry, addr, Frame::Text("echo?".to_string()));
        assert!(rx.try_recv().is_err());
        assert!(registry.contains(addr));
    }

    #[tokio::test]
    async fn test_stop_closes_connected_peers() {
        let mut server = RelayServer::new(test_config());
        let addr = server.start().await.unwrap();

        let mut client = RelayClient::connect(&addr.to_string()).await.unwrap();
        wait_for_peers(&server, 1).await;

        server.stop().await;

        // The pending receive unblocks with a closure error.
        let result = timeout(Duration::from_secs(2), client.recv()).await.unwrap();
        assert_eq!(result, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_stop_then_start_same_port() {
        let mut server = RelayServer::new(test_config());
        let addr = server.start().await.unwrap();

        let _client = RelayClient::connect(&addr.to_string()).await.unwrap();
        wait_for_peers(&server, 1).await;

        server.stop().await;

        // Rebind the exact same address; the registry starts empty.
        let mut config = test_config();
        config.listen_addr = addr;
        let mut server = RelayServer::new(config);
        let new_addr = server.start().await.unwrap();
        assert_eq!(new_addr, addr);
        assert_eq!(server.peer_count(), 0);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_peer_disconnect_leaves_others_relaying() {
        let mut server = RelayServer::new(test_config());
        let addr = server.start().await.unwrap();

        let mut alice = RelayClient::connect(&addr.to_string()).await.unwrap();
        let mut bob = RelayClient::connect(&addr.to_string()).await.unwrap();
        let mut carol = RelayClient::connect(&addr.to_string()).await.unwrap();
        wait_for_peers(&server, 3).await;

        carol.close().await;
        wait_for_peers(&server, 2).await;

        alice
            .send(Frame::Text("still here".to_string()))
            .await
            .unwrap();
        let received = timeout(Duration::from_secs(2), bob.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Frame::Text("still here".to_string()));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let mut server = RelayServer::new(test_config());

        let status = server.status();
        assert!(!status.running);
        assert!(status.local_addr.is_none());
        assert_eq!(status.peers, 0);

        let addr = server.start().await.unwrap();
        let status = server.status();
        assert!(status.running);
        assert_eq!(status.local_addr, Some(addr));

        server.stop().await;
    }
}
