//! Peer registry — the set of currently connected peers.
//!
//! Membership here is the single source of truth for who receives
//! broadcasts: a peer is registered exactly while its connection is open
//! and its accept handshake has completed. All mutation goes through one
//! mutex, and broadcast callers iterate a [`snapshot`](PeerRegistry::snapshot)
//! copy so no lock is ever held during network I/O.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::transport::{Frame, TransportError};

/// A live connection handle: the peer's identifier plus the sending side
/// of its frame queue. Cloning shares the same underlying queue.
#[derive(Debug, Clone)]
pub struct Peer {
    addr: SocketAddr,
    tx: mpsc::Sender<Frame>,
}

impl Peer {
    /// Create a peer handle from its remote address and frame queue.
    pub fn new(addr: SocketAddr, tx: mpsc::Sender<Frame>) -> Self {
        Self { addr, tx }
    }

    /// The peer's unique identifier (its remote socket address).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Enqueue a frame for delivery to this peer.
    ///
    /// Never blocks: a full queue means the peer has stalled under
    /// backpressure and is reported as `Failed`; a closed queue means the
    /// peer is already gone (`Closed`). Either way the caller tears down
    /// only this recipient.
    pub fn forward(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::Failed("forward queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

#[derive(Debug, Default)]
struct Inner {
    peers: HashMap<SocketAddr, Peer>,
    closed: bool,
}

/// Registry of all currently connected peers.
///
/// Internally a mutex-guarded map; every operation is atomic with respect
/// to the others and none performs I/O while holding the lock. A closed
/// registry refuses registration, so a connection whose handshake
/// finishes after the relay has stopped cannot slip in.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    inner: Mutex<Inner>,
}

impl PeerRegistry {
    /// Create an empty, open registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer. Returns `false` if the registry is closed, or if a
    /// peer with the same address is already registered (the existing
    /// entry stays in place).
    pub fn register(&self, peer: Peer) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            debug!("Registration of {} refused: registry closed", peer.addr);
            return false;
        }
        if inner.peers.contains_key(&peer.addr) {
            warn!("Duplicate registration for {} rejected", peer.addr);
            return false;
        }
        inner.peers.insert(peer.addr, peer);
        true
    }

    /// Remove a peer by address. Removing an absent peer is a no-op, so
    /// deregistration is idempotent.
    pub fn deregister(&self, addr: SocketAddr) -> Option<Peer> {
        self.inner.lock().peers.remove(&addr)
    }

    /// A point-in-time copy of the registered peers, safe to iterate
    /// while the registry is concurrently mutated.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.inner.lock().peers.values().cloned().collect()
    }

    /// Whether a peer with this address is registered.
    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.inner.lock().peers.contains_key(&addr)
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.inner.lock().peers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().peers.is_empty()
    }

    /// Refuse further registrations and remove every peer, dropping each
    /// one's frame queue. Dropping the queue ends that peer's writer
    /// task, which closes its connection.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.peers.clear();
    }

    /// Accept registrations again after [`close`](Self::close).
    pub fn reopen(&self) {
        self.inner.lock().closed = false;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
