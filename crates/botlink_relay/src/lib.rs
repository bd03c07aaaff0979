//! Botlink relay — broadcast hub for robot control and sensor traffic.
//!
//! This crate provides the session relay between a robot and any number of
//! control programs. Every peer opens a WebSocket connection to the hub;
//! each inbound frame is fanned out to every other connected peer. The
//! relay is frame-blind: payloads (control commands, IMU readings, camera
//! frames) pass through without interpretation.
//!
//! # Architecture
//!
//! - **Transport**: WebSocket-based (via `tokio-tungstenite`). Each
//!   accepted connection owns its read half; the write half sits behind a
//!   bounded per-peer queue drained by a writer task.
//! - **Registry**: thread-safe set of connected peers; snapshot-then-
//!   iterate keeps forwarding out from under the lock.
//! - **Hub**: one receive loop task per connection plus one accept loop,
//!   tied together by a shutdown broadcast channel.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use botlink_relay::{RelayConfig, RelayServer};
//!
//! # async fn example() {
//! let mut server = RelayServer::new(RelayConfig::default());
//! server.start().await.unwrap();
//! // ... peers connect and traffic flows ...
//! server.stop().await;
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod registry;
pub mod transport;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use client::RelayClient;
pub use config::RelayConfig;
pub use error::RelayError;
pub use hub::{RelayServer, RelayStatus};
pub use registry::{Peer, PeerRegistry};
pub use transport::{Frame, TransportError};
