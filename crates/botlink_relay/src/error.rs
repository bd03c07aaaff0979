//! Relay error types.

use crate::transport::TransportError;

/// Errors that can occur in the botlink_relay crate.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// `start()` was called while a listener is already active.
    #[error("Relay already running")]
    AlreadyRunning,

    /// A transport-level error (connect/send/receive).
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// An I/O error occurred (bind, accept).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
